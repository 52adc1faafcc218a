//! Multi-signer abstraction.
//!
//! A signer abstracted over multiple underlying signers.
use crate::types::AgentKey;
use alloy::{
    network::{FullSigner, TxSigner},
    primitives::{Address, B256, Bytes, Signature},
    signers::{
        k256::ecdsa::SigningKey,
        local::{
            PrivateKeySigner,
            coins_bip39::{English, Mnemonic},
        },
    },
};
use std::{fmt, ops::Deref, str::FromStr, sync::Arc};

/// Abstraction over local signer.
#[derive(Clone)]
pub struct DynSigner(pub Arc<dyn FullSigner<Signature> + Send + Sync>);

impl fmt::Debug for DynSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DynSigner").field(&self.address()).finish()
    }
}

impl DynSigner {
    /// Derives given number of signers from a mnemonic.
    pub fn derive_from_mnemonic(
        mnemonic: Mnemonic<English>,
        num: usize,
    ) -> eyre::Result<Vec<Self>> {
        (0..num)
            .map(|idx| {
                let path = format!("m/44'/60'/0'/0/{idx}");
                let key = mnemonic.derive_key(path.as_str(), None)?;
                let key: &SigningKey = key.as_ref();
                Ok(Self(Arc::new(PrivateKeySigner::from_signing_key(key.clone()))))
            })
            .collect()
    }

    /// Load a private key.
    pub fn from_signing_key(key: &str) -> eyre::Result<Self> {
        Ok(Self(Arc::new(PrivateKeySigner::from_str(key)?)))
    }

    /// Load the key of an agent instance, checking it matches the recorded address.
    pub fn from_agent_key(key: &AgentKey) -> eyre::Result<Self> {
        let signer = Self::from_signing_key(&key.private_key)?;
        if signer.address() != key.address {
            eyre::bail!("agent key does not match address {}", key.address);
        }
        Ok(signer)
    }

    /// Generates a random signer.
    pub fn random() -> Self {
        Self(Arc::new(PrivateKeySigner::random()))
    }

    /// Returns the signer's Ethereum Address.
    pub fn address(&self) -> Address {
        TxSigner::address(&self.0)
    }

    /// Signs a raw 32 byte digest without any message prefix.
    ///
    /// Returns the 65 byte `r || s || v` encoding with `v` in `{27, 28}`.
    pub async fn sign_digest(&self, digest: B256) -> Result<Bytes, alloy::signers::Error> {
        Ok(self.sign_hash(&digest).await?.as_bytes().into())
    }
}

impl Deref for DynSigner {
    type Target = dyn FullSigner<Signature> + Send + Sync;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
