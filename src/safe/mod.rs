//! Safe transactions.
//!
//! Calls are batched into one `multiSend` delegate call, hashed with the Safe's EIP-712
//! `SafeTx` scheme, signed by the owners and wrapped into `execTransaction`.

use crate::{error::SafeTxError, signers::DynSigner};
use alloy::{
    primitives::{Address, B256, Bytes, ChainId, U256},
    sol,
    sol_types::{Eip712Domain, SolStruct, eip712_domain},
};
use serde_repr::{Deserialize_repr, Serialize_repr};

mod builder;
pub use builder::{SafeTxBuilder, exec_transaction_call};

mod multisend;
pub use multisend::{MultiSendCall, decode_multisend, encode_multisend};

mod payload;
pub use payload::{SAFE_TX_PAYLOAD_HEADER_LEN, SafeTxPayload};

sol! {
    /// EIP-712 struct signed by Safe owners.
    #[derive(Debug, PartialEq, Eq)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}

/// How a Safe executes a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SafeOperation {
    /// Regular call.
    #[default]
    Call = 0,
    /// Delegate call, only used for the multi-send wrapper.
    DelegateCall = 1,
}

impl TryFrom<u8> for SafeOperation {
    type Error = SafeTxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Call),
            1 => Ok(Self::DelegateCall),
            other => Err(SafeTxError::InvalidOperation(other)),
        }
    }
}

/// Returns the EIP-712 domain of a Safe.
pub fn safe_domain(chain_id: ChainId, safe: Address) -> Eip712Domain {
    eip712_domain! {
        chain_id: chain_id,
        verifying_contract: safe,
    }
}

/// Returns the hash the owners of `safe` sign for `tx`.
pub fn safe_tx_hash(chain_id: ChainId, safe: Address, tx: &SafeTx) -> B256 {
    tx.eip712_signing_hash(&safe_domain(chain_id, safe))
}

/// An owner contributing a signature to a Safe transaction.
#[derive(Debug, Clone)]
pub enum SafeOwner {
    /// An EOA owner signing the hash directly.
    Signer(DynSigner),
    /// A contract owner that approved the hash on chain via `approveHash`, or is the sender of
    /// the `execTransaction` call.
    ApprovedHash(Address),
}

impl SafeOwner {
    /// Address of the owner.
    pub fn address(&self) -> Address {
        match self {
            Self::Signer(signer) => signer.address(),
            Self::ApprovedHash(owner) => *owner,
        }
    }

    /// Produces the 65 byte signature of this owner over `hash`.
    pub async fn sign(&self, hash: B256) -> Result<Bytes, alloy::signers::Error> {
        match self {
            Self::Signer(signer) => signer.sign_digest(hash).await,
            Self::ApprovedHash(owner) => Ok(approved_hash_signature(*owner)),
        }
    }
}

/// Signature of an owner that pre-approved the hash: `r = owner, s = 0, v = 1`.
pub fn approved_hash_signature(owner: Address) -> Bytes {
    let mut signature = [0u8; 65];
    signature[12..32].copy_from_slice(owner.as_slice());
    signature[64] = 1;
    signature.into()
}

/// Concatenates the signatures of `owners` over `hash`, ordered by ascending owner address as
/// the Safe requires.
pub async fn sign_safe_tx(
    owners: &[SafeOwner],
    hash: B256,
) -> Result<Bytes, alloy::signers::Error> {
    let mut owners = owners.iter().collect::<Vec<_>>();
    owners.sort_by_key(|owner| owner.address());
    owners.dedup_by_key(|owner| owner.address());

    let mut signatures = Vec::with_capacity(owners.len() * 65);
    for owner in owners {
        signatures.extend_from_slice(&owner.sign(hash).await?);
    }
    Ok(signatures.into())
}

impl SafeTxPayload {
    /// Returns the signed struct of this payload at the given Safe nonce.
    pub fn safe_tx(&self, nonce: U256) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation as u8,
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            nonce,
        }
    }
}
