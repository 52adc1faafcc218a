//! Master wallet of the operator.

use alloy::primitives::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The operator's EOA and the Safe it controls on every chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterWallet {
    /// Address of the EOA holding the key material.
    pub address: Address,
    /// Safe owned by the EOA, per chain.
    #[serde(default)]
    pub safes: BTreeMap<ChainId, Address>,
}

impl MasterWallet {
    /// Creates a wallet without any Safe.
    pub fn new(address: Address) -> Self {
        Self { address, safes: BTreeMap::new() }
    }

    /// Registers the Safe used on a chain.
    pub fn with_safe(mut self, chain_id: ChainId, safe: Address) -> Self {
        self.safes.insert(chain_id, safe);
        self
    }

    /// Returns the controller of services on the given chain.
    pub fn controller(&self, chain_id: ChainId) -> Controller {
        match self.safes.get(&chain_id) {
            Some(safe) => Controller::Safe { eoa: self.address, safe: *safe },
            None => Controller::Eoa(self.address),
        }
    }
}

/// Account owning services and funds on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    /// The EOA sends every call directly.
    Eoa(Address),
    /// Calls are batched through the Safe, signed by the EOA.
    Safe {
        /// Signing owner of the Safe.
        eoa: Address,
        /// The Safe.
        safe: Address,
    },
}

impl Controller {
    /// Address that owns services and holds funds.
    pub const fn address(&self) -> Address {
        match self {
            Self::Eoa(eoa) => *eoa,
            Self::Safe { safe, .. } => *safe,
        }
    }

    /// Whether the controller is a Safe.
    pub const fn is_safe(&self) -> bool {
        matches!(self, Self::Safe { .. })
    }
}
