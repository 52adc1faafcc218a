//! Service records and their per-chain on-chain snapshot.

use crate::constants::NON_EXISTENT_TOKEN;
use alloy::primitives::{Address, ChainId, U256};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::{collections::BTreeMap, fmt};
use url::Url;

/// Identifier of a staking program, e.g. `pearl_beta`.
pub type StakingProgramId = String;

/// Registry state of a service.
///
/// Values are the ones defined by the service registry contract.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize_repr,
    Deserialize_repr,
)]
#[repr(u8)]
pub enum OnChainState {
    /// The service token does not exist.
    #[default]
    NonExistent = 0,
    /// Minted, waiting for the owner to activate registration.
    PreRegistration = 1,
    /// Security deposit paid, agent instances may register.
    ActiveRegistration = 2,
    /// All agent slots are filled.
    FinishedRegistration = 3,
    /// The service multisig exists.
    Deployed = 4,
    /// Terminated, operator bonds are still held by the registry.
    TerminatedBonded = 5,
    /// Bonds returned to the operators.
    Unbonded = 6,
}

impl OnChainState {
    /// Whether the service may be terminated from this state.
    pub const fn is_terminable(&self) -> bool {
        matches!(self, Self::ActiveRegistration | Self::FinishedRegistration | Self::Deployed)
    }
}

impl TryFrom<u8> for OnChainState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::NonExistent,
            1 => Self::PreRegistration,
            2 => Self::ActiveRegistration,
            3 => Self::FinishedRegistration,
            4 => Self::Deployed,
            5 => Self::TerminatedBonded,
            6 => Self::Unbonded,
            other => return Err(other),
        })
    }
}

impl fmt::Display for OnChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NonExistent => "NON_EXISTENT",
            Self::PreRegistration => "PRE_REGISTRATION",
            Self::ActiveRegistration => "ACTIVE_REGISTRATION",
            Self::FinishedRegistration => "FINISHED_REGISTRATION",
            Self::Deployed => "DEPLOYED",
            Self::TerminatedBonded => "TERMINATED_BONDED",
            Self::Unbonded => "UNBONDED",
        };
        f.write_str(name)
    }
}

/// Staking state of a service in one staking contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum StakingState {
    /// Not staked in the contract.
    #[default]
    Unstaked = 0,
    /// Staked and accruing rewards.
    Staked = 1,
    /// Evicted for inactivity, still held by the contract.
    Evicted = 2,
}

impl StakingState {
    /// Whether the staking contract currently holds the service.
    pub const fn is_held(&self) -> bool {
        matches!(self, Self::Staked | Self::Evicted)
    }
}

impl TryFrom<u8> for StakingState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Unstaked,
            1 => Self::Staked,
            2 => Self::Evicted,
            other => return Err(other),
        })
    }
}

impl fmt::Display for StakingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unstaked => "UNSTAKED",
            Self::Staked => "STAKED",
            Self::Evicted => "EVICTED",
        })
    }
}

/// Balance thresholds the funding job keeps the service addresses above.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRequirements {
    /// Minimum native balance of every agent instance.
    pub agent: U256,
    /// Minimum native balance of the service multisig.
    pub safe: U256,
}

/// Desired configuration for one deployment attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserParams {
    /// Bond per agent instance, in the bonding currency.
    pub cost_of_bond: U256,
    /// Signature threshold of the service multisig.
    pub threshold: u32,
    /// Agent id the instances register for.
    pub agent_id: u32,
    /// NFT metadata reference of the service.
    #[serde(default)]
    pub nft: String,
    /// Whether the service should be staked once deployed.
    #[serde(default)]
    pub use_staking: bool,
    /// Staking program the service should end up in.
    #[serde(default)]
    pub staking_program_id: Option<StakingProgramId>,
    /// Funding thresholds.
    #[serde(default)]
    pub fund_requirements: FundRequirements,
}

/// Last observed on-chain state of a service on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainData {
    /// Registry token, [`NON_EXISTENT_TOKEN`] if not minted.
    pub token: i64,
    /// Service multisig, zero if never deployed.
    pub multisig: Address,
    /// Agent instances of the last registration, kept after unbonding until the next one.
    pub instances: Vec<Address>,
    /// Whether the service is held by a staking contract.
    pub staked: bool,
    /// Registry state.
    pub on_chain_state: OnChainState,
    /// Desired configuration.
    pub user_params: UserParams,
}

impl OnChainData {
    /// Creates the snapshot of a service that has not been minted yet.
    pub fn new(user_params: UserParams) -> Self {
        Self {
            token: NON_EXISTENT_TOKEN,
            multisig: Address::ZERO,
            instances: Vec::new(),
            staked: false,
            on_chain_state: OnChainState::NonExistent,
            user_params,
        }
    }

    /// Returns the registry id of the service, if minted.
    pub fn service_id(&self) -> Option<U256> {
        (self.token >= 0).then(|| U256::from(self.token as u64))
    }
}

/// Ledger the service is configured for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// RPC endpoint.
    pub rpc: Url,
    /// Chain id.
    pub chain_id: ChainId,
}

/// Configuration of a service on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Ledger the service lives on.
    pub ledger_config: LedgerConfig,
    /// Last observed state.
    pub chain_data: OnChainData,
}

/// Key of an agent instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentKey {
    /// Address of the instance.
    pub address: Address,
    /// Hex encoded private key.
    pub private_key: String,
}

impl fmt::Debug for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKey").field("address", &self.address).finish_non_exhaustive()
    }
}

/// An autonomous service, identified by the content hash of its package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Content hash of the package.
    pub hash: String,
    /// Keys of the agent instances run by this operator.
    #[serde(default)]
    pub keys: Vec<AgentKey>,
    /// Per chain configuration.
    pub chain_configs: BTreeMap<ChainId, ChainConfig>,
}

impl Service {
    /// Creates a service without any chain configured.
    pub fn new(hash: impl Into<String>, keys: Vec<AgentKey>) -> Self {
        Self { hash: hash.into(), keys, chain_configs: BTreeMap::new() }
    }

    /// Adds a chain to the service.
    pub fn with_chain(mut self, ledger_config: LedgerConfig, user_params: UserParams) -> Self {
        self.chain_configs.insert(
            ledger_config.chain_id,
            ChainConfig { ledger_config, chain_data: OnChainData::new(user_params) },
        );
        self
    }

    /// Addresses of the agent instances.
    pub fn agent_addresses(&self) -> Vec<Address> {
        self.keys.iter().map(|key| key.address).collect()
    }

    /// Returns the key of the given agent instance.
    pub fn agent_key(&self, address: Address) -> Option<&AgentKey> {
        self.keys.iter().find(|key| key.address == address)
    }
}
