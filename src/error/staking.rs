use crate::types::{StakingProgramId, StakingState};
use alloy::primitives::{Address, U256};
use thiserror::Error;

/// Errors related to staking operations.
///
/// All of these are raised before a transaction is built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StakingError {
    /// The service is not unstaked and cannot be staked again.
    #[error("service {service_id} is {state} in {contract}, expected UNSTAKED")]
    NotUnstaked {
        /// The service token.
        service_id: U256,
        /// The staking contract.
        contract: Address,
        /// The observed staking state.
        state: StakingState,
    },
    /// The service is not staked in the contract.
    #[error("service {service_id} is not staked in {contract}")]
    NotStaked {
        /// The service token.
        service_id: U256,
        /// The staking contract.
        contract: Address,
    },
    /// The staking contract has no free slots.
    #[error("no staking slots available in {0}")]
    NoSlots(Address),
    /// The staking contract has no rewards left.
    #[error("no staking rewards available in {0}")]
    NoRewards(Address),
    /// The minimum staking duration has not elapsed while rewards are still available.
    #[error(
        "service {service_id} cannot be unstaked from {contract} for another {remaining}s \
         (staked for {staked_for}s, minimum {min_duration}s)"
    )]
    Cooldown {
        /// The service token.
        service_id: U256,
        /// The staking contract.
        contract: Address,
        /// Seconds since the service was staked.
        staked_for: u64,
        /// Minimum staking duration of the contract.
        min_duration: u64,
        /// Seconds left before unstaking is allowed.
        remaining: u64,
    },
    /// The staking contract admits services of several agents, a service runs a single one.
    #[error("staking contract {contract} requires agent ids {agent_ids:?}")]
    UnsupportedAgentIds {
        /// The staking contract.
        contract: Address,
        /// Agent ids required by the contract.
        agent_ids: Vec<u32>,
    },
    /// The staking program is not configured for the chain.
    #[error("unknown staking program {0}")]
    UnknownProgram(StakingProgramId),
    /// The service has not been minted yet.
    #[error("service is not minted")]
    NotMinted,
}
