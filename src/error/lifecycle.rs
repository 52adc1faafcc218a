use crate::types::OnChainState;
use alloy::primitives::{Address, ChainId, U256};
use thiserror::Error;

/// Errors related to driving the service lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The controller holds less bonding token than the next steps require.
    #[error(
        "insufficient balance of {token} in {holder} at {state}: \
         required {required}, actual {actual}"
    )]
    InsufficientBalance {
        /// State the service was observed in.
        state: OnChainState,
        /// The bonding token.
        token: Address,
        /// Address whose balance was checked.
        holder: Address,
        /// Amount required to proceed.
        required: U256,
        /// Balance observed.
        actual: U256,
    },
    /// The bond does not fit the 96 bit registry field.
    #[error("bond {0} exceeds the registry bond width")]
    BondOverflow(U256),
    /// Multisig reuse was requested but the service never had one.
    #[error("service {service_id} has no prior multisig to reuse")]
    NoPriorMultisig {
        /// The service token.
        service_id: U256,
    },
    /// The target state is not reachable by resolution.
    #[error("cannot resolve to {0}, target must be at most DEPLOYED")]
    InvalidTarget(OnChainState),
    /// A settled step did not move the service into the expected state.
    #[error("expected service {service_id} in {expected} after the last step, found {actual}")]
    UnexpectedState {
        /// The service token.
        service_id: U256,
        /// Expected state.
        expected: OnChainState,
        /// State read from chain.
        actual: OnChainState,
    },
    /// The service is not configured for the chain.
    #[error("service {hash} has no config for chain {chain_id}")]
    MissingChainConfig {
        /// Service hash.
        hash: String,
        /// The chain.
        chain_id: ChainId,
    },
    /// Fewer agent keys are available than slots to register.
    #[error("service needs {required} agent instances, {available} keys available")]
    NotEnoughInstances {
        /// Slots of the service.
        required: usize,
        /// Keys held by the service.
        available: usize,
    },
    /// The service token is owned by another account.
    #[error("service {service_id} is owned by {owner}, not the controller {controller}")]
    NotOwner {
        /// The service token.
        service_id: U256,
        /// Owner read from chain.
        owner: Address,
        /// Controller of the chain context.
        controller: Address,
    },
}

impl LifecycleError {
    /// Whether the error was raised before any transaction was sent.
    pub const fn is_precondition(&self) -> bool {
        !matches!(self, Self::UnexpectedState { .. })
    }
}
