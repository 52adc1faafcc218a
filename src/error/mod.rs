//! Operator error types.
use alloy::{primitives::ChainId, transports::TransportErrorKind};
use thiserror::Error;

mod lifecycle;
pub use lifecycle::LifecycleError;

mod safe;
pub use safe::SafeTxError;

mod settle;
pub use settle::SettleError;

mod staking;
pub use staking::StakingError;

mod storage;
pub use storage::StorageError;

/// The overarching error type returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Errors related to the service lifecycle.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// Errors related to staking.
    #[error(transparent)]
    Staking(#[from] StakingError),
    /// Errors related to Safe transactions.
    #[error(transparent)]
    Safe(#[from] SafeTxError),
    /// Errors related to transaction settlement.
    #[error(transparent)]
    Settle(#[from] SettleError),
    /// Errors related to storage.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An error occurred while signing.
    #[error(transparent)]
    Signer(#[from] alloy::signers::Error),
    /// The chain is not supported.
    #[error("unsupported chain {0}")]
    UnsupportedChain(ChainId),
    /// An error occurred during ABI encoding/decoding.
    #[error(transparent)]
    AbiError(#[from] alloy::sol_types::Error),
    /// An error occurred talking to RPC.
    #[error(transparent)]
    RpcError(#[from] alloy::transports::RpcError<TransportErrorKind>),
    /// An internal error occurred.
    #[error(transparent)]
    InternalError(#[from] eyre::Error),
}

impl OperatorError {
    /// Whether the error is a precondition failure that was raised before any transaction was
    /// sent.
    ///
    /// Such failures leave the on-chain state untouched and are remedied by the caller, e.g. by
    /// funding an address or waiting for a cooldown.
    pub fn is_precondition(&self) -> bool {
        match self {
            Self::Lifecycle(err) => err.is_precondition(),
            Self::Staking(_) => true,
            Self::Safe(SafeTxError::OwnerMismatch { .. }) => true,
            _ => false,
        }
    }
}
