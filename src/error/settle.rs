use alloy::{
    primitives::B256,
    transports::{RpcError, TransportErrorKind},
};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`Settler`](crate::transactions::Settler).
#[derive(Debug, Error)]
pub enum SettleError {
    /// The retry or time budget was exhausted before a receipt was observed.
    #[error("no receipt after {attempts} attempts in {elapsed:?}")]
    Timeout {
        /// Number of submission rounds.
        attempts: u32,
        /// Time spent settling.
        elapsed: Duration,
    },
    /// The transaction was mined but reverted.
    #[error("transaction {0} reverted")]
    Reverted(B256),
    /// The node rejected the transaction for a reason retrying cannot fix.
    #[error("chain interaction failed: {0}")]
    ChainInteraction(String),
    /// The endpoint stayed unreachable for the whole budget.
    #[error("ledger endpoint unreachable: {0}")]
    Unreachable(#[source] RpcError<TransportErrorKind>),
}
