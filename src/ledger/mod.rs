//! Chain gateway.
//!
//! [`LedgerApi`] is the narrow view of a ledger RPC endpoint the operator depends on. Everything
//! above it (settler, Safe builder, staking, lifecycle) talks to the chain through this trait.

use crate::{error::OperatorError, types::Call};
use alloy::{
    eips::eip1559::Eip1559Estimation,
    primitives::{Address, B256, Bytes, ChainId, U256},
    sol_types::SolCall,
    transports::TransportResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

mod error;
pub use error::TransportErrExt;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{SimulatedLedger, StakingProgramParams};

mod rpc;
pub use rpc::RpcLedger;

/// Receipt of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction.
    pub tx_hash: B256,
    /// Whether execution succeeded.
    pub status: bool,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Gas used by the transaction.
    pub gas_used: u64,
}

/// Read and submission access to one ledger.
#[async_trait]
pub trait LedgerApi: Debug + Send + Sync {
    /// Returns the chain id of the ledger.
    async fn chain_id(&self) -> TransportResult<ChainId>;

    /// Returns the native balance of an address.
    async fn get_balance(&self, address: Address) -> TransportResult<U256>;

    /// Returns the pending transaction count of an address.
    async fn get_transaction_count(&self, address: Address) -> TransportResult<u64>;

    /// Executes a read-only call against the latest state.
    async fn call(&self, to: Address, input: Bytes) -> TransportResult<Bytes>;

    /// Estimates the gas of a call sent from `from`.
    async fn estimate_gas(&self, from: Address, call: &Call) -> TransportResult<u64>;

    /// Returns recommended EIP-1559 fees.
    async fn estimate_fees(&self) -> TransportResult<Eip1559Estimation>;

    /// Returns the timestamp of the latest block.
    async fn block_timestamp(&self) -> TransportResult<u64>;

    /// Submits an EIP-2718 encoded signed transaction.
    async fn send_raw_transaction(&self, encoded: Bytes) -> TransportResult<B256>;

    /// Returns the receipt of a transaction, if it was mined.
    async fn get_transaction_receipt(&self, tx_hash: B256) -> TransportResult<Option<Receipt>>;
}

/// Typed contract reads on top of [`LedgerApi`].
pub trait LedgerExt: LedgerApi {
    /// Calls a view function and decodes its return value.
    fn read<C: SolCall + Send>(
        &self,
        to: Address,
        call: C,
    ) -> impl Future<Output = Result<C::Return, OperatorError>> + Send {
        async move {
            let output = self.call(to, call.abi_encode().into()).await?;
            Ok(C::abi_decode_returns(&output)?)
        }
    }
}

impl<T> LedgerExt for T where T: LedgerApi + ?Sized {}
