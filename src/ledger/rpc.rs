use super::{LedgerApi, Receipt};
use crate::{constants::RETRY_LAYER, types::Call};
use alloy::{
    eips::{BlockNumberOrTag, eip1559::Eip1559Estimation},
    network::ReceiptResponse,
    primitives::{Address, B256, Bytes, ChainId, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::client::ClientBuilder,
    transports::{TransportErrorKind, TransportResult},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// [`LedgerApi`] over a JSON-RPC endpoint.
///
/// Requests go through a retry-backoff transport layer and are additionally bounded by a
/// per-request timeout.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    provider: DynProvider,
    timeout: Duration,
}

impl RpcLedger {
    /// Connects to the given HTTP endpoint.
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        let client = ClientBuilder::default().layer(RETRY_LAYER).http(endpoint);
        Self { provider: ProviderBuilder::new().connect_client(client).erased(), timeout }
    }

    /// Wraps an existing provider.
    pub fn with_provider(provider: DynProvider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T>(
        &self,
        request: impl Future<Output = TransportResult<T>> + Send,
    ) -> TransportResult<T> {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| TransportErrorKind::custom_str("request timed out"))?
    }
}

#[async_trait]
impl LedgerApi for RpcLedger {
    async fn chain_id(&self) -> TransportResult<ChainId> {
        self.bounded(async { self.provider.get_chain_id().await }).await
    }

    async fn get_balance(&self, address: Address) -> TransportResult<U256> {
        self.bounded(async { self.provider.get_balance(address).await }).await
    }

    async fn get_transaction_count(&self, address: Address) -> TransportResult<u64> {
        self.bounded(async { self.provider.get_transaction_count(address).pending().await }).await
    }

    async fn call(&self, to: Address, input: Bytes) -> TransportResult<Bytes> {
        let request = Call { to, value: U256::ZERO, data: input }.into_request(Address::ZERO);
        self.bounded(async { self.provider.call(request).await }).await
    }

    async fn estimate_gas(&self, from: Address, call: &Call) -> TransportResult<u64> {
        let request = call.clone().into_request(from);
        self.bounded(async { self.provider.estimate_gas(request).await }).await
    }

    async fn estimate_fees(&self) -> TransportResult<Eip1559Estimation> {
        self.bounded(async { self.provider.estimate_eip1559_fees().await }).await
    }

    async fn block_timestamp(&self) -> TransportResult<u64> {
        let block = self
            .bounded(async { self.provider.get_block_by_number(BlockNumberOrTag::Latest).await })
            .await?
            .ok_or_else(|| TransportErrorKind::custom_str("latest block not found"))?;
        Ok(block.header.timestamp)
    }

    async fn send_raw_transaction(&self, encoded: Bytes) -> TransportResult<B256> {
        let pending =
            self.bounded(async { self.provider.send_raw_transaction(&encoded).await }).await?;
        trace!(tx_hash = %pending.tx_hash(), "submitted transaction");
        Ok(*pending.tx_hash())
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> TransportResult<Option<Receipt>> {
        let receipt =
            self.bounded(async { self.provider.get_transaction_receipt(tx_hash).await }).await?;
        Ok(receipt.map(|receipt| Receipt {
            tx_hash,
            status: receipt.status(),
            block_number: receipt.block_number().unwrap_or_default(),
            gas_used: receipt.gas_used(),
        }))
    }
}
