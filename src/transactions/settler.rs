use super::{SettlerMetrics, bump_fees};
use crate::{
    constants::{
        DEFAULT_SETTLE_RETRIES, DEFAULT_SETTLE_SLEEP, DEFAULT_SETTLE_TIMEOUT, TX_GAS_BUFFER,
    },
    error::{OperatorError, SettleError},
    ledger::{LedgerApi, Receipt, TransportErrExt},
    signers::DynSigner,
    types::Call,
};
use alloy::{
    consensus::{TxEip1559, TypedTransaction},
    eips::{Encodable2718, eip1559::Eip1559Estimation},
    network::{Ethereum, EthereumWallet, NetworkWallet},
    primitives::{Address, B256, Bytes, ChainId, TxKind},
    transports::TransportError,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Budget of a [`Settler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlerConfig {
    /// Total time a settlement may take.
    #[serde(with = "crate::serde::duration")]
    pub timeout: Duration,
    /// Maximum number of submissions.
    pub max_retries: u32,
    /// Pause between receipt polls and after transient failures.
    #[serde(with = "crate::serde::duration")]
    pub sleep_interval: Duration,
    /// Time a submitted transaction may stay unmined before it is replaced with higher fees.
    #[serde(with = "crate::serde::duration")]
    pub receipt_timeout: Duration,
    /// Upper bound for `max_fee_per_gas`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u128>,
}

impl Default for SettlerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SETTLE_TIMEOUT,
            max_retries: DEFAULT_SETTLE_RETRIES,
            sleep_interval: DEFAULT_SETTLE_SLEEP,
            receipt_timeout: Duration::from_secs(60),
            max_fee_per_gas: None,
        }
    }
}

impl SettlerConfig {
    /// Sets the total timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of submissions.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the sleep interval.
    pub fn with_sleep_interval(mut self, sleep_interval: Duration) -> Self {
        self.sleep_interval = sleep_interval;
        self
    }

    /// Sets the time after which an unmined transaction is replaced.
    pub fn with_receipt_timeout(mut self, receipt_timeout: Duration) -> Self {
        self.receipt_timeout = receipt_timeout;
        self
    }
}

/// A transaction prepared for signing.
#[derive(Debug, Clone)]
struct Prepared {
    call: Call,
    nonce: u64,
    gas_limit: u64,
    fees: Eip1559Estimation,
}

/// Failure to prepare a transaction.
enum PrepareError {
    /// Retry after sleeping.
    Transient(TransportError),
    /// Give up.
    Fatal(OperatorError),
}

impl From<OperatorError> for PrepareError {
    fn from(err: OperatorError) -> Self {
        match err {
            OperatorError::RpcError(err) if err.is_permanent() => {
                Self::Fatal(SettleError::ChainInteraction(err.to_string()).into())
            }
            OperatorError::RpcError(err) => Self::Transient(err),
            err => Self::Fatal(err),
        }
    }
}

impl From<TransportError> for PrepareError {
    fn from(err: TransportError) -> Self {
        OperatorError::RpcError(err).into()
    }
}

/// Signs, submits and confirms transactions of one sender on one chain.
///
/// The transaction is produced by a builder closure passed to [`Settler::settle`]. The closure is
/// invoked again whenever the transaction has to be rebuilt, e.g. after its nonce went stale, so
/// it must read any chain state it depends on itself.
#[derive(Clone)]
pub struct Settler {
    ledger: Arc<dyn LedgerApi>,
    wallet: EthereumWallet,
    address: Address,
    chain_id: ChainId,
    config: SettlerConfig,
    metrics: SettlerMetrics,
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Settler {
    /// Creates a settler sending from `signer`.
    pub fn new(
        ledger: Arc<dyn LedgerApi>,
        signer: DynSigner,
        chain_id: ChainId,
        config: SettlerConfig,
    ) -> Self {
        let address = signer.address();
        Self {
            ledger,
            wallet: EthereumWallet::new(signer.0),
            address,
            chain_id,
            config,
            metrics: SettlerMetrics::new_with_labels(&[("chain_id", chain_id.to_string())]),
        }
    }

    /// The sender of all transactions.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The chain transactions are sent to.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The ledger transactions are sent to.
    pub fn ledger(&self) -> &dyn LedgerApi {
        self.ledger.as_ref()
    }

    /// The settlement budget.
    pub fn config(&self) -> &SettlerConfig {
        &self.config
    }

    /// Settles the transaction produced by `build`.
    ///
    /// Returns the receipt once the transaction was mined successfully. A mined but reverted
    /// transaction fails with [`SettleError::Reverted`], an exhausted budget with
    /// [`SettleError::Timeout`], or [`SettleError::Unreachable`] if the ledger never answered.
    pub async fn settle<F, Fut>(&self, build: F) -> Result<Receipt, OperatorError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Call, OperatorError>> + Send,
    {
        let result = self.settle_inner(build).await;
        match &result {
            Ok(receipt) => {
                self.metrics.confirmed.increment(1);
                info!(
                    chain_id = self.chain_id,
                    tx_hash = %receipt.tx_hash,
                    block = receipt.block_number,
                    "transaction confirmed"
                );
            }
            Err(err) => {
                self.metrics.failed.increment(1);
                warn!(chain_id = self.chain_id, %err, "transaction failed to settle");
            }
        }
        result
    }

    async fn settle_inner<F, Fut>(&self, mut build: F) -> Result<Receipt, OperatorError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Call, OperatorError>> + Send,
    {
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        let mut attempts = 0;
        // Hashes of every transaction the node accepted, any of them may be mined.
        let mut sent: Vec<B256> = Vec::new();
        let mut pending_since: Option<Instant> = None;
        let mut current: Option<Prepared> = None;
        let mut reprice = false;
        let mut last_error: Option<TransportError> = None;

        while Instant::now() < deadline {
            if !sent.is_empty() {
                match self.find_receipt(&sent).await {
                    Ok(Some(receipt)) => return self.check_receipt(receipt),
                    Ok(None) => {}
                    Err(err) => {
                        debug!(%err, "failed to fetch receipt");
                        last_error = Some(err);
                    }
                }

                if let Some(since) = pending_since {
                    if since.elapsed() < self.config.receipt_timeout {
                        tokio::time::sleep(self.config.sleep_interval).await;
                        continue;
                    }
                    warn!(tx_hash = ?sent.last(), "transaction not mined in time, replacing it");
                    pending_since = None;
                    reprice = true;
                }
            }

            if attempts >= self.config.max_retries {
                break;
            }
            attempts += 1;

            let prepared = match current.take() {
                Some(prepared) if reprice => {
                    reprice = false;
                    self.metrics.repriced.increment(1);
                    self.reprice(prepared).await?
                }
                Some(prepared) => prepared,
                None => match self.prepare(&mut build).await {
                    Ok(prepared) => prepared,
                    Err(PrepareError::Transient(err)) => {
                        debug!(%err, attempts, "failed to prepare transaction, retrying");
                        last_error = Some(err);
                        tokio::time::sleep(self.config.sleep_interval).await;
                        continue;
                    }
                    Err(PrepareError::Fatal(err)) => return Err(err),
                },
            };

            let (tx_hash, encoded) = self.sign(&prepared).await?;
            debug!(
                %tx_hash,
                nonce = prepared.nonce,
                max_fee_per_gas = prepared.fees.max_fee_per_gas,
                attempts,
                "submitting transaction"
            );

            match self.ledger.send_raw_transaction(encoded).await {
                Ok(_) => {
                    self.metrics.sent.increment(1);
                    sent.push(tx_hash);
                    pending_since = Some(Instant::now());
                    current = Some(prepared);
                }
                Err(err) if err.is_already_known() => {
                    debug!(%tx_hash, "transaction already known");
                    if !sent.contains(&tx_hash) {
                        sent.push(tx_hash);
                    }
                    pending_since.get_or_insert_with(Instant::now);
                    current = Some(prepared);
                }
                Err(err) if err.is_underpriced() => {
                    debug!(%tx_hash, %err, "transaction underpriced, repricing");
                    current = Some(prepared);
                    reprice = true;
                }
                Err(err) if err.is_stale_nonce() => {
                    debug!(%tx_hash, %err, "stale nonce, rebuilding");
                    // A previous submission may have been mined with this nonce.
                    if let Ok(Some(receipt)) = self.find_receipt(&sent).await {
                        return self.check_receipt(receipt);
                    }
                    pending_since = None;
                }
                Err(err) if err.is_permanent() => {
                    return Err(SettleError::ChainInteraction(err.to_string()).into());
                }
                Err(err) => {
                    debug!(%tx_hash, %err, "failed to submit transaction, retrying");
                    last_error = Some(err);
                    current = Some(prepared);
                    tokio::time::sleep(self.config.sleep_interval).await;
                }
            }
        }

        match last_error {
            Some(err) if sent.is_empty() && err.as_error_resp().is_none() => {
                Err(SettleError::Unreachable(err).into())
            }
            _ => Err(SettleError::Timeout { attempts, elapsed: start.elapsed() }.into()),
        }
    }

    /// Builds the call and fills gas, fees and nonce. The nonce is fetched last.
    async fn prepare<F, Fut>(&self, build: &mut F) -> Result<Prepared, PrepareError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Call, OperatorError>> + Send,
    {
        let call = build().await?;
        let gas_limit = self.ledger.estimate_gas(self.address, &call).await? + TX_GAS_BUFFER;
        let fees = self.ledger.estimate_fees().await?;
        let nonce = self.ledger.get_transaction_count(self.address).await?;
        Ok(Prepared { call, nonce, gas_limit, fees })
    }

    /// Raises the fees of a transaction that was not accepted or not mined.
    async fn reprice(&self, mut prepared: Prepared) -> Result<Prepared, OperatorError> {
        let latest = self.ledger.estimate_fees().await.unwrap_or(prepared.fees);
        prepared.fees = bump_fees(prepared.fees, latest, self.config.max_fee_per_gas)
            .map_err(|err| SettleError::ChainInteraction(err.to_string()))?;
        Ok(prepared)
    }

    async fn sign(&self, prepared: &Prepared) -> Result<(B256, Bytes), OperatorError> {
        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce: prepared.nonce,
            gas_limit: prepared.gas_limit,
            max_fee_per_gas: prepared.fees.max_fee_per_gas,
            max_priority_fee_per_gas: prepared.fees.max_priority_fee_per_gas,
            to: TxKind::Call(prepared.call.to),
            value: prepared.call.value,
            access_list: Default::default(),
            input: prepared.call.data.clone(),
        };
        let signed = NetworkWallet::<Ethereum>::sign_transaction_from(
            &self.wallet,
            self.address,
            TypedTransaction::Eip1559(tx),
        )
        .await?;
        Ok((*signed.tx_hash(), signed.encoded_2718().into()))
    }

    /// Returns the first receipt found among `hashes`, newest first.
    async fn find_receipt(&self, hashes: &[B256]) -> Result<Option<Receipt>, TransportError> {
        for tx_hash in hashes.iter().rev() {
            if let Some(receipt) = self.ledger.get_transaction_receipt(*tx_hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    fn check_receipt(&self, receipt: Receipt) -> Result<Receipt, OperatorError> {
        if receipt.status {
            Ok(receipt)
        } else {
            Err(SettleError::Reverted(receipt.tx_hash).into())
        }
    }
}
