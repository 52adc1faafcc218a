use crate::{
    chains::ChainContext,
    error::{LifecycleError, OperatorError},
    ledger::Receipt,
    storage::{OperatorStorage, ServiceStore},
    types::Call,
};
use alloy::primitives::{Address, U256};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically tops up the agent instances and the multisig of a service from the controller
/// EOA.
///
/// Thresholds come from the service's fund requirements. An address below its threshold is
/// topped up to exactly the threshold.
#[derive(Debug, Clone)]
pub struct FundingJob {
    chain: ChainContext,
    storage: OperatorStorage,
    hash: String,
    interval: Duration,
}

impl FundingJob {
    /// Creates a job funding the service `hash` on `chain`.
    pub fn new(
        chain: ChainContext,
        storage: OperatorStorage,
        hash: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self { chain, storage, hash: hash.into(), interval }
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.fund_once() => {
                    if let Err(err) = result {
                        warn!(
                            service = %self.hash,
                            chain_id = self.chain.chain_id,
                            %err,
                            "funding failed"
                        );
                    }
                }
            }
        }
        debug!(service = %self.hash, "funding job stopped");
    }

    /// Tops up every address below its threshold and returns the receipts of the transfers.
    pub async fn fund_once(&self) -> Result<Vec<Receipt>, OperatorError> {
        let service = self.storage.read_service(&self.hash).await?;
        let data = &service
            .chain_configs
            .get(&self.chain.chain_id)
            .ok_or_else(|| LifecycleError::MissingChainConfig {
                hash: self.hash.clone(),
                chain_id: self.chain.chain_id,
            })?
            .chain_data;
        let requirements = &data.user_params.fund_requirements;

        let mut targets: Vec<(Address, U256)> = service
            .agent_addresses()
            .into_iter()
            .map(|address| (address, requirements.agent))
            .collect();
        if !data.multisig.is_zero() {
            targets.push((data.multisig, requirements.safe));
        }

        let mut receipts = Vec::new();
        for (address, threshold) in targets {
            if threshold.is_zero() {
                continue;
            }
            let balance = self.chain.ledger.get_balance(address).await?;
            if balance >= threshold {
                continue;
            }

            let amount = threshold - balance;
            info!(service = %self.hash, %address, %balance, %amount, "topping up");
            let call = Call::transfer(address, amount);
            receipts.push(
                self.chain
                    .settler
                    .settle(|| {
                        let call = call.clone();
                        async move { Ok(call) }
                    })
                    .await?,
            );
        }
        Ok(receipts)
    }
}
