//! Staking contract reads and the stake / unstake operations.

use crate::{
    error::{OperatorError, StakingError},
    ledger::{LedgerApi, LedgerExt, Receipt},
    transactions::CallExecutor,
    types::{Call, IServiceRegistry, IStaking, StakingState},
};
use alloy::primitives::{Address, U256};
use eyre::eyre;
use std::sync::Arc;
use tokio::try_join;
use tracing::{info, instrument};

/// Static parameters and current budget of a staking contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakingParams {
    /// Agent ids a staked service must use.
    pub agent_ids: Vec<u32>,
    /// Registry the contract accepts services from.
    pub service_registry: Address,
    /// Bonding token a staked service must be secured with.
    pub staking_token: Address,
    /// Activity checker of the contract.
    pub activity_checker: Address,
    /// Minimum security deposit of a staked service.
    pub min_staking_deposit: U256,
    /// Minimum staking duration, in seconds.
    pub min_staking_duration: u64,
    /// Maximum number of staked services.
    pub max_num_services: u64,
    /// Rewards left in the contract.
    pub available_rewards: U256,
}

/// Staking record of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakedServiceInfo {
    /// Multisig of the service at stake time.
    pub multisig: Address,
    /// Owner the service returns to on unstake.
    pub owner: Address,
    /// Timestamp the service was staked at.
    pub ts_start: u64,
}

/// Reads and writes of staking contracts on one chain.
#[derive(Debug, Clone)]
pub struct StakingManager {
    ledger: Arc<dyn LedgerApi>,
    service_registry: Address,
}

impl StakingManager {
    /// Creates a new manager for services of `service_registry`.
    pub fn new(ledger: Arc<dyn LedgerApi>, service_registry: Address) -> Self {
        Self { ledger, service_registry }
    }

    /// Staking state of a service in `contract`.
    pub async fn status(
        &self,
        service_id: U256,
        contract: Address,
    ) -> Result<StakingState, OperatorError> {
        let state = self
            .ledger
            .read(contract, IStaking::getStakingStateCall { serviceId: service_id })
            .await?;
        Ok(StakingState::try_from(state)
            .map_err(|state| eyre!("staking contract returned unknown state {state}"))?)
    }

    /// Number of services that can still be staked.
    pub async fn slots_available(&self, contract: Address) -> Result<u64, OperatorError> {
        let (max, staked) = try_join!(
            self.ledger.read(contract, IStaking::maxNumServicesCall {}),
            self.ledger.read(contract, IStaking::getServiceIdsCall {}),
        )?;
        Ok(max.saturating_to::<u64>().saturating_sub(staked.len() as u64))
    }

    /// Rewards left in the contract.
    pub async fn available_rewards(&self, contract: Address) -> Result<U256, OperatorError> {
        self.ledger.read(contract, IStaking::availableRewardsCall {}).await
    }

    /// Minimum security deposit of a staked service.
    pub async fn min_staking_deposit(&self, contract: Address) -> Result<U256, OperatorError> {
        self.ledger.read(contract, IStaking::minStakingDepositCall {}).await
    }

    /// Minimum staking duration in seconds.
    pub async fn min_staking_duration(&self, contract: Address) -> Result<u64, OperatorError> {
        Ok(self.ledger.read(contract, IStaking::minStakingDurationCall {}).await?.saturating_to())
    }

    /// Agent ids a staked service must use.
    pub async fn agent_ids(&self, contract: Address) -> Result<Vec<u32>, OperatorError> {
        let ids = self.ledger.read(contract, IStaking::getAgentIdsCall {}).await?;
        Ok(ids.into_iter().map(|id| id.saturating_to()).collect())
    }

    /// Registry the contract accepts services from.
    pub async fn service_registry(&self, contract: Address) -> Result<Address, OperatorError> {
        self.ledger.read(contract, IStaking::serviceRegistryCall {}).await
    }

    /// Bonding token a staked service must be secured with.
    pub async fn staking_token(&self, contract: Address) -> Result<Address, OperatorError> {
        self.ledger.read(contract, IStaking::stakingTokenCall {}).await
    }

    /// Activity checker of the contract.
    pub async fn activity_checker(&self, contract: Address) -> Result<Address, OperatorError> {
        self.ledger.read(contract, IStaking::activityCheckerCall {}).await
    }

    /// Staking record of a service.
    pub async fn service_info(
        &self,
        service_id: U256,
        contract: Address,
    ) -> Result<StakedServiceInfo, OperatorError> {
        let info = self
            .ledger
            .read(contract, IStaking::getServiceInfoCall { serviceId: service_id })
            .await?;
        Ok(StakedServiceInfo {
            multisig: info.multisig,
            owner: info.owner,
            ts_start: info.tsStart.saturating_to(),
        })
    }

    /// All parameters of a staking contract.
    pub async fn staking_params(&self, contract: Address) -> Result<StakingParams, OperatorError> {
        let (agent_ids, service_registry, staking_token, activity_checker) = try_join!(
            self.agent_ids(contract),
            self.service_registry(contract),
            self.staking_token(contract),
            self.activity_checker(contract),
        )?;
        let (min_staking_deposit, min_staking_duration, max_num_services, available_rewards) =
            try_join!(
                self.min_staking_deposit(contract),
                self.min_staking_duration(contract),
                self.ledger.read(contract, IStaking::maxNumServicesCall {}),
                self.available_rewards(contract),
            )?;

        Ok(StakingParams {
            agent_ids,
            service_registry,
            staking_token,
            activity_checker,
            min_staking_deposit,
            min_staking_duration,
            max_num_services: max_num_services.saturating_to(),
            available_rewards,
        })
    }

    /// Checks that the service can be staked in `contract` without sending anything.
    pub async fn check_stake(
        &self,
        service_id: U256,
        contract: Address,
    ) -> Result<(), OperatorError> {
        let state = self.status(service_id, contract).await?;
        if state != StakingState::Unstaked {
            return Err(StakingError::NotUnstaked { service_id, contract, state }.into());
        }
        if self.slots_available(contract).await? == 0 {
            return Err(StakingError::NoSlots(contract).into());
        }
        if self.available_rewards(contract).await?.is_zero() {
            return Err(StakingError::NoRewards(contract).into());
        }
        Ok(())
    }

    /// Checks that the service can be unstaked from `contract` now.
    ///
    /// Unstaking is refused while rewards are available and the minimum staking duration,
    /// measured in chain time, has not elapsed.
    pub async fn check_unstake(
        &self,
        service_id: U256,
        contract: Address,
    ) -> Result<(), OperatorError> {
        if !self.status(service_id, contract).await?.is_held() {
            return Err(StakingError::NotStaked { service_id, contract }.into());
        }

        let (info, min_duration, rewards, now) = try_join!(
            self.service_info(service_id, contract),
            self.min_staking_duration(contract),
            self.available_rewards(contract),
            async { self.ledger.block_timestamp().await.map_err(OperatorError::from) },
        )?;
        let staked_for = now.saturating_sub(info.ts_start);
        if !rewards.is_zero() && staked_for < min_duration {
            return Err(StakingError::Cooldown {
                service_id,
                contract,
                staked_for,
                min_duration,
                remaining: min_duration - staked_for,
            }
            .into());
        }
        Ok(())
    }

    /// Whether the service can be unstaked from `contract` now.
    pub async fn can_unstake(
        &self,
        service_id: U256,
        contract: Address,
    ) -> Result<bool, OperatorError> {
        match self.check_unstake(service_id, contract).await {
            Ok(()) => Ok(true),
            Err(OperatorError::Staking(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Calls staking the service: approve the service token to the contract, then stake.
    pub fn stake_calls(&self, service_id: U256, contract: Address) -> Vec<Call> {
        vec![
            Call::contract(
                self.service_registry,
                IServiceRegistry::approveCall { spender: contract, id: service_id },
            ),
            Call::contract(contract, IStaking::stakeCall { serviceId: service_id }),
        ]
    }

    /// Stakes the service in `contract`.
    ///
    /// Preconditions are checked before any transaction is sent.
    #[instrument(skip(self, executor), fields(%service_id, %contract))]
    pub async fn stake(
        &self,
        executor: &dyn CallExecutor,
        service_id: U256,
        contract: Address,
    ) -> Result<Vec<Receipt>, OperatorError> {
        self.check_stake(service_id, contract).await?;
        let receipts = executor.execute(self.stake_calls(service_id, contract)).await?;
        info!("service staked");
        Ok(receipts)
    }

    /// Unstakes the service from `contract`.
    #[instrument(skip(self, executor), fields(%service_id, %contract))]
    pub async fn unstake(
        &self,
        executor: &dyn CallExecutor,
        service_id: U256,
        contract: Address,
    ) -> Result<Vec<Receipt>, OperatorError> {
        self.check_unstake(service_id, contract).await?;
        let receipts = executor
            .execute(vec![Call::contract(
                contract,
                IStaking::unstakeCall { serviceId: service_id },
            )])
            .await?;
        info!("service unstaked");
        Ok(receipts)
    }
}
