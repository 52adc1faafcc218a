//! Typed access to the service registry, its manager and token utility.

use crate::{
    constants::ETH_TOKEN_ADDRESS,
    error::{LifecycleError, OperatorError},
    ledger::{LedgerApi, LedgerExt},
    types::{
        AgentParams, Call, ChainContracts, IERC20, IServiceManager, IServiceRegistry,
        IServiceRegistryTokenUtility, OnChainState, U96,
    },
};
use alloy::primitives::{Address, B256, U256};
use eyre::eyre;
use std::sync::Arc;

/// Registry record of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Security deposit, in native currency.
    ///
    /// For token secured services this is a placeholder, see [`Registry::token_deposit`].
    pub security_deposit: U256,
    /// Multisig of the service, zero if it was never deployed.
    pub multisig: Address,
    /// Hash of the service configuration.
    pub config_hash: B256,
    /// Signature threshold of the multisig.
    pub threshold: u32,
    /// Total number of agent slots.
    pub max_agent_instances: u32,
    /// Number of registered agent instances.
    pub num_agent_instances: u32,
    /// Registry state.
    pub state: OnChainState,
    /// Agent ids of the service.
    pub agent_ids: Vec<u32>,
}

/// Deposit held by the token utility for a token secured service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDeposit {
    /// The bonding token.
    pub token: Address,
    /// Security deposit, in the bonding token.
    pub security_deposit: U256,
}

/// Parameters of a service mint or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceParams {
    /// Bonding token, [`ETH_TOKEN_ADDRESS`] for the native currency.
    pub token: Address,
    /// Hash of the service configuration.
    pub config_hash: B256,
    /// Agent id of every slot.
    pub agent_id: u32,
    /// Number of agent slots.
    pub num_slots: u32,
    /// Bond per agent instance.
    pub bond: U256,
    /// Signature threshold of the multisig.
    pub threshold: u32,
}

impl ServiceParams {
    fn agent_params(&self) -> Result<Vec<AgentParams>, LifecycleError> {
        let bond = U96::checked_from_uint(self.bond).ok_or(LifecycleError::BondOverflow(self.bond))?;
        Ok(vec![AgentParams { slots: self.num_slots, bond }])
    }
}

/// Registry reads and call builders for one chain.
#[derive(Debug, Clone)]
pub struct Registry {
    ledger: Arc<dyn LedgerApi>,
    contracts: ChainContracts,
}

impl Registry {
    /// Creates a new registry handle.
    pub fn new(ledger: Arc<dyn LedgerApi>, contracts: ChainContracts) -> Self {
        Self { ledger, contracts }
    }

    /// Contracts of the chain.
    pub fn contracts(&self) -> &ChainContracts {
        &self.contracts
    }

    /// Returns the registry record of a service.
    ///
    /// A service that was never minted reads as [`OnChainState::NonExistent`].
    pub async fn service_info(&self, service_id: U256) -> Result<ServiceInfo, OperatorError> {
        let record = self
            .ledger
            .read(
                self.contracts.service_registry,
                IServiceRegistry::getServiceCall { serviceId: service_id },
            )
            .await?;
        let state = OnChainState::try_from(record.state)
            .map_err(|state| eyre!("registry returned unknown state {state}"))?;

        Ok(ServiceInfo {
            security_deposit: U256::from(record.securityDeposit),
            multisig: record.multisig,
            config_hash: record.configHash,
            threshold: record.threshold,
            max_agent_instances: record.maxNumAgentInstances,
            num_agent_instances: record.numAgentInstances,
            state,
            agent_ids: record.agentIds,
        })
    }

    /// Returns the registered agent instances of a service.
    pub async fn agent_instances(&self, service_id: U256) -> Result<Vec<Address>, OperatorError> {
        Ok(self
            .ledger
            .read(
                self.contracts.service_registry,
                IServiceRegistry::getAgentInstancesCall { serviceId: service_id },
            )
            .await?
            .agentInstances)
    }

    /// Returns the owner of the service token.
    pub async fn owner_of(&self, service_id: U256) -> Result<Address, OperatorError> {
        self.ledger
            .read(self.contracts.service_registry, IServiceRegistry::ownerOfCall { id: service_id })
            .await
    }

    /// Number of minted services. Service ids are assigned sequentially starting at one.
    pub async fn total_supply(&self) -> Result<U256, OperatorError> {
        self.ledger
            .read(self.contracts.service_registry, IServiceRegistry::totalSupplyCall {})
            .await
    }

    /// Returns the token deposit of a service, `None` if it is secured with the native currency.
    pub async fn token_deposit(
        &self,
        service_id: U256,
    ) -> Result<Option<TokenDeposit>, OperatorError> {
        let deposit = self
            .ledger
            .read(
                self.contracts.service_registry_token_utility,
                IServiceRegistryTokenUtility::mapServiceIdTokenDepositCall {
                    serviceId: service_id,
                },
            )
            .await?;
        Ok((!deposit.token.is_zero()).then(|| TokenDeposit {
            token: deposit.token,
            security_deposit: U256::from(deposit.securityDeposit),
        }))
    }

    /// Returns the token bond of an agent id of a token secured service.
    pub async fn agent_bond(&self, service_id: U256, agent_id: u32) -> Result<U256, OperatorError> {
        self.ledger
            .read(
                self.contracts.service_registry_token_utility,
                IServiceRegistryTokenUtility::getAgentBondCall {
                    serviceId: service_id,
                    agentId: U256::from(agent_id),
                },
            )
            .await
    }

    /// Returns the balance of a bonding token, or the native balance for [`ETH_TOKEN_ADDRESS`].
    pub async fn token_balance(
        &self,
        token: Address,
        holder: Address,
    ) -> Result<U256, OperatorError> {
        if is_native(token) {
            return Ok(self.ledger.get_balance(holder).await?);
        }
        self.ledger.read(token, IERC20::balanceOfCall { account: holder }).await
    }

    /// Returns the allowance of the token utility over the `owner`'s bonding tokens.
    pub async fn token_utility_allowance(
        &self,
        token: Address,
        owner: Address,
    ) -> Result<U256, OperatorError> {
        self.ledger
            .read(
                token,
                IERC20::allowanceCall {
                    owner,
                    spender: self.contracts.service_registry_token_utility,
                },
            )
            .await
    }

    /// Call minting a service owned by `owner`.
    ///
    /// Fails if the bond does not fit the registry.
    pub fn create(&self, owner: Address, params: &ServiceParams) -> Result<Call, LifecycleError> {
        Ok(Call::contract(
            self.contracts.service_manager,
            IServiceManager::createCall {
                serviceOwner: owner,
                token: params.token,
                configHash: params.config_hash,
                agentIds: vec![params.agent_id],
                agentParams: params.agent_params()?,
                threshold: params.threshold,
            },
        ))
    }

    /// Call updating a service in `PRE_REGISTRATION`.
    pub fn update(
        &self,
        service_id: U256,
        params: &ServiceParams,
    ) -> Result<Call, LifecycleError> {
        Ok(Call::contract(
            self.contracts.service_manager,
            IServiceManager::updateCall {
                token: params.token,
                configHash: params.config_hash,
                agentIds: vec![params.agent_id],
                agentParams: params.agent_params()?,
                threshold: params.threshold,
                serviceId: service_id,
            },
        ))
    }

    /// Call approving the token utility to pull `amount` of a bonding token.
    pub fn approve_token_utility(&self, token: Address, amount: U256) -> Call {
        Call::contract(
            token,
            IERC20::approveCall { spender: self.contracts.service_registry_token_utility, amount },
        )
    }

    /// Call paying the security deposit.
    pub fn activate_registration(&self, service_id: U256, value: U256) -> Call {
        Call::contract(
            self.contracts.service_manager,
            IServiceManager::activateRegistrationCall { serviceId: service_id },
        )
        .with_value(value)
    }

    /// Call registering agent instances, all for `agent_id`.
    pub fn register_agents(
        &self,
        service_id: U256,
        instances: Vec<Address>,
        agent_id: u32,
        value: U256,
    ) -> Call {
        let agent_ids = vec![agent_id; instances.len()];
        Call::contract(
            self.contracts.service_manager,
            IServiceManager::registerAgentsCall {
                serviceId: service_id,
                agentInstances: instances,
                agentIds: agent_ids,
            },
        )
        .with_value(value)
    }

    /// Call deploying the service multisig through `implementation`.
    pub fn deploy(&self, service_id: U256, implementation: Address, data: Vec<u8>) -> Call {
        Call::contract(
            self.contracts.service_manager,
            IServiceManager::deployCall {
                serviceId: service_id,
                multisigImplementation: implementation,
                data: data.into(),
            },
        )
    }

    /// Call terminating the service.
    pub fn terminate(&self, service_id: U256) -> Call {
        Call::contract(
            self.contracts.service_manager,
            IServiceManager::terminateCall { serviceId: service_id },
        )
    }

    /// Call returning the operator bonds.
    pub fn unbond(&self, service_id: U256) -> Call {
        Call::contract(
            self.contracts.service_manager,
            IServiceManager::unbondCall { serviceId: service_id },
        )
    }
}

/// Whether `token` denotes the native currency.
pub fn is_native(token: Address) -> bool {
    token.is_zero() || token == ETH_TOKEN_ADDRESS
}
