//! Contract semantics of the simulated chain.

use crate::{
    constants::{ETH_TOKEN_ADDRESS, SENTINEL_OWNERS},
    safe::{SafeOperation, SafeTx, decode_multisend, safe_tx_hash},
    types::{
        AgentParams, ChainContracts, IERC20, IMultiSend, ISafe, IServiceManager, IServiceRegistry,
        IServiceRegistryTokenUtility, IStaking, OnChainState, ServiceRecord, StakingServiceInfo,
        U96,
    },
};
use alloy::{
    primitives::{Address, B256, Bytes, ChainId, Signature, U256, keccak256},
    sol_types::{SolCall, SolInterface},
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Revert reason of a failed execution.
pub(super) type Revert = String;

type ExecResult = Result<Bytes, Revert>;

fn revert<T>(reason: impl Into<String>) -> Result<T, Revert> {
    Err(reason.into())
}

fn ensure(condition: bool, reason: &str) -> Result<(), Revert> {
    if condition { Ok(()) } else { revert(reason) }
}

fn returns<C: SolCall>(ret: &C::Return) -> ExecResult {
    Ok(C::abi_encode_returns(ret).into())
}

/// The registry keeps the largest agent bond as the security deposit.
fn max_bond(agent_params: &[AgentParams]) -> U256 {
    agent_params.iter().map(|params| U256::from(params.bond)).max().unwrap_or_default()
}

/// Parameters of a simulated staking contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakingProgramParams {
    /// Maximum number of staked services.
    pub max_num_services: u64,
    /// Minimum security deposit of a staked service.
    pub min_staking_deposit: U256,
    /// Minimum time a service stays staked while rewards are available, in seconds.
    pub min_staking_duration: u64,
    /// Rewards left in the contract.
    pub available_rewards: U256,
    /// Agent ids a staked service must use.
    pub agent_ids: Vec<u32>,
    /// Bonding token a staked service must be secured with.
    pub staking_token: Address,
    /// Activity checker of the contract.
    pub activity_checker: Address,
}

#[derive(Debug, Clone)]
struct Instance {
    address: Address,
    agent_id: u32,
    operator: Address,
}

#[derive(Debug, Clone)]
struct ServiceEntry {
    owner: Address,
    approved: Address,
    token: Address,
    security_deposit: U256,
    config_hash: B256,
    threshold: u32,
    agent_ids: Vec<u32>,
    agent_params: Vec<AgentParams>,
    state: OnChainState,
    multisig: Address,
    instances: Vec<Instance>,
}

impl ServiceEntry {
    fn is_token_secured(&self) -> bool {
        self.token != ETH_TOKEN_ADDRESS && !self.token.is_zero()
    }

    fn max_instances(&self) -> u32 {
        self.agent_params.iter().map(|params| params.slots).sum()
    }

    fn agent_params(&self, agent_id: u32) -> Option<&AgentParams> {
        let idx = self.agent_ids.iter().position(|id| *id == agent_id)?;
        self.agent_params.get(idx)
    }

    fn bond(&self, agent_id: u32) -> Option<U256> {
        self.agent_params(agent_id).map(|params| U256::from(params.bond))
    }

    /// Native value the registry holds per deposit or bond.
    fn native_amount(&self, amount: U256) -> U256 {
        if self.is_token_secured() { U256::from(1) } else { amount }
    }
}

#[derive(Debug, Clone)]
struct StakeEntry {
    owner: Address,
    multisig: Address,
    ts_start: u64,
    evicted: bool,
}

#[derive(Debug, Clone)]
struct StakingContract {
    params: StakingProgramParams,
    services: BTreeMap<U256, StakeEntry>,
}

impl StakingContract {
    fn active_ids(&self) -> Vec<U256> {
        self.services.iter().filter(|(_, entry)| !entry.evicted).map(|(id, _)| *id).collect()
    }
}

#[derive(Debug, Clone)]
struct SafeAccount {
    owners: Vec<Address>,
    threshold: u64,
    nonce: U256,
    approved: HashSet<(Address, B256)>,
}

#[derive(Debug, Clone, Default)]
struct Erc20 {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

/// World state of the simulated chain.
#[derive(Debug, Clone)]
pub(super) struct ChainState {
    pub(super) chain_id: ChainId,
    pub(super) contracts: ChainContracts,
    pub(super) timestamp: u64,
    pub(super) block_number: u64,
    pub(super) nonces: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    services: BTreeMap<U256, ServiceEntry>,
    tokens: HashMap<Address, Erc20>,
    staking: HashMap<Address, StakingContract>,
    safes: HashMap<Address, SafeAccount>,
    created: u64,
}

impl ChainState {
    pub(super) fn new(chain_id: ChainId, contracts: ChainContracts) -> Self {
        Self {
            chain_id,
            contracts,
            timestamp: 1_700_000_000,
            block_number: 0,
            nonces: HashMap::new(),
            balances: HashMap::new(),
            services: BTreeMap::new(),
            tokens: HashMap::new(),
            staking: HashMap::new(),
            safes: HashMap::new(),
            created: 0,
        }
    }

    pub(super) fn balance(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or_default()
    }

    pub(super) fn fund(&mut self, address: Address, amount: U256) {
        *self.balances.entry(address).or_default() += amount;
    }

    pub(super) fn add_erc20(&mut self, token: Address) {
        self.tokens.entry(token).or_default();
    }

    pub(super) fn mint_token(&mut self, token: Address, to: Address, amount: U256) {
        *self.tokens.entry(token).or_default().balances.entry(to).or_default() += amount;
    }

    pub(super) fn token_balance(&self, token: Address, holder: Address) -> U256 {
        self.tokens
            .get(&token)
            .and_then(|erc20| erc20.balances.get(&holder).copied())
            .unwrap_or_default()
    }

    pub(super) fn add_staking_program(&mut self, address: Address, params: StakingProgramParams) {
        self.staking.insert(address, StakingContract { params, services: BTreeMap::new() });
    }

    pub(super) fn set_available_rewards(&mut self, contract: Address, rewards: U256) {
        if let Some(staking) = self.staking.get_mut(&contract) {
            staking.params.available_rewards = rewards;
        }
    }

    pub(super) fn evict(&mut self, contract: Address, service_id: U256) {
        if let Some(entry) = self
            .staking
            .get_mut(&contract)
            .and_then(|staking| staking.services.get_mut(&service_id))
        {
            entry.evicted = true;
        }
    }

    pub(super) fn set_service_state(&mut self, service_id: U256, state: OnChainState) {
        if let Some(service) = self.services.get_mut(&service_id) {
            service.state = state;
        }
    }

    pub(super) fn deploy_safe(&mut self, owners: Vec<Address>, threshold: u64) -> Address {
        let address = self.next_address("safe");
        self.safes.insert(
            address,
            SafeAccount { owners, threshold, nonce: U256::ZERO, approved: HashSet::new() },
        );
        address
    }

    fn next_address(&mut self, tag: &str) -> Address {
        self.created += 1;
        let mut seed = tag.as_bytes().to_vec();
        seed.extend_from_slice(&self.created.to_be_bytes());
        Address::from_word(keccak256(seed))
    }

    fn transfer_native(&mut self, from: Address, to: Address, value: U256) -> Result<(), Revert> {
        if value.is_zero() {
            return Ok(());
        }
        let balance = self.balance(from);
        ensure(balance >= value, "insufficient balance")?;
        self.balances.insert(from, balance - value);
        self.fund(to, value);
        Ok(())
    }

    fn transfer_token(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), Revert> {
        let erc20 = self.tokens.get_mut(&token).ok_or_else(|| "unknown token".to_string())?;
        let balance = erc20.balances.get(&from).copied().unwrap_or_default();
        ensure(balance >= amount, "ERC20: transfer amount exceeds balance")?;
        erc20.balances.insert(from, balance - amount);
        *erc20.balances.entry(to).or_default() += amount;
        Ok(())
    }

    /// Moves `amount` of `token` from `owner` to `spender`'s custody using its allowance.
    fn pull_token(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), Revert> {
        let erc20 = self.tokens.get_mut(&token).ok_or_else(|| "unknown token".to_string())?;
        let allowance = erc20.allowances.get(&(owner, spender)).copied().unwrap_or_default();
        ensure(allowance >= amount, "ERC20: insufficient allowance")?;
        erc20.allowances.insert((owner, spender), allowance - amount);
        self.transfer_token(token, owner, spender, amount)
    }

    /// Executes a call and returns its output.
    pub(super) fn execute(
        &mut self,
        from: Address,
        to: Address,
        value: U256,
        data: &[u8],
    ) -> ExecResult {
        self.transfer_native(from, to, value)?;

        if to == self.contracts.service_manager {
            self.service_manager(from, value, data)
        } else if to == self.contracts.service_registry {
            self.service_registry(from, data)
        } else if to == self.contracts.service_registry_token_utility {
            self.token_utility(data)
        } else if self.staking.contains_key(&to) {
            self.staking_contract(to, from, data)
        } else if self.safes.contains_key(&to) {
            self.safe(to, from, data)
        } else if self.tokens.contains_key(&to) {
            self.erc20(to, from, data)
        } else if to == self.contracts.multisend {
            revert("multi-send must be delegate called")
        } else {
            Ok(Bytes::new())
        }
    }

    fn service(&self, id: U256) -> Result<&ServiceEntry, Revert> {
        self.services.get(&id).ok_or_else(|| format!("service {id} does not exist"))
    }

    fn service_mut(&mut self, id: U256) -> Result<&mut ServiceEntry, Revert> {
        self.services.get_mut(&id).ok_or_else(|| format!("service {id} does not exist"))
    }

    fn check_service_params(
        &self,
        token: Address,
        agent_ids: &[u32],
        agent_params: &[AgentParams],
        threshold: u32,
    ) -> Result<(), Revert> {
        ensure(
            !agent_ids.is_empty() && agent_ids.len() == agent_params.len(),
            "wrong array length",
        )?;
        ensure(
            agent_params.iter().all(|params| params.slots > 0 && params.bond > U96::ZERO),
            "zero slots or bond",
        )?;
        let slots: u32 = agent_params.iter().map(|params| params.slots).sum();
        ensure(threshold > 0 && threshold <= slots, "wrong threshold")?;
        ensure(
            token == ETH_TOKEN_ADDRESS || self.tokens.contains_key(&token),
            "token not supported",
        )
    }

    fn service_manager(&mut self, from: Address, value: U256, data: &[u8]) -> ExecResult {
        use IServiceManager::IServiceManagerCalls as Calls;

        let manager = self.contracts.service_manager;
        match Calls::abi_decode(data).map_err(|_| "unknown selector".to_string())? {
            Calls::create(call) => {
                ensure(!call.serviceOwner.is_zero(), "zero owner")?;
                self.check_service_params(
                    call.token,
                    &call.agentIds,
                    &call.agentParams,
                    call.threshold,
                )?;
                let id = U256::from(self.services.len() + 1);
                let security_deposit = max_bond(&call.agentParams);
                self.services.insert(
                    id,
                    ServiceEntry {
                        owner: call.serviceOwner,
                        approved: Address::ZERO,
                        token: call.token,
                        security_deposit,
                        config_hash: call.configHash,
                        threshold: call.threshold,
                        agent_ids: call.agentIds,
                        agent_params: call.agentParams,
                        state: OnChainState::PreRegistration,
                        multisig: Address::ZERO,
                        instances: Vec::new(),
                    },
                );
                returns::<IServiceManager::createCall>(&id)
            }
            Calls::update(call) => {
                self.check_service_params(
                    call.token,
                    &call.agentIds,
                    &call.agentParams,
                    call.threshold,
                )?;
                let service = self.service_mut(call.serviceId)?;
                ensure(service.owner == from, "owner only")?;
                ensure(service.state == OnChainState::PreRegistration, "wrong service state")?;
                service.token = call.token;
                service.security_deposit = max_bond(&call.agentParams);
                service.config_hash = call.configHash;
                service.threshold = call.threshold;
                service.agent_ids = call.agentIds;
                service.agent_params = call.agentParams;
                returns::<IServiceManager::updateCall>(&true)
            }
            Calls::activateRegistration(call) => {
                let service = self.service(call.serviceId)?;
                ensure(service.owner == from, "owner only")?;
                ensure(service.state == OnChainState::PreRegistration, "wrong service state")?;
                ensure(
                    value == service.native_amount(service.security_deposit),
                    "incorrect deposit",
                )?;
                if service.is_token_secured() {
                    let (token, deposit) = (service.token, service.security_deposit);
                    let utility = self.contracts.service_registry_token_utility;
                    self.pull_token(token, from, utility, deposit)?;
                }
                self.service_mut(call.serviceId)?.state = OnChainState::ActiveRegistration;
                returns::<IServiceManager::activateRegistrationCall>(&true)
            }
            Calls::registerAgents(call) => {
                let service = self.service(call.serviceId)?;
                ensure(service.state == OnChainState::ActiveRegistration, "wrong service state")?;
                ensure(
                    !call.agentInstances.is_empty()
                        && call.agentInstances.len() == call.agentIds.len(),
                    "wrong array length",
                )?;

                let mut total_bond = U256::ZERO;
                let mut total_native = U256::ZERO;
                let mut registered = service.instances.clone();
                for (instance, agent_id) in call.agentInstances.iter().zip(&call.agentIds) {
                    let params = service
                        .agent_params(*agent_id)
                        .ok_or_else(|| "wrong agent id".to_string())?;
                    let (bond, slots) = (U256::from(params.bond), params.slots);
                    ensure(*instance != from && !instance.is_zero(), "wrong instance")?;
                    ensure(
                        registered.iter().all(|existing| existing.address != *instance),
                        "instance already registered",
                    )?;
                    let taken =
                        registered.iter().filter(|existing| existing.agent_id == *agent_id).count();
                    ensure((taken as u32) < slots, "agent slots filled")?;
                    registered.push(Instance {
                        address: *instance,
                        agent_id: *agent_id,
                        operator: from,
                    });
                    total_bond += bond;
                    total_native += service.native_amount(bond);
                }
                ensure(value == total_native, "incorrect agent bond")?;

                let finished = registered.len() as u32 == service.max_instances();
                if service.is_token_secured() {
                    let token = service.token;
                    let utility = self.contracts.service_registry_token_utility;
                    self.pull_token(token, from, utility, total_bond)?;
                }
                let service = self.service_mut(call.serviceId)?;
                service.instances = registered;
                if finished {
                    service.state = OnChainState::FinishedRegistration;
                }
                returns::<IServiceManager::registerAgentsCall>(&true)
            }
            Calls::deploy(call) => {
                let service = self.service(call.serviceId)?.clone();
                ensure(service.owner == from, "owner only")?;
                ensure(service.state == OnChainState::FinishedRegistration, "wrong service state")?;
                let instances: Vec<Address> = service.instances.iter().map(|i| i.address).collect();

                let implementation = call.multisigImplementation;
                let multisig = if implementation == self.contracts.gnosis_safe_proxy_factory {
                    self.deploy_safe(instances, service.threshold as u64)
                } else if call.multisigImplementation
                    == self.contracts.gnosis_safe_same_address_multisig
                {
                    ensure(call.data.len() >= 20, "wrong data length")?;
                    let multisig = Address::from_slice(&call.data[..20]);
                    ensure(self.safes.contains_key(&multisig), "multisig does not exist")?;
                    if call.data.len() > 20 {
                        let implementation = self.contracts.gnosis_safe_same_address_multisig;
                        self.execute(implementation, multisig, U256::ZERO, &call.data[20..])?;
                    }
                    let safe = &self.safes[&multisig];
                    ensure(
                        safe.owners.len() == instances.len()
                            && instances.iter().all(|instance| safe.owners.contains(instance)),
                        "wrong multisig owners",
                    )?;
                    ensure(safe.threshold == service.threshold as u64, "wrong multisig threshold")?;
                    multisig
                } else {
                    return revert("unsupported multisig implementation");
                };

                let service = self.service_mut(call.serviceId)?;
                service.multisig = multisig;
                service.state = OnChainState::Deployed;
                returns::<IServiceManager::deployCall>(&multisig)
            }
            Calls::terminate(call) => {
                let service = self.service(call.serviceId)?.clone();
                ensure(service.owner == from, "owner only")?;
                ensure(service.state.is_terminable(), "wrong service state")?;
                self.transfer_native(
                    manager,
                    from,
                    service.native_amount(service.security_deposit),
                )?;
                if service.is_token_secured() {
                    let utility = self.contracts.service_registry_token_utility;
                    self.transfer_token(service.token, utility, from, service.security_deposit)?;
                }
                self.service_mut(call.serviceId)?.state = if service.instances.is_empty() {
                    OnChainState::PreRegistration
                } else {
                    OnChainState::TerminatedBonded
                };
                returns::<IServiceManager::terminateCall>(&IServiceManager::terminateReturn {
                    success: true,
                    refund: service.security_deposit,
                })
            }
            Calls::unbond(call) => {
                let service = self.service(call.serviceId)?.clone();
                ensure(service.state == OnChainState::TerminatedBonded, "wrong service state")?;
                let (unbonded, remaining): (Vec<_>, Vec<_>) =
                    service.instances.iter().cloned().partition(|i| i.operator == from);
                ensure(!unbonded.is_empty(), "operator has no instances")?;

                let mut refund = U256::ZERO;
                for instance in &unbonded {
                    let bond = service.bond(instance.agent_id).unwrap_or_default();
                    self.transfer_native(manager, from, service.native_amount(bond))?;
                    refund += bond;
                }
                if service.is_token_secured() {
                    let utility = self.contracts.service_registry_token_utility;
                    self.transfer_token(service.token, utility, from, refund)?;
                }

                let service = self.service_mut(call.serviceId)?;
                if remaining.is_empty() {
                    service.state = OnChainState::PreRegistration;
                }
                service.instances = remaining;
                returns::<IServiceManager::unbondCall>(&IServiceManager::unbondReturn {
                    success: true,
                    refund,
                })
            }
        }
    }

    fn service_registry(&mut self, from: Address, data: &[u8]) -> ExecResult {
        use IServiceRegistry::IServiceRegistryCalls as Calls;

        match Calls::abi_decode(data).map_err(|_| "unknown selector".to_string())? {
            Calls::getService(call) => {
                let record = self
                    .services
                    .get(&call.serviceId)
                    .map(|service| ServiceRecord {
                        securityDeposit: U96::saturating_from(
                            service.native_amount(service.security_deposit),
                        ),
                        multisig: service.multisig,
                        configHash: service.config_hash,
                        threshold: service.threshold,
                        maxNumAgentInstances: service.max_instances(),
                        numAgentInstances: service.instances.len() as u32,
                        state: service.state as u8,
                        agentIds: service.agent_ids.clone(),
                    })
                    .unwrap_or_default();
                returns::<IServiceRegistry::getServiceCall>(&record)
            }
            Calls::getAgentInstances(call) => {
                let instances = self
                    .services
                    .get(&call.serviceId)
                    .map(|service| service.instances.iter().map(|i| i.address).collect::<Vec<_>>())
                    .unwrap_or_default();
                returns::<IServiceRegistry::getAgentInstancesCall>(
                    &IServiceRegistry::getAgentInstancesReturn {
                        numAgentInstances: U256::from(instances.len()),
                        agentInstances: instances,
                    },
                )
            }
            Calls::ownerOf(call) => {
                let owner = self.service(call.id).map_err(|_| "NOT_MINTED".to_string())?.owner;
                returns::<IServiceRegistry::ownerOfCall>(&owner)
            }
            Calls::exists(call) => {
                returns::<IServiceRegistry::existsCall>(&self.services.contains_key(&call.unitId))
            }
            Calls::totalSupply(_) => {
                returns::<IServiceRegistry::totalSupplyCall>(&U256::from(self.services.len()))
            }
            Calls::approve(call) => {
                let service = self.service_mut(call.id)?;
                ensure(service.owner == from, "NOT_AUTHORIZED")?;
                service.approved = call.spender;
                Ok(Bytes::new())
            }
            Calls::getApproved(call) => {
                returns::<IServiceRegistry::getApprovedCall>(&self.service(call.id)?.approved)
            }
        }
    }

    fn token_utility(&mut self, data: &[u8]) -> ExecResult {
        use IServiceRegistryTokenUtility::IServiceRegistryTokenUtilityCalls as Calls;

        match Calls::abi_decode(data).map_err(|_| "unknown selector".to_string())? {
            Calls::mapServiceIdTokenDeposit(call) => {
                let (token, deposit) = self
                    .services
                    .get(&call.serviceId)
                    .filter(|service| service.is_token_secured())
                    .map(|service| (service.token, service.security_deposit))
                    .unwrap_or_default();
                returns::<IServiceRegistryTokenUtility::mapServiceIdTokenDepositCall>(
                    &IServiceRegistryTokenUtility::mapServiceIdTokenDepositReturn {
                        token,
                        securityDeposit: U96::saturating_from(deposit),
                    },
                )
            }
            Calls::getAgentBond(call) => {
                let bond = self
                    .services
                    .get(&call.serviceId)
                    .filter(|service| service.is_token_secured())
                    .and_then(|service| service.bond(call.agentId.saturating_to()))
                    .unwrap_or_default();
                returns::<IServiceRegistryTokenUtility::getAgentBondCall>(&bond)
            }
            Calls::getOperatorBalance(call) => {
                let balance = self
                    .services
                    .get(&call.serviceId)
                    .filter(|service| service.is_token_secured())
                    .map(|service| {
                        service
                            .instances
                            .iter()
                            .filter(|i| i.operator == call.operator)
                            .filter_map(|i| service.bond(i.agent_id))
                            .sum::<U256>()
                    })
                    .unwrap_or_default();
                returns::<IServiceRegistryTokenUtility::getOperatorBalanceCall>(&balance)
            }
        }
    }

    fn staking_contract(&mut self, contract: Address, from: Address, data: &[u8]) -> ExecResult {
        use IStaking::IStakingCalls as Calls;

        let now = self.timestamp;
        let registry = self.contracts.service_registry;
        let call = Calls::abi_decode(data).map_err(|_| "unknown selector".to_string())?;
        let staking = &self.staking[&contract];
        let params = staking.params.clone();

        match call {
            Calls::stake(call) => {
                ensure(!staking.services.contains_key(&call.serviceId), "service already staked")?;
                ensure(!params.available_rewards.is_zero(), "no rewards available")?;
                ensure(
                    (staking.active_ids().len() as u64) < params.max_num_services,
                    "max num services reached",
                )?;

                let service = self.service(call.serviceId)?;
                ensure(service.state == OnChainState::Deployed, "wrong service state")?;
                ensure(service.owner == from, "owner only")?;
                ensure(service.approved == contract, "NOT_AUTHORIZED")?;
                ensure(
                    service.security_deposit >= params.min_staking_deposit,
                    "value lower than min deposit",
                )?;
                if !params.staking_token.is_zero() {
                    ensure(service.token == params.staking_token, "wrong staking token")?;
                }
                if !params.agent_ids.is_empty() {
                    ensure(service.agent_ids == params.agent_ids, "wrong agent ids")?;
                }
                let multisig = service.multisig;

                let service = self.service_mut(call.serviceId)?;
                service.owner = contract;
                service.approved = Address::ZERO;
                if let Some(staking) = self.staking.get_mut(&contract) {
                    staking.services.insert(
                        call.serviceId,
                        StakeEntry { owner: from, multisig, ts_start: now, evicted: false },
                    );
                }
                Ok(Bytes::new())
            }
            Calls::unstake(call) => {
                let entry = staking
                    .services
                    .get(&call.serviceId)
                    .cloned()
                    .ok_or_else(|| "service not staked".to_string())?;
                ensure(entry.owner == from, "owner only")?;
                ensure(
                    now.saturating_sub(entry.ts_start) >= params.min_staking_duration
                        || params.available_rewards.is_zero(),
                    "not enough time staked",
                )?;

                if let Some(staking) = self.staking.get_mut(&contract) {
                    staking.services.remove(&call.serviceId);
                }
                self.service_mut(call.serviceId)?.owner = entry.owner;
                returns::<IStaking::unstakeCall>(&U256::ZERO)
            }
            Calls::getStakingState(call) => {
                let state = match staking.services.get(&call.serviceId) {
                    None => 0u8,
                    Some(entry) if entry.evicted => 2,
                    Some(_) => 1,
                };
                returns::<IStaking::getStakingStateCall>(&state)
            }
            Calls::maxNumServices(_) => {
                returns::<IStaking::maxNumServicesCall>(&U256::from(params.max_num_services))
            }
            Calls::getServiceIds(_) => {
                returns::<IStaking::getServiceIdsCall>(&staking.active_ids())
            }
            Calls::availableRewards(_) => {
                returns::<IStaking::availableRewardsCall>(&params.available_rewards)
            }
            Calls::minStakingDeposit(_) => {
                returns::<IStaking::minStakingDepositCall>(&params.min_staking_deposit)
            }
            Calls::minStakingDuration(_) => returns::<IStaking::minStakingDurationCall>(&U256::from(
                params.min_staking_duration,
            )),
            Calls::getAgentIds(_) => returns::<IStaking::getAgentIdsCall>(
                &params.agent_ids.iter().map(|id| U256::from(*id)).collect(),
            ),
            Calls::serviceRegistry(_) => returns::<IStaking::serviceRegistryCall>(&registry),
            Calls::stakingToken(_) => returns::<IStaking::stakingTokenCall>(&params.staking_token),
            Calls::activityChecker(_) => {
                returns::<IStaking::activityCheckerCall>(&params.activity_checker)
            }
            Calls::getServiceInfo(call) => {
                let info = staking
                    .services
                    .get(&call.serviceId)
                    .map(|entry| StakingServiceInfo {
                        multisig: entry.multisig,
                        owner: entry.owner,
                        nonces: Vec::new(),
                        tsStart: U256::from(entry.ts_start),
                        reward: U256::ZERO,
                        inactivity: U256::ZERO,
                    })
                    .unwrap_or_default();
                returns::<IStaking::getServiceInfoCall>(&info)
            }
        }
    }

    fn safe(&mut self, safe: Address, from: Address, data: &[u8]) -> ExecResult {
        use ISafe::ISafeCalls as Calls;

        if data.is_empty() {
            return Ok(Bytes::new());
        }

        let call = Calls::abi_decode(data).map_err(|_| "unknown selector".to_string())?;
        let account = self.safes[&safe].clone();
        let self_call = from == safe;

        match call {
            Calls::execTransaction(call) => {
                let hash = safe_tx_hash(
                    self.chain_id,
                    safe,
                    &SafeTx {
                        to: call.to,
                        value: call.value,
                        data: call.data.clone(),
                        operation: call.operation,
                        safeTxGas: call.safeTxGas,
                        baseGas: call.baseGas,
                        gasPrice: call.gasPrice,
                        gasToken: call.gasToken,
                        refundReceiver: call.refundReceiver,
                        nonce: account.nonce,
                    },
                );
                check_signatures(&account, hash, from, &call.signatures)?;
                if let Some(account) = self.safes.get_mut(&safe) {
                    account.nonce += U256::from(1);
                }

                match SafeOperation::try_from(call.operation).map_err(|err| err.to_string())? {
                    SafeOperation::Call => {
                        self.execute(safe, call.to, call.value, &call.data).map_err(|_| "GS013")?;
                    }
                    SafeOperation::DelegateCall => {
                        ensure(call.to == self.contracts.multisend, "unsupported delegate call")?;
                        let batch = IMultiSend::multiSendCall::abi_decode(&call.data)
                            .map_err(|_| "unknown selector".to_string())?;
                        let calls =
                            decode_multisend(&batch.transactions).map_err(|err| err.to_string())?;
                        for sub in calls {
                            ensure(sub.operation == SafeOperation::Call, "GS013")?;
                            self.execute(safe, sub.to, sub.value, &sub.data)?;
                        }
                    }
                }
                returns::<ISafe::execTransactionCall>(&true)
            }
            Calls::addOwnerWithThreshold(call) => {
                ensure(self_call, "GS031")?;
                ensure(
                    !call.owner.is_zero()
                        && call.owner != SENTINEL_OWNERS
                        && call.owner != safe
                        && !account.owners.contains(&call.owner),
                    "GS203",
                )?;
                let threshold = u64::try_from(call._threshold).map_err(|_| "GS201")?;
                ensure(threshold >= 1 && threshold as usize <= account.owners.len() + 1, "GS201")?;
                if let Some(account) = self.safes.get_mut(&safe) {
                    account.owners.insert(0, call.owner);
                    account.threshold = threshold;
                }
                Ok(Bytes::new())
            }
            Calls::removeOwner(call) => {
                ensure(self_call, "GS031")?;
                let threshold = u64::try_from(call._threshold).map_err(|_| "GS201")?;
                ensure(
                    threshold >= 1 && (threshold as usize) < account.owners.len(),
                    "GS201",
                )?;
                let idx = account
                    .owners
                    .iter()
                    .position(|owner| *owner == call.owner)
                    .ok_or_else(|| "GS205".to_string())?;
                let prev = if idx == 0 { SENTINEL_OWNERS } else { account.owners[idx - 1] };
                ensure(prev == call.prevOwner, "GS205")?;
                if let Some(account) = self.safes.get_mut(&safe) {
                    account.owners.remove(idx);
                    account.threshold = threshold;
                }
                Ok(Bytes::new())
            }
            Calls::changeThreshold(call) => {
                ensure(self_call, "GS031")?;
                let threshold = u64::try_from(call._threshold).map_err(|_| "GS201")?;
                ensure(threshold >= 1 && threshold as usize <= account.owners.len(), "GS201")?;
                if let Some(account) = self.safes.get_mut(&safe) {
                    account.threshold = threshold;
                }
                Ok(Bytes::new())
            }
            Calls::approveHash(call) => {
                ensure(account.owners.contains(&from), "GS030")?;
                if let Some(account) = self.safes.get_mut(&safe) {
                    account.approved.insert((from, call.hashToApprove));
                }
                Ok(Bytes::new())
            }
            Calls::getOwners(_) => returns::<ISafe::getOwnersCall>(&account.owners),
            Calls::getThreshold(_) => {
                returns::<ISafe::getThresholdCall>(&U256::from(account.threshold))
            }
            Calls::nonce(_) => returns::<ISafe::nonceCall>(&account.nonce),
        }
    }

    fn erc20(&mut self, token: Address, from: Address, data: &[u8]) -> ExecResult {
        use IERC20::IERC20Calls as Calls;

        match Calls::abi_decode(data).map_err(|_| "unknown selector".to_string())? {
            Calls::balanceOf(call) => {
                returns::<IERC20::balanceOfCall>(&self.token_balance(token, call.account))
            }
            Calls::allowance(call) => {
                let allowance = self.tokens[&token]
                    .allowances
                    .get(&(call.owner, call.spender))
                    .copied()
                    .unwrap_or_default();
                returns::<IERC20::allowanceCall>(&allowance)
            }
            Calls::approve(call) => {
                if let Some(erc20) = self.tokens.get_mut(&token) {
                    erc20.allowances.insert((from, call.spender), call.amount);
                }
                returns::<IERC20::approveCall>(&true)
            }
            Calls::transfer(call) => {
                self.transfer_token(token, from, call.to, call.amount)?;
                returns::<IERC20::transferCall>(&true)
            }
            Calls::transferFrom(call) => {
                self.pull_token(token, call.from, from, call.amount)?;
                if call.to != from {
                    self.transfer_token(token, from, call.to, call.amount)?;
                }
                returns::<IERC20::transferFromCall>(&true)
            }
        }
    }
}

/// Verifies `threshold` signatures over `hash`, ordered by strictly ascending owner.
fn check_signatures(
    account: &SafeAccount,
    hash: B256,
    sender: Address,
    signatures: &[u8],
) -> Result<(), Revert> {
    let threshold = account.threshold as usize;
    ensure(threshold > 0, "GS001")?;
    ensure(signatures.len() >= threshold * 65, "GS020")?;

    let mut last = Address::ZERO;
    for chunk in signatures.chunks(65).take(threshold) {
        let owner = match chunk[64] {
            1 => {
                let owner = Address::from_slice(&chunk[12..32]);
                ensure(
                    sender == owner || account.approved.contains(&(owner, hash)),
                    "GS025",
                )?;
                owner
            }
            27 | 28 => Signature::from_raw(chunk)
                .ok()
                .and_then(|signature| signature.recover_address_from_prehash(&hash).ok())
                .ok_or_else(|| "GS026".to_string())?,
            _ => return revert("unsupported signature type"),
        };
        ensure(owner > last && account.owners.contains(&owner), "GS026")?;
        last = owner;
    }
    Ok(())
}
