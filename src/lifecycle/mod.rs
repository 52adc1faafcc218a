//! Service lifecycle orchestration.
//!
//! [`ServiceOrchestrator::resolve_to_target`] drives a service on one chain from whatever state
//! it is observed in towards a target state. Every pass starts by reading the registry, so a pass
//! interrupted at any point is resumed by simply running it again: steps that already happened
//! on chain are observed and skipped.

use crate::{
    chains::ChainContext,
    constants::ETH_TOKEN_ADDRESS,
    error::{LifecycleError, OperatorError, StakingError},
    registry::{ServiceInfo, ServiceParams, is_native},
    storage::{OperatorStorage, ServiceStore},
    types::{
        OnChainData, OnChainState, PackageMetadata, PackageMetadataProvider, Service,
        StakingProgramId, StakingState, UserParams,
    },
};
use alloy::primitives::{Address, ChainId, U256};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

mod deploy;
mod teardown;

/// State a service should be driven to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Registry state, at most [`OnChainState::Deployed`].
    pub state: OnChainState,
    /// Staking program overriding the one of the service's user params.
    pub staking_program: Option<StakingProgramId>,
    /// Whether to deploy by reusing the service's previous multisig.
    pub reuse_multisig: bool,
}

impl Default for Target {
    fn default() -> Self {
        Self { state: OnChainState::Deployed, staking_program: None, reuse_multisig: false }
    }
}

impl Target {
    /// Creates a target for the given registry state.
    pub fn new(state: OnChainState) -> Self {
        Self { state, ..Default::default() }
    }

    /// Sets the staking program.
    pub fn with_staking_program(mut self, program: impl Into<StakingProgramId>) -> Self {
        self.staking_program = Some(program.into());
        self
    }

    /// Sets whether the previous multisig is reused.
    pub fn with_reuse_multisig(mut self, reuse: bool) -> Self {
        self.reuse_multisig = reuse;
        self
    }
}

/// Result of [`ServiceOrchestrator::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Nothing was sent, the service was in the given state.
    Skipped(OnChainState),
    /// The service was torn down and ended in the given state.
    Terminated(OnChainState),
}

/// The staking contract currently holding a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CurrentStake {
    pub(crate) program: StakingProgramId,
    pub(crate) contract: Address,
    pub(crate) state: StakingState,
}

/// Chain state read at the start of a step.
#[derive(Debug, Clone, Default)]
pub(crate) struct Observed {
    pub(crate) service_id: Option<U256>,
    pub(crate) info: Option<ServiceInfo>,
    pub(crate) stake: Option<CurrentStake>,
}

impl Observed {
    pub(crate) fn state(&self) -> OnChainState {
        self.info.as_ref().map(|info| info.state).unwrap_or_default()
    }

    fn staking_state(&self) -> StakingState {
        self.stake.as_ref().map(|stake| stake.state).unwrap_or_default()
    }
}

/// What a pass aims for, derived from the target, the user params and the package.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub(crate) params: ServiceParams,
    pub(crate) staking: Option<(StakingProgramId, Address)>,
}

impl Plan {
    fn staking_contract(&self) -> Option<Address> {
        self.staking.as_ref().map(|(_, contract)| *contract)
    }
}

/// Why a staked service has to leave its staking contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnstakeReason {
    /// The service must move to another program or stop staking.
    Required,
    /// The service was evicted or the rewards ran out, and it may leave.
    Opportunistic,
}

/// Drives services through their on-chain lifecycle.
#[derive(Debug, Clone)]
pub struct ServiceOrchestrator {
    storage: OperatorStorage,
    packages: Arc<dyn PackageMetadataProvider>,
}

impl ServiceOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(storage: OperatorStorage, packages: Arc<dyn PackageMetadataProvider>) -> Self {
        Self { storage, packages }
    }

    /// The storage service records are persisted to.
    pub fn storage(&self) -> &OperatorStorage {
        &self.storage
    }

    /// Drives the service to `target` and returns the final registry and staking state.
    ///
    /// Preconditions (balances, staking slots and rewards, unstake cooldowns, agent keys) are
    /// checked before any transaction is sent. A service registered with terms that differ from
    /// the plan goes through teardown and update first. The record is persisted after every step.
    #[instrument(
        skip_all,
        fields(service = %service.hash, chain_id = chain.chain_id, target = %target.state)
    )]
    pub async fn resolve_to_target(
        &self,
        service: &mut Service,
        chain: &ChainContext,
        target: &Target,
    ) -> Result<(OnChainState, StakingState), OperatorError> {
        if target.state == OnChainState::NonExistent || target.state > OnChainState::Deployed {
            return Err(LifecycleError::InvalidTarget(target.state).into());
        }

        let package = self.packages.metadata(&service.hash).await?;
        let user_params = chain_data(service, chain.chain_id)?.user_params.clone();
        let plan = self.plan(&user_params, chain, target, &package).await?;
        let mut observed = self.sync(service, chain).await?;

        let update = match observed.service_id {
            Some(service_id)
                if observed.state() >= OnChainState::PreRegistration
                    && observed.state() <= OnChainState::Deployed =>
            {
                self.needs_update(chain, service_id, &observed, &plan.params).await?
            }
            _ => false,
        };
        self.check_preconditions(service, chain, target, &plan, &observed, update).await?;

        if let Some(program) = &target.staking_program {
            let data = chain_data(service, chain.chain_id)?;
            if data.user_params.staking_program_id.as_ref() != Some(program) {
                data.user_params.staking_program_id = Some(program.clone());
                self.storage.write_service(service).await?;
            }
        }

        if let (Some(service_id), Some(stake)) = (observed.service_id, observed.stake.clone()) {
            if let Some(reason) = self.unstake_reason(chain, service_id, &plan, &stake).await? {
                info!(program = %stake.program, ?reason, "leaving staking program");
                chain.staking.unstake(chain.executor.as_ref(), service_id, stake.contract).await?;
                observed = self.sync(service, chain).await?;
            }
        }

        if let Some(service_id) = observed.service_id {
            if observed.stake.is_none() {
                self.check_owner(chain, service_id).await?;
            }

            if update && observed.state() > OnChainState::PreRegistration {
                info!(
                    state = %observed.state(),
                    "service terms changed, tearing down before update"
                );
                observed = self.teardown(service, chain, observed).await?;
            }
        }

        loop {
            let state = observed.state();
            let pending_update = match (state, observed.service_id) {
                (OnChainState::PreRegistration, Some(service_id)) => {
                    self.needs_update(chain, service_id, &observed, &plan.params).await?
                }
                _ => false,
            };
            let expected = match (state, observed.service_id) {
                (OnChainState::NonExistent, _) => {
                    let service_id = deploy::mint(chain, &plan.params).await?;
                    self.record_token(service, chain.chain_id, service_id).await?;
                    OnChainState::PreRegistration
                }
                (OnChainState::PreRegistration, Some(service_id)) if pending_update => {
                    deploy::update(chain, service_id, &plan.params).await?;
                    OnChainState::PreRegistration
                }
                (OnChainState::TerminatedBonded, Some(service_id)) => {
                    teardown::unbond(chain, service_id).await?;
                    OnChainState::PreRegistration
                }
                (OnChainState::Unbonded, service_id) => {
                    return Err(LifecycleError::UnexpectedState {
                        service_id: service_id.unwrap_or_default(),
                        expected: target.state,
                        actual: state,
                    }
                    .into());
                }
                (state, _) if state >= target.state => break,
                (OnChainState::PreRegistration, Some(service_id)) => {
                    deploy::activate(chain, service_id, &observed, &plan.params).await?;
                    OnChainState::ActiveRegistration
                }
                (OnChainState::ActiveRegistration, Some(service_id)) => {
                    deploy::register(chain, service, service_id, &observed, &plan.params).await?;
                    OnChainState::FinishedRegistration
                }
                (OnChainState::FinishedRegistration, Some(service_id)) => {
                    let previous = chain_data(service, chain.chain_id)?.multisig;
                    deploy::deploy(chain, service_id, &observed, previous, target.reuse_multisig)
                        .await?;
                    OnChainState::Deployed
                }
                (state, service_id) => {
                    return Err(LifecycleError::UnexpectedState {
                        service_id: service_id.unwrap_or_default(),
                        expected: target.state,
                        actual: state,
                    }
                    .into());
                }
            };

            observed = self.sync(service, chain).await?;
            if observed.state() != expected {
                return Err(LifecycleError::UnexpectedState {
                    service_id: observed.service_id.unwrap_or_default(),
                    expected,
                    actual: observed.state(),
                }
                .into());
            }
            info!(state = %expected, "service advanced");
        }

        if let (Some(service_id), Some(contract)) = (observed.service_id, plan.staking_contract()) {
            if observed.state() == OnChainState::Deployed
                && target.state == OnChainState::Deployed
                && observed.stake.is_none()
            {
                match chain.staking.check_stake(service_id, contract).await {
                    Ok(()) => {
                        chain.staking.stake(chain.executor.as_ref(), service_id, contract).await?;
                        observed = self.sync(service, chain).await?;
                    }
                    Err(OperatorError::Staking(err)) => {
                        warn!(%err, "not staking service");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok((observed.state(), observed.staking_state()))
    }

    /// Tears the service down: unstake, terminate, unbond and hand the multisig back to the
    /// controller.
    ///
    /// A service that is not in a terminable state is left untouched.
    #[instrument(skip_all, fields(service = %service.hash, chain_id = chain.chain_id))]
    pub async fn terminate(
        &self,
        service: &mut Service,
        chain: &ChainContext,
    ) -> Result<TerminateOutcome, OperatorError> {
        let observed = self.sync(service, chain).await?;
        let state = observed.state();

        if observed.service_id.is_none() {
            warn!("service was never minted, nothing to terminate");
            return Ok(TerminateOutcome::Skipped(state));
        }

        if !state.is_terminable()
            && state != OnChainState::TerminatedBonded
            && observed.stake.is_none()
        {
            if self.swap_owners(service, chain).await? {
                return Ok(TerminateOutcome::Terminated(state));
            }
            warn!(%state, "service cannot be terminated from its current state");
            return Ok(TerminateOutcome::Skipped(state));
        }

        let observed = self.teardown(service, chain, observed).await?;
        Ok(TerminateOutcome::Terminated(observed.state()))
    }

    /// Unstakes the service from whichever configured program holds it.
    ///
    /// Returns [`StakingState::Unstaked`] without sending anything if no program holds it.
    #[instrument(skip_all, fields(service = %service.hash, chain_id = chain.chain_id))]
    pub async fn unstake(
        &self,
        service: &mut Service,
        chain: &ChainContext,
    ) -> Result<StakingState, OperatorError> {
        let observed = self.sync(service, chain).await?;
        let service_id = observed.service_id.ok_or(StakingError::NotMinted)?;
        let Some(stake) = observed.stake else {
            debug!("service is not staked");
            return Ok(StakingState::Unstaked);
        };

        chain.staking.unstake(chain.executor.as_ref(), service_id, stake.contract).await?;
        Ok(self.sync(service, chain).await?.staking_state())
    }

    /// Refreshes the record of the service from chain and persists it.
    ///
    /// The multisig and the agent instances of the last registration are kept once the registry
    /// no longer reports them, so a later owner swap can check them.
    pub(crate) async fn sync(
        &self,
        service: &mut Service,
        chain: &ChainContext,
    ) -> Result<Observed, OperatorError> {
        let Some(service_id) = chain_data(service, chain.chain_id)?.service_id() else {
            let data = chain_data(service, chain.chain_id)?;
            data.on_chain_state = OnChainState::NonExistent;
            data.instances.clear();
            data.staked = false;
            self.storage.write_service(service).await?;
            return Ok(Observed::default());
        };

        let info = chain.registry.service_info(service_id).await?;
        let instances = chain.registry.agent_instances(service_id).await?;
        let stake = current_stake(chain, service_id).await?;

        let data = chain_data(service, chain.chain_id)?;
        data.on_chain_state = info.state;
        if !info.multisig.is_zero() {
            data.multisig = info.multisig;
        }
        if !instances.is_empty() {
            data.instances = instances;
        }
        data.staked = stake.is_some();
        self.storage.write_service(service).await?;

        debug!(%service_id, state = %info.state, staked = stake.is_some(), "service synced");
        Ok(Observed { service_id: Some(service_id), info: Some(info), stake })
    }

    /// Resolves the service parameters the pass works towards.
    ///
    /// When staking, the bond, the bonding token and the agent id follow the staking program.
    async fn plan(
        &self,
        user_params: &UserParams,
        chain: &ChainContext,
        target: &Target,
        package: &PackageMetadata,
    ) -> Result<Plan, OperatorError> {
        let program = target.staking_program.as_ref().or(user_params.staking_program_id.as_ref());
        let staking = match program {
            Some(program) if user_params.use_staking => {
                Some((program.clone(), chain.staking_contract(program)?))
            }
            _ => None,
        };

        let cost_of_bond = if user_params.cost_of_bond.is_zero() {
            package.cost_of_bond
        } else {
            user_params.cost_of_bond
        };
        let mut agent_id =
            if user_params.agent_id == 0 { package.agent_id } else { user_params.agent_id };

        let (token, bond) = match &staking {
            Some((_, contract)) => {
                let params = chain.staking.staking_params(*contract).await?;
                match params.agent_ids.as_slice() {
                    [] => {}
                    [required] => agent_id = *required,
                    _ => {
                        return Err(StakingError::UnsupportedAgentIds {
                            contract: *contract,
                            agent_ids: params.agent_ids,
                        }
                        .into());
                    }
                }
                let token = if is_native(params.staking_token) {
                    ETH_TOKEN_ADDRESS
                } else {
                    params.staking_token
                };
                let bond = if params.min_staking_deposit.is_zero() {
                    cost_of_bond
                } else {
                    params.min_staking_deposit
                };
                (token, bond)
            }
            None => (ETH_TOKEN_ADDRESS, cost_of_bond),
        };

        Ok(Plan {
            params: ServiceParams {
                token,
                config_hash: package.config_hash,
                agent_id,
                num_slots: package.num_slots,
                bond,
                threshold: user_params.threshold,
            },
            staking,
        })
    }

    /// Checks everything that can be checked before the first transaction of the pass.
    ///
    /// `update` tells whether the registered terms differ from the plan, in which case the
    /// service is torn down and registered again.
    async fn check_preconditions(
        &self,
        service: &Service,
        chain: &ChainContext,
        target: &Target,
        plan: &Plan,
        observed: &Observed,
        update: bool,
    ) -> Result<(), OperatorError> {
        let state = observed.state();

        let registers = state <= OnChainState::ActiveRegistration || update;
        if registers && target.state > OnChainState::ActiveRegistration {
            let required = plan.params.num_slots as usize;
            if service.keys.len() < required {
                return Err(LifecycleError::NotEnoughInstances {
                    required,
                    available: service.keys.len(),
                }
                .into());
            }
        }

        if let (Some(service_id), Some(stake)) = (observed.service_id, &observed.stake) {
            if update || plan.staking_contract() != Some(stake.contract) {
                chain.staking.check_unstake(service_id, stake.contract).await?;
            }
        }

        let Some(contract) = plan.staking_contract() else {
            return Ok(());
        };

        let slots = U256::from(plan.params.num_slots);
        let full = plan.params.bond * (slots + U256::from(1));
        let refunded = state == OnChainState::TerminatedBonded
            || (update && state > OnChainState::PreRegistration);
        let required = match (state, observed.service_id, &observed.info) {
            (_, Some(service_id), Some(info)) if refunded => {
                full.saturating_sub(refund(chain, service_id, info, plan.params.token).await?)
            }
            (OnChainState::NonExistent | OnChainState::PreRegistration, _, _) => full,
            (OnChainState::ActiveRegistration, _, _) => plan.params.bond * slots,
            _ => U256::ZERO,
        };
        if !required.is_zero() {
            let holder = chain.controller.address();
            let actual = chain.registry.token_balance(plan.params.token, holder).await?;
            if actual < required {
                return Err(LifecycleError::InsufficientBalance {
                    state,
                    token: plan.params.token,
                    holder,
                    required,
                    actual,
                }
                .into());
            }
        }

        let staked_in_target =
            observed.stake.as_ref().is_some_and(|stake| stake.contract == contract);
        if target.state == OnChainState::Deployed && !staked_in_target {
            if chain.staking.slots_available(contract).await? == 0 {
                return Err(StakingError::NoSlots(contract).into());
            }
            if chain.staking.available_rewards(contract).await?.is_zero() {
                return Err(StakingError::NoRewards(contract).into());
            }
        }
        Ok(())
    }

    /// Decides whether a staked service has to be unstaked before the pass continues.
    async fn unstake_reason(
        &self,
        chain: &ChainContext,
        service_id: U256,
        plan: &Plan,
        stake: &CurrentStake,
    ) -> Result<Option<UnstakeReason>, OperatorError> {
        if plan.staking_contract() != Some(stake.contract) {
            return Ok(Some(UnstakeReason::Required));
        }

        let leave = match stake.state {
            StakingState::Evicted => chain.staking.can_unstake(service_id, stake.contract).await?,
            StakingState::Staked => {
                chain.staking.available_rewards(stake.contract).await?.is_zero()
            }
            StakingState::Unstaked => false,
        };
        Ok(leave.then_some(UnstakeReason::Opportunistic))
    }

    /// Whether the registered service differs from the desired parameters: configuration,
    /// bonding token and bond, agent id, slots or threshold.
    async fn needs_update(
        &self,
        chain: &ChainContext,
        service_id: U256,
        observed: &Observed,
        params: &ServiceParams,
    ) -> Result<bool, OperatorError> {
        let Some(info) = &observed.info else {
            return Ok(false);
        };
        let (token, bond) = registered_bond(chain, service_id, info).await?;
        let changed = info.config_hash != params.config_hash
            || !same_token(token, params.token)
            || bond != params.bond
            || info.agent_ids != [params.agent_id]
            || info.max_agent_instances != params.num_slots
            || info.threshold != params.threshold;
        if changed {
            debug!(
                %service_id,
                registered_bond = %bond,
                bond = %params.bond,
                registered_agent_ids = ?info.agent_ids,
                agent_id = params.agent_id,
                "registered terms differ from plan"
            );
        }
        Ok(changed)
    }

    async fn check_owner(
        &self,
        chain: &ChainContext,
        service_id: U256,
    ) -> Result<(), OperatorError> {
        let owner = chain.registry.owner_of(service_id).await?;
        let controller = chain.controller.address();
        if owner != controller {
            return Err(LifecycleError::NotOwner { service_id, owner, controller }.into());
        }
        Ok(())
    }

    async fn record_token(
        &self,
        service: &mut Service,
        chain_id: ChainId,
        service_id: U256,
    ) -> Result<(), OperatorError> {
        let token = i64::try_from(u64::try_from(service_id).map_err(|err| eyre::eyre!(err))?)
            .map_err(|err| eyre::eyre!(err))?;
        chain_data(service, chain_id)?.token = token;
        self.storage.write_service(service).await?;
        info!(%service_id, "service minted");
        Ok(())
    }
}

/// The bonding token and the bond per agent the service is registered with.
async fn registered_bond(
    chain: &ChainContext,
    service_id: U256,
    info: &ServiceInfo,
) -> Result<(Address, U256), OperatorError> {
    Ok(match chain.registry.token_deposit(service_id).await? {
        Some(deposit) => (deposit.token, deposit.security_deposit),
        None => (ETH_TOKEN_ADDRESS, info.security_deposit),
    })
}

/// Bonding tokens a teardown of the service returns to the controller, if they are in `token`.
///
/// The security deposit is refunded on termination, the agent bonds on unbonding.
async fn refund(
    chain: &ChainContext,
    service_id: U256,
    info: &ServiceInfo,
    token: Address,
) -> Result<U256, OperatorError> {
    let (registered, bond) = registered_bond(chain, service_id, info).await?;
    if !same_token(registered, token) {
        return Ok(U256::ZERO);
    }
    let mut bonds = U256::from(info.num_agent_instances);
    if info.state.is_terminable() {
        bonds += U256::from(1);
    }
    Ok(bond * bonds)
}

fn same_token(a: Address, b: Address) -> bool {
    a == b || (is_native(a) && is_native(b))
}

/// Returns the first configured staking program holding the service.
async fn current_stake(
    chain: &ChainContext,
    service_id: U256,
) -> Result<Option<CurrentStake>, OperatorError> {
    for (program, contract) in &chain.staking_programs {
        let state = chain.staking.status(service_id, *contract).await?;
        if state.is_held() {
            return Ok(Some(CurrentStake { program: program.clone(), contract: *contract, state }));
        }
    }
    Ok(None)
}

/// Returns the snapshot of the service on a chain.
pub(crate) fn chain_data(
    service: &mut Service,
    chain_id: ChainId,
) -> Result<&mut OnChainData, OperatorError> {
    match service.chain_configs.get_mut(&chain_id) {
        Some(config) => Ok(&mut config.chain_data),
        None => {
            Err(LifecycleError::MissingChainConfig { hash: service.hash.clone(), chain_id }.into())
        }
    }
}
