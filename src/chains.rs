//! Per chain context of the operator.

use crate::{
    config::{NetworkConfig, OperatorConfig},
    error::{OperatorError, StakingError},
    ledger::{LedgerApi, RpcLedger},
    registry::Registry,
    signers::DynSigner,
    staking::StakingManager,
    transactions::{CallExecutor, ControllerExecutor, Settler, SettlerConfig},
    types::{ChainContracts, Controller, MasterWallet, StakingProgramId},
};
use alloy::primitives::{Address, ChainId};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::info;

/// Everything needed to operate services on one chain.
///
/// Passed explicitly to every lifecycle operation.
#[derive(Debug, Clone)]
pub struct ChainContext {
    /// The chain ID.
    pub chain_id: ChainId,
    /// Gateway to the chain.
    pub ledger: Arc<dyn LedgerApi>,
    /// Contracts of the chain.
    pub contracts: ChainContracts,
    /// Staking contracts by program id.
    pub staking_programs: BTreeMap<StakingProgramId, Address>,
    /// Owner of services and funds.
    pub controller: Controller,
    /// Registry access.
    pub registry: Registry,
    /// Staking contract access.
    pub staking: StakingManager,
    /// Executes calls on behalf of the controller.
    pub executor: Arc<dyn CallExecutor>,
    /// Settler sending from the controller EOA.
    pub settler: Settler,
    /// Key of the controller EOA.
    pub signer: DynSigner,
}

impl ChainContext {
    /// Creates a context over `ledger`.
    ///
    /// If `master_safe` is set, the Safe owns services and calls are batched through it,
    /// otherwise the EOA of `signer` sends every call itself.
    pub fn new(
        chain_id: ChainId,
        ledger: Arc<dyn LedgerApi>,
        contracts: ChainContracts,
        signer: DynSigner,
        master_safe: Option<Address>,
        settler_config: SettlerConfig,
    ) -> Self {
        let mut wallet = MasterWallet::new(signer.address());
        if let Some(safe) = master_safe {
            wallet = wallet.with_safe(chain_id, safe);
        }
        let controller = wallet.controller(chain_id);

        let settler = Settler::new(ledger.clone(), signer.clone(), chain_id, settler_config);
        let executor = ControllerExecutor::new(
            settler.clone(),
            signer.clone(),
            controller,
            contracts.multisend,
        );

        Self {
            chain_id,
            registry: Registry::new(ledger.clone(), contracts),
            staking: StakingManager::new(ledger.clone(), contracts.service_registry),
            ledger,
            contracts,
            staking_programs: BTreeMap::new(),
            controller,
            executor: Arc::new(executor),
            settler,
            signer,
        }
    }

    /// Sets the staking programs of the chain.
    pub fn with_staking_programs(mut self, programs: BTreeMap<StakingProgramId, Address>) -> Self {
        self.staking_programs = programs;
        self
    }

    /// Adds a staking program.
    pub fn with_staking_program(
        mut self,
        id: impl Into<StakingProgramId>,
        contract: Address,
    ) -> Self {
        self.staking_programs.insert(id.into(), contract);
        self
    }

    /// Returns the staking contract of a program.
    pub fn staking_contract(&self, program: &str) -> Result<Address, OperatorError> {
        self.staking_programs
            .get(program)
            .copied()
            .ok_or_else(|| StakingError::UnknownProgram(program.to_string()).into())
    }

    /// Connects to the network described by `config`.
    ///
    /// Fails if the endpoint reports another chain id.
    pub async fn connect(
        chain_id: ChainId,
        config: &NetworkConfig,
        signer: DynSigner,
        settler_config: SettlerConfig,
        rpc_timeout: Duration,
    ) -> eyre::Result<Self> {
        config.contracts.validate()?;
        let ledger = RpcLedger::new(config.endpoint.clone(), rpc_timeout);
        let remote = ledger.chain_id().await?;
        if remote != chain_id {
            eyre::bail!("endpoint {} serves chain {remote}, expected {chain_id}", config.endpoint);
        }

        Ok(Self::new(
            chain_id,
            Arc::new(ledger),
            config.contracts,
            signer,
            config.master_safe,
            settler_config,
        )
        .with_staking_programs(config.staking_programs.clone()))
    }
}

/// A collection of chain contexts.
#[derive(Debug, Clone, Default)]
pub struct Chains {
    chains: BTreeMap<ChainId, ChainContext>,
}

impl Chains {
    /// Connects to every chain of the config.
    pub async fn new(config: &OperatorConfig, signer: DynSigner) -> eyre::Result<Self> {
        let chains = futures_util::future::try_join_all(config.chains.iter().map(
            |(chain_id, network)| {
                let signer = signer.clone();
                async move {
                    let context = ChainContext::connect(
                        *chain_id,
                        network,
                        signer,
                        config.settler,
                        config.rpc_timeout,
                    )
                    .await?;
                    info!(
                        chain_id,
                        controller = %context.controller.address(),
                        "connected to chain"
                    );
                    eyre::Ok((*chain_id, context))
                }
            },
        ))
        .await?;

        Ok(Self { chains: chains.into_iter().collect() })
    }

    /// Adds a context.
    pub fn with_chain(mut self, context: ChainContext) -> Self {
        self.chains.insert(context.chain_id, context);
        self
    }

    /// Get the context of a chain.
    pub fn get(&self, chain_id: ChainId) -> Result<&ChainContext, OperatorError> {
        self.chains.get(&chain_id).ok_or(OperatorError::UnsupportedChain(chain_id))
    }

    /// Get an iterator over the supported chain IDs.
    pub fn chain_ids_iter(&self) -> impl Iterator<Item = &ChainId> {
        self.chains.keys()
    }
}
