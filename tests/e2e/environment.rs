//! Test environment: a simulated chain with the registry contracts, a funded master wallet and an
//! orchestrator over in-memory storage.

use alloy::{
    primitives::{Address, B256, ChainId, U256},
    signers::local::PrivateKeySigner,
};
use operator::{
    chains::ChainContext,
    error::OperatorError,
    ledger::{LedgerExt, SimulatedLedger, StakingProgramParams},
    lifecycle::{ServiceOrchestrator, Target},
    signers::DynSigner,
    storage::{OperatorStorage, ServiceStore},
    transactions::SettlerConfig,
    types::{
        AgentKey, ChainContracts, ISafe, LedgerConfig, OnChainData, OnChainState, PackageMetadata,
        Service, StakingState, StaticPackageMetadata, UserParams,
    },
};
use std::{sync::Arc, time::Duration};

pub const CHAIN_ID: ChainId = 100;

pub const PACKAGE_HASH: &str = "bafybeibx772eb6c6hqt4zwscxomvgb5lfirbl4vgotkmdkiugayf7fx4tq";

pub const AGENT_ID: u32 = 25;

pub const CONFIG_HASH: B256 = B256::repeat_byte(0xc0);

/// `n` whole units of the native currency.
pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000_000_000_000_000u64)
}

/// Bond per agent instance declared by the test package.
pub fn cost_of_bond() -> U256 {
    U256::from(10_000_000_000_000_000u64)
}

pub fn contracts() -> ChainContracts {
    ChainContracts {
        service_manager: Address::repeat_byte(0x10),
        service_registry: Address::repeat_byte(0x11),
        service_registry_token_utility: Address::repeat_byte(0x12),
        gnosis_safe_proxy_factory: Address::repeat_byte(0x13),
        gnosis_safe_same_address_multisig: Address::repeat_byte(0x14),
        multisend: Address::repeat_byte(0x15),
        safe_fallback_handler: Address::repeat_byte(0x16),
    }
}

/// A staking program with free slots, rewards and a one hour minimum staking duration.
pub fn staking_program() -> StakingProgramParams {
    StakingProgramParams {
        max_num_services: 10,
        min_staking_deposit: ether(1),
        min_staking_duration: 3600,
        available_rewards: ether(100),
        agent_ids: vec![AGENT_ID],
        staking_token: Address::ZERO,
        activity_checker: Address::repeat_byte(0xac),
    }
}

pub fn package(config_hash: B256, num_slots: u32) -> StaticPackageMetadata {
    StaticPackageMetadata::default().with_package(
        PACKAGE_HASH,
        PackageMetadata {
            agent_id: AGENT_ID,
            num_slots,
            cost_of_bond: cost_of_bond(),
            config_hash,
        },
    )
}

/// A fresh agent instance key.
pub fn agent_key() -> AgentKey {
    let signer = PrivateKeySigner::random();
    AgentKey { address: signer.address(), private_key: signer.to_bytes().to_string() }
}

/// All settings for configuring the [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Whether services are controlled through a master Safe.
    pub master_safe: bool,
    /// Native funds of the master EOA, and of the master Safe if any.
    pub master_funds: U256,
    /// Agent slots of the test package.
    pub num_slots: u32,
    /// Staking programs to deploy, by id.
    pub staking_programs: Vec<(&'static str, StakingProgramParams)>,
    pub settler: SettlerConfig,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            master_safe: false,
            master_funds: ether(100),
            num_slots: 2,
            staking_programs: Vec::new(),
            settler: SettlerConfig::default()
                .with_timeout(Duration::from_secs(30))
                .with_max_retries(5)
                .with_sleep_interval(Duration::from_millis(10))
                .with_receipt_timeout(Duration::from_millis(200)),
        }
    }
}

impl EnvironmentConfig {
    pub fn with_master_safe(mut self) -> Self {
        self.master_safe = true;
        self
    }

    pub fn with_master_funds(mut self, funds: U256) -> Self {
        self.master_funds = funds;
        self
    }

    pub fn with_staking_program(mut self, id: &'static str, params: StakingProgramParams) -> Self {
        self.staking_programs.push((id, params));
        self
    }
}

pub struct Environment {
    pub ledger: Arc<SimulatedLedger>,
    pub chain: ChainContext,
    pub master: DynSigner,
    pub master_safe: Option<Address>,
    pub storage: OperatorStorage,
    pub orchestrator: ServiceOrchestrator,
    pub config: EnvironmentConfig,
}

impl Environment {
    pub async fn setup() -> Self {
        Self::setup_with_config(EnvironmentConfig::default()).await
    }

    pub async fn setup_with_config(config: EnvironmentConfig) -> Self {
        let contracts = contracts();
        let ledger = Arc::new(SimulatedLedger::new(CHAIN_ID, contracts));

        let master = DynSigner::random();
        ledger.fund(master.address(), config.master_funds).await;

        let master_safe = if config.master_safe {
            let safe = ledger.deploy_safe(vec![master.address()], 1).await;
            ledger.fund(safe, config.master_funds).await;
            Some(safe)
        } else {
            None
        };

        let mut chain = ChainContext::new(
            CHAIN_ID,
            ledger.clone(),
            contracts,
            master.clone(),
            master_safe,
            config.settler,
        );
        for (idx, (program, params)) in config.staking_programs.iter().enumerate() {
            let contract = Address::with_last_byte(0x50 + idx as u8);
            ledger.add_staking_program(contract, params.clone()).await;
            chain = chain.with_staking_program(*program, contract);
        }

        let storage = OperatorStorage::in_memory();
        let orchestrator = ServiceOrchestrator::new(
            storage.clone(),
            Arc::new(package(CONFIG_HASH, config.num_slots)),
        );

        Self { ledger, chain, master, master_safe, storage, orchestrator, config }
    }

    /// A service with one key per slot, persisted to storage.
    pub async fn service(&self, user_params: UserParams) -> Service {
        let keys = (0..self.config.num_slots).map(|_| agent_key()).collect();
        self.service_with_keys(keys, user_params).await
    }

    pub async fn service_with_keys(&self, keys: Vec<AgentKey>, user_params: UserParams) -> Service {
        let service = Service::new(PACKAGE_HASH, keys).with_chain(
            LedgerConfig { rpc: "http://localhost:8545".parse().unwrap(), chain_id: CHAIN_ID },
            user_params,
        );
        self.storage.write_service(&service).await.unwrap();
        service
    }

    /// User params of an unstaked service.
    pub fn user_params(&self) -> UserParams {
        UserParams {
            cost_of_bond: cost_of_bond(),
            threshold: self.config.num_slots,
            agent_id: AGENT_ID,
            ..Default::default()
        }
    }

    /// User params of a service staked in `program`.
    pub fn staked_user_params(&self, program: &str) -> UserParams {
        UserParams {
            use_staking: true,
            staking_program_id: Some(program.to_string()),
            ..self.user_params()
        }
    }

    pub async fn resolve(
        &self,
        service: &mut Service,
        target: &Target,
    ) -> Result<(OnChainState, StakingState), OperatorError> {
        self.orchestrator.resolve_to_target(service, &self.chain, target).await
    }

    /// Address owning services and funds.
    pub fn controller(&self) -> Address {
        self.chain.controller.address()
    }

    pub fn staking_contract(&self, program: &str) -> Address {
        self.chain.staking_contract(program).unwrap()
    }

    pub async fn owners(&self, safe: Address) -> Vec<Address> {
        self.chain.ledger.read(safe, ISafe::getOwnersCall {}).await.unwrap()
    }

    pub async fn tx_count(&self) -> usize {
        self.ledger.transaction_count().await
    }
}

/// The snapshot of `service` on the test chain.
pub fn chain_data(service: &Service) -> &OnChainData {
    &service.chain_configs[&CHAIN_ID].chain_data
}

/// The registry id of a minted service.
pub fn service_id(service: &Service) -> U256 {
    chain_data(service).service_id().expect("service is minted")
}
