//! Operator configuration.
use crate::{
    constants::{DEFAULT_FUNDING_INTERVAL, DEFAULT_RPC_TIMEOUT},
    jobs::HealthcheckConfig,
    transactions::SettlerConfig,
    types::{ChainContracts, StaticPackageMetadata, StakingProgramId},
};
use alloy::primitives::{Address, ChainId};
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::{Path, PathBuf}, time::Duration};
use url::Url;

/// Default time a single lifecycle pass may take.
const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(1800);

/// Operator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Networks the operator works on.
    #[serde(with = "crate::serde::hash_map")]
    pub chains: BTreeMap<ChainId, NetworkConfig>,
    /// Transaction settlement parameters, shared by all chains.
    #[serde(default)]
    pub settler: SettlerConfig,
    /// Background job configuration.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Timeout of a single RPC request.
    #[serde(with = "crate::serde::duration", default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,
    /// Timeout of a whole lifecycle pass.
    #[serde(with = "crate::serde::duration", default = "default_pass_timeout")]
    pub pass_timeout: Duration,
    /// Directory holding the service records.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Metadata of the packages the operator may deploy, by content hash.
    #[serde(default)]
    pub packages: StaticPackageMetadata,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            chains: BTreeMap::new(),
            settler: SettlerConfig::default(),
            jobs: JobsConfig::default(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            pass_timeout: DEFAULT_PASS_TIMEOUT,
            storage_path: default_storage_path(),
            packages: StaticPackageMetadata::default(),
        }
    }
}

impl OperatorConfig {
    /// Adds a network.
    pub fn with_chain(mut self, chain_id: ChainId, network: NetworkConfig) -> Self {
        self.chains.insert(chain_id, network);
        self
    }

    /// Overrides the endpoint of a configured network.
    pub fn with_endpoint(mut self, chain_id: ChainId, endpoint: Url) -> Self {
        if let Some(network) = self.chains.get_mut(&chain_id) {
            network.endpoint = endpoint;
        }
        self
    }

    /// Sets the settler configuration.
    pub fn with_settler(mut self, settler: SettlerConfig) -> Self {
        self.settler = settler;
        self
    }

    /// Sets the RPC request timeout.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Sets the lifecycle pass timeout.
    pub fn with_pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// Sets the service record directory.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Sets the package metadata table.
    pub fn with_packages(mut self, packages: StaticPackageMetadata) -> Self {
        self.packages = packages;
        self
    }

    /// Checks the contracts of every network.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.chains.is_empty() {
            eyre::bail!("no chains configured");
        }
        for (chain_id, network) in &self.chains {
            network
                .contracts
                .validate()
                .wrap_err_with(|| format!("invalid contracts for chain {chain_id}"))?;
            if let Some((program, _)) =
                network.staking_programs.iter().find(|(_, contract)| contract.is_zero())
            {
                eyre::bail!("staking program {program} on chain {chain_id} has no contract");
            }
        }
        Ok(())
    }

    /// Load from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_reader(&file)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> eyre::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration of one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ledger RPC endpoint.
    pub endpoint: Url,
    /// Registry and Safe contracts.
    pub contracts: ChainContracts,
    /// Staking contracts by program id.
    #[serde(default)]
    pub staking_programs: BTreeMap<StakingProgramId, Address>,
    /// Safe of the master wallet. Without one, the master EOA controls services directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_safe: Option<Address>,
}

impl NetworkConfig {
    /// Creates a network config without staking programs or master Safe.
    pub fn new(endpoint: Url, contracts: ChainContracts) -> Self {
        Self { endpoint, contracts, staking_programs: BTreeMap::new(), master_safe: None }
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

    /// Sets the master Safe.
    pub fn with_master_safe(mut self, safe: Address) -> Self {
        self.master_safe = Some(safe);
        self
    }
}

/// Background job configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Interval of the funding job.
    #[serde(with = "crate::serde::duration")]
    pub funding_interval: Duration,
    /// Healthcheck job timing.
    #[serde(default)]
    pub healthcheck: HealthcheckConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            funding_interval: DEFAULT_FUNDING_INTERVAL,
            healthcheck: HealthcheckConfig::default(),
        }
    }
}

fn default_rpc_timeout() -> Duration {
    DEFAULT_RPC_TIMEOUT
}

fn default_pass_timeout() -> Duration {
    DEFAULT_PASS_TIMEOUT
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("services")
}
