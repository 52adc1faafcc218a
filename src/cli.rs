//! # Operator CLI
use crate::{
    chains::Chains,
    config::OperatorConfig,
    jobs::{FundingJob, JobKind, JobManager},
    lifecycle::{ServiceOrchestrator, Target},
    signers::DynSigner,
    storage::{OperatorStorage, ServiceStore},
    types::OnChainState,
};
use alloy::{
    primitives::ChainId,
    signers::local::coins_bip39::{English, Mnemonic},
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use eyre::{Context, OptionExt};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Drives autonomous services through their on-chain registry and staking lifecycle.
#[derive(Debug, Parser)]
#[command(author, about = "Service operator", long_about = None)]
pub struct Args {
    /// The configuration file.
    #[arg(long, value_name = "CONFIG", env = "OPERATOR_CONFIG", default_value = "operator.yaml")]
    pub config: PathBuf,
    /// The private key of the master EOA.
    #[arg(
        long = "private-key",
        value_name = "KEY",
        env = "OPERATOR_PRIVATE_KEY",
        required_unless_present("mnemonic"),
        conflicts_with("mnemonic")
    )]
    pub private_key: Option<String>,
    /// A mnemonic to derive the master EOA from, using the first derivation path.
    #[arg(long, value_name = "MNEMONIC", env = "OPERATOR_MNEMONIC")]
    pub mnemonic: Option<Mnemonic<English>>,
    /// Directory of the service records, overriding the config.
    #[arg(long = "storage", value_name = "DIR")]
    pub storage_path: Option<PathBuf>,
    /// The command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Operator commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drives a service to a target state, staking it if requested.
    Deploy {
        #[command(flatten)]
        service: ServiceArgs,
        /// Registry state to reach.
        #[arg(long, value_name = "STATE", value_parser = parse_state, default_value = "deployed")]
        target: OnChainState,
        /// Staking program to stake the service in.
        #[arg(long = "staking-program", value_name = "PROGRAM")]
        staking_program: Option<String>,
        /// Reuse the multisig of a previous deployment.
        #[arg(long = "reuse-multisig", default_value_t = false)]
        reuse_multisig: bool,
    },
    /// Unstakes, terminates and unbonds a service.
    Terminate(ServiceArgs),
    /// Unstakes a service.
    Unstake(ServiceArgs),
    /// Keeps the agent instances and the multisig of a service funded until interrupted.
    Fund(ServiceArgs),
}

/// Service selection.
#[derive(Debug, Clone, ClapArgs)]
pub struct ServiceArgs {
    /// Content hash of the service.
    #[arg(value_name = "HASH")]
    pub hash: String,
    /// The chain to operate on.
    #[arg(long = "chain-id", value_name = "CHAIN_ID")]
    pub chain_id: ChainId,
}

impl Args {
    /// Run the command.
    pub async fn run(mut self) -> eyre::Result<()> {
        let mut config = OperatorConfig::load_from_file(&self.config)?;
        if let Some(path) = self.storage_path.clone() {
            config = config.with_storage_path(path);
        }
        config.validate()?;

        let signer = self.signer()?;
        info!(address = %signer.address(), "loaded master key");

        let chains = Chains::new(&config, signer).await?;
        let storage = OperatorStorage::file(&config.storage_path);
        let orchestrator =
            ServiceOrchestrator::new(storage.clone(), Arc::new(config.packages.clone()));

        match self.command {
            Command::Deploy { service, target, staking_program, reuse_multisig } => {
                let chain = chains.get(service.chain_id)?;
                let mut record = storage.read_service(&service.hash).await?;
                let mut target = Target::new(target).with_reuse_multisig(reuse_multisig);
                if let Some(program) = staking_program {
                    target = target.with_staking_program(program);
                }

                let (state, staking) = tokio::time::timeout(
                    config.pass_timeout,
                    orchestrator.resolve_to_target(&mut record, chain, &target),
                )
                .await
                .wrap_err("lifecycle pass timed out")??;
                info!(service = %service.hash, %state, %staking, "service resolved");
            }
            Command::Terminate(service) => {
                let chain = chains.get(service.chain_id)?;
                let mut record = storage.read_service(&service.hash).await?;
                let outcome = tokio::time::timeout(
                    config.pass_timeout,
                    orchestrator.terminate(&mut record, chain),
                )
                .await
                .wrap_err("termination timed out")??;
                info!(service = %service.hash, ?outcome, "termination finished");
            }
            Command::Unstake(service) => {
                let chain = chains.get(service.chain_id)?;
                let mut record = storage.read_service(&service.hash).await?;
                let staking = tokio::time::timeout(
                    config.pass_timeout,
                    orchestrator.unstake(&mut record, chain),
                )
                .await
                .wrap_err("unstaking timed out")??;
                info!(service = %service.hash, %staking, "unstaking finished");
            }
            Command::Fund(service) => {
                let chain = chains.get(service.chain_id)?.clone();
                // Fail early on unknown services.
                storage.read_service(&service.hash).await?;

                let jobs = JobManager::default();
                let job = FundingJob::new(
                    chain,
                    storage,
                    service.hash.clone(),
                    config.jobs.funding_interval,
                );
                jobs.start(service.hash.clone(), JobKind::Funding, |cancel| job.run(cancel)).await;
                info!(service = %service.hash, "funding job started");

                tokio::signal::ctrl_c().await?;
                jobs.stop_all().await;
            }
        }

        Ok(())
    }

    fn signer(&mut self) -> eyre::Result<DynSigner> {
        if let Some(key) = &self.private_key {
            return DynSigner::from_signing_key(key);
        }
        let mnemonic = self.mnemonic.take().ok_or_eyre("no master key provided")?;
        DynSigner::derive_from_mnemonic(mnemonic, 1)?
            .pop()
            .ok_or_eyre("failed to derive master key")
    }
}

/// Parses a registry state name, e.g. `deployed` or `FINISHED_REGISTRATION`.
fn parse_state(arg: &str) -> eyre::Result<OnChainState> {
    let state = match arg.to_ascii_uppercase().replace('-', "_").as_str() {
        "PRE_REGISTRATION" => OnChainState::PreRegistration,
        "ACTIVE_REGISTRATION" => OnChainState::ActiveRegistration,
        "FINISHED_REGISTRATION" => OnChainState::FinishedRegistration,
        "DEPLOYED" => OnChainState::Deployed,
        other => eyre::bail!("unsupported target state {other}"),
    };
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_states() {
        assert_eq!(parse_state("deployed").unwrap(), OnChainState::Deployed);
        assert_eq!(
            parse_state("finished-registration").unwrap(),
            OnChainState::FinishedRegistration
        );
        assert!(parse_state("unbonded").is_err());
    }

    #[test]
    fn parses_deploy_command() {
        let args = Args::try_parse_from([
            "operator",
            "--private-key",
            "0x0101010101010101010101010101010101010101010101010101010101010101",
            "deploy",
            "bafybeihash",
            "--chain-id",
            "100",
            "--staking-program",
            "pearl_beta",
        ])
        .unwrap();
        let Command::Deploy { service, target, staking_program, reuse_multisig } = args.command
        else {
            panic!("expected deploy");
        };
        assert_eq!(service.hash, "bafybeihash");
        assert_eq!(service.chain_id, 100);
        assert_eq!(target, OnChainState::Deployed);
        assert_eq!(staking_program.as_deref(), Some("pearl_beta"));
        assert!(!reuse_multisig);
    }
}
