use crate::e2e::*;
use alloy::primitives::{B256, U256};
use operator::{
    error::{LifecycleError, OperatorError, StakingError},
    ledger::StakingProgramParams,
    lifecycle::{ServiceOrchestrator, Target, TerminateOutcome},
    safe::{SafeOwner, SafeTxBuilder},
    signers::DynSigner,
    storage::ServiceStore,
    types::{Call, ISafe, OnChainState, StakingState},
};
use std::sync::Arc;

#[tokio::test]
async fn deploys_in_four_transitions() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;

    let result = env.resolve(&mut service, &Target::default()).await.unwrap();
    assert_eq!(result, (OnChainState::Deployed, StakingState::Unstaked));
    // mint, activate, register, deploy
    assert_eq!(env.tx_count().await, 4);

    let data = chain_data(&service);
    assert_eq!(data.on_chain_state, OnChainState::Deployed);
    assert!(!data.multisig.is_zero());
    assert_eq!(data.instances, service.agent_addresses());
    assert_eq!(env.owners(data.multisig).await, service.agent_addresses());
    assert_eq!(env.chain.registry.owner_of(service_id(&service)).await.unwrap(), env.controller());

    // The persisted record is the last observed state.
    assert_eq!(env.storage.read_service(PACKAGE_HASH).await.unwrap(), service);
}

#[tokio::test]
async fn second_pass_sends_nothing() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let sent = env.tx_count().await;

    let result = env.resolve(&mut service, &Target::default()).await.unwrap();
    assert_eq!(result, (OnChainState::Deployed, StakingState::Unstaked));
    assert_eq!(env.tx_count().await, sent);
}

#[tokio::test]
async fn second_staked_pass_sends_nothing() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    // deployment, then approve and stake
    assert_eq!(env.tx_count().await, 6);

    let result = env.resolve(&mut service, &Target::default()).await.unwrap();
    assert_eq!(result, (OnChainState::Deployed, StakingState::Staked));
    assert_eq!(env.tx_count().await, 6);
}

#[tokio::test]
async fn interrupted_pass_resumes_with_remaining_steps() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;

    let result =
        env.resolve(&mut service, &Target::new(OnChainState::ActiveRegistration)).await.unwrap();
    assert_eq!(result.0, OnChainState::ActiveRegistration);
    assert_eq!(env.tx_count().await, 2);

    // A restarted operator only has the persisted record.
    let mut restored = env.storage.read_service(PACKAGE_HASH).await.unwrap();
    assert_eq!(chain_data(&restored).on_chain_state, OnChainState::ActiveRegistration);

    let result = env.resolve(&mut restored, &Target::default()).await.unwrap();
    assert_eq!(result.0, OnChainState::Deployed);
    // register, deploy
    assert_eq!(env.tx_count().await, 4);
}

#[tokio::test]
async fn stale_record_is_resynced_before_acting() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::new(OnChainState::FinishedRegistration)).await.unwrap();

    // The record claims less progress than the chain shows.
    let mut stale = service.clone();
    stale.chain_configs.get_mut(&CHAIN_ID).unwrap().chain_data.on_chain_state =
        OnChainState::PreRegistration;

    env.resolve(&mut stale, &Target::default()).await.unwrap();
    assert_eq!(env.tx_count().await, 4);
}

#[tokio::test]
async fn safe_controller_owns_the_service() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_master_safe()).await;
    let mut service = env.service(env.user_params()).await;

    let result = env.resolve(&mut service, &Target::default()).await.unwrap();
    assert_eq!(result.0, OnChainState::Deployed);
    assert_eq!(env.tx_count().await, 4);
    assert_eq!(
        env.chain.registry.owner_of(service_id(&service)).await.unwrap(),
        env.master_safe.unwrap()
    );
}

#[tokio::test]
async fn stakes_deployed_service() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;

    let result = env.resolve(&mut service, &Target::default()).await.unwrap();
    assert_eq!(result, (OnChainState::Deployed, StakingState::Staked));
    assert!(chain_data(&service).staked);

    // Bonded with the staking program's minimum deposit.
    let info = env.chain.registry.service_info(service_id(&service)).await.unwrap();
    assert_eq!(info.security_deposit, ether(1));
}

#[tokio::test]
async fn migrates_between_staking_programs() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default()
            .with_staking_program("alpha", staking_program())
            .with_staking_program("beta", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let service_id = service_id(&service);
    let (alpha, beta) = (env.staking_contract("alpha"), env.staking_contract("beta"));

    env.ledger.advance_time(3600).await;
    let sent = env.tx_count().await;
    let result =
        env.resolve(&mut service, &Target::default().with_staking_program("beta")).await.unwrap();

    assert_eq!(result, (OnChainState::Deployed, StakingState::Staked));
    assert_eq!(env.chain.staking.status(service_id, alpha).await.unwrap(), StakingState::Unstaked);
    assert_eq!(env.chain.staking.status(service_id, beta).await.unwrap(), StakingState::Staked);
    // unstake, then approve and stake
    assert_eq!(env.tx_count().await, sent + 3);
    assert_eq!(
        chain_data(&service).user_params.staking_program_id.as_deref(),
        Some("beta")
    );
}

#[tokio::test]
async fn migration_during_cooldown_sends_nothing() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default()
            .with_staking_program("alpha", staking_program())
            .with_staking_program("beta", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let sent = env.tx_count().await;

    let err = env
        .resolve(&mut service, &Target::default().with_staking_program("beta"))
        .await
        .unwrap_err();
    assert!(matches!(err, OperatorError::Staking(StakingError::Cooldown { .. })), "{err:?}");
    assert!(err.is_precondition());
    assert_eq!(env.tx_count().await, sent);

    // The refused program is not recorded, neither in memory nor in storage.
    assert_eq!(chain_data(&service).user_params.staking_program_id.as_deref(), Some("alpha"));
    let stored = env.storage.read_service(PACKAGE_HASH).await.unwrap();
    assert_eq!(chain_data(&stored).user_params.staking_program_id.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn migrates_to_program_with_higher_deposit() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default()
            .with_staking_program("alpha", staking_program())
            .with_staking_program(
                "beta",
                StakingProgramParams { min_staking_deposit: ether(2), ..staking_program() },
            ),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let service_id = service_id(&service);
    let beta = env.staking_contract("beta");

    env.ledger.advance_time(3600).await;
    let sent = env.tx_count().await;
    let result =
        env.resolve(&mut service, &Target::default().with_staking_program("beta")).await.unwrap();

    assert_eq!(result, (OnChainState::Deployed, StakingState::Staked));
    assert_eq!(env.chain.staking.status(service_id, beta).await.unwrap(), StakingState::Staked);
    let info = env.chain.registry.service_info(service_id).await.unwrap();
    assert_eq!(info.security_deposit, ether(2));
    // unstake, teardown (3), update, activate, register, deploy, approve and stake
    assert_eq!(env.tx_count().await, sent + 10);
}

#[tokio::test]
async fn program_with_several_agent_ids_is_refused() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_staking_program(
        "alpha",
        StakingProgramParams { agent_ids: vec![AGENT_ID, AGENT_ID + 1], ..staking_program() },
    ))
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;

    let err = env.resolve(&mut service, &Target::default()).await.unwrap_err();
    assert!(
        matches!(err, OperatorError::Staking(StakingError::UnsupportedAgentIds { .. })),
        "{err:?}"
    );
    assert_eq!(env.tx_count().await, 0);
}

#[tokio::test]
async fn evicted_service_is_restaked() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let alpha = env.staking_contract("alpha");

    env.ledger.evict(alpha, service_id(&service)).await;
    env.ledger.advance_time(3600).await;
    let sent = env.tx_count().await;

    let result = env.resolve(&mut service, &Target::default()).await.unwrap();
    assert_eq!(result, (OnChainState::Deployed, StakingState::Staked));
    // unstake, then approve and stake
    assert_eq!(env.tx_count().await, sent + 3);
}

#[tokio::test]
async fn staking_preconditions_are_checked_before_minting() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default()
            .with_staking_program("alpha", staking_program())
            .with_master_funds(ether(2)),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;

    let err = env.resolve(&mut service, &Target::default()).await.unwrap_err();
    let OperatorError::Lifecycle(LifecycleError::InsufficientBalance { required, actual, .. }) = err
    else {
        panic!("expected insufficient balance, got {err:?}");
    };
    // Security deposit plus one bond per slot.
    assert_eq!(required, ether(3));
    assert_eq!(actual, ether(2));
    assert_eq!(env.tx_count().await, 0);
}

#[tokio::test]
async fn full_staking_program_is_refused_before_minting() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_staking_program(
        "alpha",
        StakingProgramParams { max_num_services: 0, ..staking_program() },
    ))
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;

    let err = env.resolve(&mut service, &Target::default()).await.unwrap_err();
    assert!(matches!(err, OperatorError::Staking(StakingError::NoSlots(_))), "{err:?}");
    assert_eq!(env.tx_count().await, 0);
}

#[tokio::test]
async fn missing_agent_keys_are_refused() {
    let env = Environment::setup().await;
    let mut service = env.service_with_keys(vec![agent_key()], env.user_params()).await;

    let err = env.resolve(&mut service, &Target::default()).await.unwrap_err();
    assert!(
        matches!(
            err,
            OperatorError::Lifecycle(LifecycleError::NotEnoughInstances {
                required: 2,
                available: 1
            })
        ),
        "{err:?}"
    );
    assert_eq!(env.tx_count().await, 0);
}

#[tokio::test]
async fn unknown_staking_program_is_refused() {
    let env = Environment::setup().await;
    let mut service = env.service(env.staked_user_params("gamma")).await;

    let err = env.resolve(&mut service, &Target::default()).await.unwrap_err();
    assert!(matches!(err, OperatorError::Staking(StakingError::UnknownProgram(_))), "{err:?}");
}

#[tokio::test]
async fn target_beyond_deployed_is_refused() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;

    let err = env.resolve(&mut service, &Target::new(OnChainState::Unbonded)).await.unwrap_err();
    assert!(matches!(
        err,
        OperatorError::Lifecycle(LifecycleError::InvalidTarget(OnChainState::Unbonded))
    ));
}

#[tokio::test]
async fn terminate_in_pre_registration_is_a_noop() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::new(OnChainState::PreRegistration)).await.unwrap();
    assert_eq!(env.tx_count().await, 1);

    let outcome = env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();
    assert_eq!(outcome, TerminateOutcome::Skipped(OnChainState::PreRegistration));
    assert_eq!(env.tx_count().await, 1);
    assert_eq!(chain_data(&service).on_chain_state, OnChainState::PreRegistration);
}

#[tokio::test]
async fn terminate_unminted_service_is_a_noop() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;

    let outcome = env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();
    assert_eq!(outcome, TerminateOutcome::Skipped(OnChainState::NonExistent));
    assert_eq!(env.tx_count().await, 0);
}

#[tokio::test]
async fn terminate_hands_multisig_back_to_controller() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let multisig = chain_data(&service).multisig;
    let balance = env.ledger.balance(env.controller()).await;

    let outcome = env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();
    assert_eq!(outcome, TerminateOutcome::Terminated(OnChainState::PreRegistration));
    // terminate, unbond, owner swap
    assert_eq!(env.tx_count().await, 7);
    assert_eq!(env.owners(multisig).await, vec![env.controller()]);

    // Security deposit and both bonds are refunded.
    let refund = cost_of_bond() * U256::from(3);
    assert_eq!(env.ledger.balance(env.controller()).await, balance + refund);

    // Nothing is left to do.
    let outcome = env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();
    assert_eq!(outcome, TerminateOutcome::Skipped(OnChainState::PreRegistration));
    assert_eq!(env.tx_count().await, 7);
}

#[tokio::test]
async fn terminate_unstakes_first() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    env.ledger.advance_time(3600).await;

    let outcome = env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();
    assert_eq!(outcome, TerminateOutcome::Terminated(OnChainState::PreRegistration));
    assert!(!chain_data(&service).staked);
    assert_eq!(env.owners(chain_data(&service).multisig).await, vec![env.controller()]);
}

#[tokio::test]
async fn redeploys_reusing_multisig() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let multisig = chain_data(&service).multisig;
    env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();

    let result =
        env.resolve(&mut service, &Target::default().with_reuse_multisig(true)).await.unwrap();
    assert_eq!(result.0, OnChainState::Deployed);
    assert_eq!(chain_data(&service).multisig, multisig);

    let mut owners = env.owners(multisig).await;
    let mut expected = service.agent_addresses();
    owners.sort();
    expected.sort();
    assert_eq!(owners, expected);
}

#[tokio::test]
async fn redeploys_reusing_multisig_through_master_safe() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_master_safe()).await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let multisig = chain_data(&service).multisig;
    env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();
    assert_eq!(env.owners(multisig).await, vec![env.master_safe.unwrap()]);

    let result =
        env.resolve(&mut service, &Target::default().with_reuse_multisig(true)).await.unwrap();
    assert_eq!(result.0, OnChainState::Deployed);
    assert_eq!(chain_data(&service).multisig, multisig);
    assert!(!env.owners(multisig).await.contains(&env.master_safe.unwrap()));
}

#[tokio::test]
async fn reuse_without_prior_multisig_is_refused() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;

    let err = env
        .resolve(&mut service, &Target::default().with_reuse_multisig(true))
        .await
        .unwrap_err();
    assert!(
        matches!(err, OperatorError::Lifecycle(LifecycleError::NoPriorMultisig { .. })),
        "{err:?}"
    );
    // mint, activate, register
    assert_eq!(env.tx_count().await, 3);
    assert_eq!(chain_data(&service).on_chain_state, OnChainState::FinishedRegistration);
}

#[tokio::test]
async fn changed_package_is_redeployed_with_new_config() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let service_id = service_id(&service);

    let updated_hash = B256::repeat_byte(0xc1);
    let orchestrator =
        ServiceOrchestrator::new(env.storage.clone(), Arc::new(package(updated_hash, 2)));
    let result = orchestrator
        .resolve_to_target(&mut service, &env.chain, &Target::default())
        .await
        .unwrap();

    assert_eq!(result.0, OnChainState::Deployed);
    let info = env.chain.registry.service_info(service_id).await.unwrap();
    assert_eq!(info.config_hash, updated_hash);
    // Same registry id, no second mint.
    assert_eq!(env.chain.registry.total_supply().await.unwrap(), U256::from(1));
    // deploy (4), teardown (3), update, activate, register, deploy
    assert_eq!(env.tx_count().await, 11);
}

#[tokio::test]
async fn unbonded_service_is_refused() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    env.ledger.set_service_state(service_id(&service), OnChainState::Unbonded).await;
    let sent = env.tx_count().await;

    let err = env.resolve(&mut service, &Target::default()).await.unwrap_err();
    assert!(
        matches!(
            err,
            OperatorError::Lifecycle(LifecycleError::UnexpectedState {
                actual: OnChainState::Unbonded,
                ..
            })
        ),
        "{err:?}"
    );
    assert_eq!(env.tx_count().await, sent);
}

#[tokio::test]
async fn multisig_with_foreign_owner_set_is_not_swapped() {
    let env = Environment::setup().await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let multisig = chain_data(&service).multisig;
    let owners = env.owners(multisig).await;

    // The agents drop one of them as owner, so the owners are a strict subset of the instances.
    let mut builder = SafeTxBuilder::new(CHAIN_ID, multisig, env.chain.contracts.multisend);
    for owner in &owners {
        let signer = DynSigner::from_agent_key(service.agent_key(*owner).unwrap()).unwrap();
        builder = builder.with_owner(SafeOwner::Signer(signer));
    }
    builder
        .add(Call::contract(
            multisig,
            ISafe::removeOwnerCall {
                prevOwner: owners[0],
                owner: owners[1],
                _threshold: U256::from(1),
            },
        ))
        .unwrap();
    builder.settle(&env.chain.settler).await.unwrap();
    let sent = env.tx_count().await;

    let outcome = env.orchestrator.terminate(&mut service, &env.chain).await.unwrap();
    assert_eq!(outcome, TerminateOutcome::Terminated(OnChainState::PreRegistration));
    // terminate, unbond
    assert_eq!(env.tx_count().await, sent + 2);
    assert_eq!(env.owners(multisig).await, vec![owners[0]]);
}
