use crate::e2e::*;
use alloy::primitives::U256;
use operator::{
    error::{OperatorError, StakingError},
    ledger::StakingProgramParams,
    lifecycle::Target,
    types::{OnChainState, StakingState},
};

/// Deploys a service without staking it and returns it with its registry id.
async fn deployed(env: &Environment) -> U256 {
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    service_id(&service)
}

#[tokio::test]
async fn stake_without_slots_sends_nothing() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_staking_program(
        "full",
        StakingProgramParams { max_num_services: 0, ..staking_program() },
    ))
    .await;
    let service_id = deployed(&env).await;
    let contract = env.staking_contract("full");
    let sent = env.tx_count().await;

    let err = env
        .chain
        .staking
        .stake(env.chain.executor.as_ref(), service_id, contract)
        .await
        .unwrap_err();
    assert!(
        matches!(err, OperatorError::Staking(StakingError::NoSlots(c)) if c == contract),
        "{err:?}"
    );
    assert_eq!(env.tx_count().await, sent);
}

#[tokio::test]
async fn stake_without_rewards_sends_nothing() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_staking_program(
        "drained",
        StakingProgramParams { available_rewards: U256::ZERO, ..staking_program() },
    ))
    .await;
    let service_id = deployed(&env).await;
    let sent = env.tx_count().await;

    let err = env
        .chain
        .staking
        .stake(env.chain.executor.as_ref(), service_id, env.staking_contract("drained"))
        .await
        .unwrap_err();
    assert!(matches!(err, OperatorError::Staking(StakingError::NoRewards(_))), "{err:?}");
    assert_eq!(env.tx_count().await, sent);
}

#[tokio::test]
async fn staking_twice_is_refused() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let service_id = service_id(&service);
    let contract = env.staking_contract("alpha");
    assert_eq!(env.chain.staking.status(service_id, contract).await.unwrap(), StakingState::Staked);
    let sent = env.tx_count().await;

    let err = env
        .chain
        .staking
        .stake(env.chain.executor.as_ref(), service_id, contract)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            OperatorError::Staking(StakingError::NotUnstaked { state: StakingState::Staked, .. })
        ),
        "{err:?}"
    );
    assert_eq!(env.tx_count().await, sent);
}

#[tokio::test]
async fn unstake_waits_for_minimum_duration() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    assert_eq!(
        env.resolve(&mut service, &Target::default()).await.unwrap(),
        (OnChainState::Deployed, StakingState::Staked)
    );
    let service_id = service_id(&service);
    let contract = env.staking_contract("alpha");
    let sent = env.tx_count().await;

    env.ledger.advance_time(600).await;
    let err = env.orchestrator.unstake(&mut service, &env.chain).await.unwrap_err();
    let OperatorError::Staking(StakingError::Cooldown { staked_for, remaining, .. }) = err else {
        panic!("expected cooldown, got {err:?}");
    };
    assert_eq!(staked_for, 600);
    assert_eq!(remaining, 3000);
    assert_eq!(env.tx_count().await, sent);

    env.ledger.advance_time(3000).await;
    assert!(env.chain.staking.can_unstake(service_id, contract).await.unwrap());
    assert_eq!(
        env.orchestrator.unstake(&mut service, &env.chain).await.unwrap(),
        StakingState::Unstaked
    );
    assert!(!chain_data(&service).staked);
    assert_eq!(env.chain.registry.owner_of(service_id).await.unwrap(), env.controller());
}

#[tokio::test]
async fn drained_program_can_be_left_early() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.staked_user_params("alpha")).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();

    env.ledger.set_available_rewards(env.staking_contract("alpha"), U256::ZERO).await;
    assert_eq!(
        env.orchestrator.unstake(&mut service, &env.chain).await.unwrap(),
        StakingState::Unstaked
    );
}

#[tokio::test]
async fn unstaking_unstaked_service_is_a_noop() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    let sent = env.tx_count().await;

    assert_eq!(
        env.orchestrator.unstake(&mut service, &env.chain).await.unwrap(),
        StakingState::Unstaked
    );
    assert_eq!(env.tx_count().await, sent);
}

#[tokio::test]
async fn staking_params_are_read_together() {
    let env = Environment::setup_with_config(
        EnvironmentConfig::default().with_staking_program("alpha", staking_program()),
    )
    .await;
    let params = env.chain.staking.staking_params(env.staking_contract("alpha")).await.unwrap();
    assert_eq!(params.agent_ids, vec![AGENT_ID]);
    assert_eq!(params.min_staking_deposit, ether(1));
    assert_eq!(params.min_staking_duration, 3600);
    assert_eq!(params.max_num_services, 10);
    assert_eq!(params.service_registry, contracts().service_registry);
}
