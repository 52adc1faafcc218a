use crate::e2e::*;
use operator::{
    jobs::{FundingJob, JobKind, JobManager},
    lifecycle::Target,
    storage::ServiceStore,
    types::{FundRequirements, Service},
};
use std::time::Duration;

/// Deploys a service and sets its fund requirements.
async fn funded_service(env: &Environment, requirements: FundRequirements) -> Service {
    let mut service = env.service(env.user_params()).await;
    env.resolve(&mut service, &Target::default()).await.unwrap();
    set_requirements(env, &mut service, requirements).await;
    service
}

async fn set_requirements(
    env: &Environment,
    service: &mut Service,
    requirements: FundRequirements,
) {
    service.chain_configs.get_mut(&CHAIN_ID).unwrap().chain_data.user_params.fund_requirements =
        requirements;
    env.storage.write_service(service).await.unwrap();
}

#[tokio::test]
async fn tops_up_addresses_below_threshold() {
    let env = Environment::setup().await;
    let requirements = FundRequirements { agent: ether(1), safe: ether(2) };
    let service = funded_service(&env, requirements).await;
    let multisig = chain_data(&service).multisig;

    // One agent already holds more than required.
    let rich = service.keys[1].address;
    env.ledger.fund(rich, ether(5)).await;

    let job = FundingJob::new(
        env.chain.clone(),
        env.storage.clone(),
        PACKAGE_HASH,
        Duration::from_secs(60),
    );
    let receipts = job.fund_once().await.unwrap();
    assert_eq!(receipts.len(), 2);
    assert!(receipts.iter().all(|receipt| receipt.status));

    assert_eq!(env.ledger.balance(service.keys[0].address).await, ether(1));
    assert_eq!(env.ledger.balance(rich).await, ether(5));
    assert_eq!(env.ledger.balance(multisig).await, ether(2));

    // Everything is at its threshold now.
    assert!(job.fund_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn master_safe_controller_funds_from_master_eoa() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_master_safe()).await;
    let requirements = FundRequirements { agent: ether(1), safe: ether(1) };
    let service = funded_service(&env, requirements).await;
    let master_safe = env.master_safe.unwrap();
    let safe_balance = env.ledger.balance(master_safe).await;
    let eoa_balance = env.ledger.balance(env.master.address()).await;

    let job = FundingJob::new(
        env.chain.clone(),
        env.storage.clone(),
        PACKAGE_HASH,
        Duration::from_secs(60),
    );
    let receipts = job.fund_once().await.unwrap();
    // both agents and the service multisig
    assert_eq!(receipts.len(), 3);

    for key in &service.keys {
        assert_eq!(env.ledger.balance(key.address).await, ether(1));
    }
    assert_eq!(env.ledger.balance(chain_data(&service).multisig).await, ether(1));
    // The service owner is untouched, the top ups are paid by the signing EOA.
    assert_eq!(env.ledger.balance(master_safe).await, safe_balance);
    assert_eq!(env.ledger.balance(env.master.address()).await, eoa_balance - ether(3));
}

#[tokio::test]
async fn zero_requirements_send_nothing() {
    let env = Environment::setup().await;
    funded_service(&env, FundRequirements::default()).await;
    let sent = env.tx_count().await;

    let job = FundingJob::new(
        env.chain.clone(),
        env.storage.clone(),
        PACKAGE_HASH,
        Duration::from_secs(60),
    );
    assert!(job.fund_once().await.unwrap().is_empty());
    assert_eq!(env.tx_count().await, sent);
}

#[tokio::test]
async fn stopped_funding_job_sends_nothing() {
    let env = Environment::setup().await;
    let requirements = FundRequirements { agent: ether(1), safe: ether(1) };
    let mut service = funded_service(&env, requirements).await;
    let agent = service.keys[0].address;

    let manager = JobManager::default();
    let job = FundingJob::new(
        env.chain.clone(),
        env.storage.clone(),
        PACKAGE_HASH,
        Duration::from_millis(20),
    );
    manager.start(PACKAGE_HASH, JobKind::Funding, |cancel| job.run(cancel)).await;
    assert!(manager.is_running(PACKAGE_HASH, JobKind::Funding));

    tokio::time::timeout(Duration::from_secs(5), async {
        while env.ledger.balance(agent).await < ether(1) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("agent was funded");

    assert!(manager.stop(PACKAGE_HASH, JobKind::Funding).await);
    let sent = env.tx_count().await;

    // Raised thresholds are not acted upon once the job is stopped.
    let raised = FundRequirements { agent: ether(3), safe: ether(3) };
    set_requirements(&env, &mut service, raised).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(env.tx_count().await, sent);
    assert_eq!(env.ledger.balance(agent).await, ether(1));
    assert!(!manager.is_running(PACKAGE_HASH, JobKind::Funding));
}
