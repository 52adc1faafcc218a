use crate::e2e::*;
use alloy::primitives::{Address, U256};
use operator::{
    error::{OperatorError, SettleError},
    ledger::LedgerExt,
    safe::{SafeOwner, SafeTxBuilder},
    signers::DynSigner,
    types::{Call, ISafe},
};

#[tokio::test]
async fn executes_batch_signed_by_owners() {
    let env = Environment::setup().await;
    let owners = [DynSigner::random(), DynSigner::random()];
    let safe = env.ledger.deploy_safe(owners.iter().map(|o| o.address()).collect(), 2).await;
    env.ledger.fund(safe, ether(10)).await;

    let (first, second) = (Address::repeat_byte(0xa1), Address::repeat_byte(0xa2));
    let mut builder = SafeTxBuilder::new(CHAIN_ID, safe, env.chain.contracts.multisend)
        .with_owner(SafeOwner::Signer(owners[1].clone()))
        .with_owner(SafeOwner::Signer(owners[0].clone()));
    builder
        .add(Call::transfer(first, ether(1)))
        .unwrap()
        .add(Call::transfer(second, ether(2)))
        .unwrap();

    // Sent by the master EOA, which is not an owner.
    let receipt = builder.settle(&env.chain.settler).await.unwrap();
    assert!(receipt.status);
    assert_eq!(env.ledger.balance(first).await, ether(1));
    assert_eq!(env.ledger.balance(second).await, ether(2));
    assert_eq!(env.ledger.balance(safe).await, ether(7));
    assert_eq!(env.chain.ledger.read(safe, ISafe::nonceCall {}).await.unwrap(), U256::from(1));
}

#[tokio::test]
async fn sender_owner_signs_by_approval() {
    let env = Environment::setup().await;
    let safe = env.ledger.deploy_safe(vec![env.master.address()], 1).await;
    env.ledger.fund(safe, ether(1)).await;

    let recipient = Address::repeat_byte(0xa1);
    let mut builder = SafeTxBuilder::new(CHAIN_ID, safe, env.chain.contracts.multisend)
        .with_owner(SafeOwner::ApprovedHash(env.master.address()));
    builder.add(Call::transfer(recipient, ether(1))).unwrap();

    builder.settle(&env.chain.settler).await.unwrap();
    assert_eq!(env.ledger.balance(recipient).await, ether(1));
}

#[tokio::test]
async fn missing_signature_is_rejected_before_sending() {
    let env = Environment::setup().await;
    let owners = [DynSigner::random(), DynSigner::random()];
    let safe = env.ledger.deploy_safe(owners.iter().map(|o| o.address()).collect(), 2).await;
    env.ledger.fund(safe, ether(1)).await;

    let mut builder = SafeTxBuilder::new(CHAIN_ID, safe, env.chain.contracts.multisend)
        .with_owner(SafeOwner::Signer(owners[0].clone()));
    builder.add(Call::transfer(Address::repeat_byte(0xa1), ether(1))).unwrap();

    let err = builder.settle(&env.chain.settler).await.unwrap_err();
    assert!(matches!(err, OperatorError::Settle(SettleError::ChainInteraction(_))), "{err:?}");
    assert_eq!(env.tx_count().await, 0);
    assert_eq!(env.ledger.balance(safe).await, ether(1));
}

#[tokio::test]
async fn master_safe_controller_batches_calls() {
    let env = Environment::setup_with_config(EnvironmentConfig::default().with_master_safe()).await;
    let safe = env.master_safe.unwrap();
    assert_eq!(env.controller(), safe);
    assert!(env.chain.executor.is_atomic());

    let receipts = env
        .chain
        .executor
        .execute(vec![
            Call::transfer(Address::repeat_byte(0xa1), ether(1)),
            Call::transfer(Address::repeat_byte(0xa2), ether(1)),
        ])
        .await
        .unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(env.tx_count().await, 1);
    assert_eq!(env.ledger.balance(safe).await, env.config.master_funds - ether(2));
}
