use crate::e2e::*;
use alloy::{
    eips::eip1559::Eip1559Estimation,
    primitives::{Address, B256, Bytes, ChainId, U256},
    transports::{TransportErrorKind, TransportResult},
};
use async_trait::async_trait;
use operator::{
    error::{OperatorError, SettleError},
    ledger::{LedgerApi, Receipt},
    signers::DynSigner,
    transactions::{Settler, SettlerConfig},
    types::Call,
};
use std::{sync::Arc, time::Duration};

async fn transfer(env: &Environment, to: Address, amount: U256) -> Result<Receipt, OperatorError> {
    let call = Call::transfer(to, amount);
    env.chain
        .settler
        .settle(|| {
            let call = call.clone();
            async move { Ok(call) }
        })
        .await
}

#[tokio::test]
async fn settles_transfer() {
    let env = Environment::setup().await;
    let recipient = Address::repeat_byte(0xee);

    let receipt = transfer(&env, recipient, ether(1)).await.unwrap();
    assert!(receipt.status);
    assert_eq!(env.ledger.balance(recipient).await, ether(1));
    assert_eq!(env.tx_count().await, 1);
}

#[tokio::test]
async fn reprices_underpriced_submission() {
    let env = Environment::setup().await;
    env.ledger.inject_send_error("transaction underpriced").await;

    let recipient = Address::repeat_byte(0xee);
    transfer(&env, recipient, ether(1)).await.unwrap();
    assert_eq!(env.ledger.balance(recipient).await, ether(1));
    assert_eq!(env.tx_count().await, 1);
}

#[tokio::test]
async fn already_known_submission_is_awaited_then_replaced() {
    let env = Environment::setup().await;
    // The node claims to know the transaction but never mines it, so it gets replaced.
    env.ledger.inject_send_error("already known").await;

    let recipient = Address::repeat_byte(0xee);
    transfer(&env, recipient, ether(1)).await.unwrap();
    assert_eq!(env.ledger.balance(recipient).await, ether(1));
    assert_eq!(env.tx_count().await, 1);
}

#[tokio::test]
async fn waits_for_delayed_receipt() {
    let env = Environment::setup().await;
    env.ledger.set_receipt_delay(3).await;

    let recipient = Address::repeat_byte(0xee);
    let receipt = transfer(&env, recipient, ether(1)).await.unwrap();
    assert!(receipt.status);
    assert_eq!(env.tx_count().await, 1);
}

#[tokio::test]
async fn transient_submission_errors_are_retried() {
    let env = Environment::setup().await;
    env.ledger.inject_send_error("temporarily unavailable").await;
    env.ledger.inject_send_error("temporarily unavailable").await;

    transfer(&env, Address::repeat_byte(0xee), ether(1)).await.unwrap();
    assert_eq!(env.tx_count().await, 1);
}

#[tokio::test]
async fn reverting_call_fails_without_sending() {
    let env = Environment::setup().await;

    // More than the master owns, estimation reverts.
    let err = transfer(&env, Address::repeat_byte(0xee), ether(1_000)).await.unwrap_err();
    assert!(matches!(err, OperatorError::Settle(SettleError::ChainInteraction(_))), "{err:?}");
    assert_eq!(env.tx_count().await, 0);
}

#[tokio::test]
async fn permanent_rejection_is_not_retried() {
    let env = Environment::setup().await;
    env.ledger.inject_send_error("insufficient funds for gas * price + value").await;

    let err = transfer(&env, Address::repeat_byte(0xee), ether(1)).await.unwrap_err();
    assert!(matches!(err, OperatorError::Settle(SettleError::ChainInteraction(_))), "{err:?}");
    assert_eq!(env.tx_count().await, 0);
}

#[tokio::test]
async fn times_out_when_never_mined() {
    let config = EnvironmentConfig {
        settler: EnvironmentConfig::default().settler.with_max_retries(2),
        ..Default::default()
    };
    let env = Environment::setup_with_config(config).await;
    env.ledger.set_receipt_delay(u32::MAX).await;

    let err = transfer(&env, Address::repeat_byte(0xee), ether(1)).await.unwrap_err();
    assert!(matches!(err, OperatorError::Settle(SettleError::Timeout { .. })), "{err:?}");
}

/// A ledger whose endpoint cannot be reached.
#[derive(Debug)]
struct Unreachable;

fn refused<T>() -> TransportResult<T> {
    Err(TransportErrorKind::custom_str("connection refused"))
}

#[async_trait]
impl LedgerApi for Unreachable {
    async fn chain_id(&self) -> TransportResult<ChainId> {
        refused()
    }

    async fn get_balance(&self, _: Address) -> TransportResult<U256> {
        refused()
    }

    async fn get_transaction_count(&self, _: Address) -> TransportResult<u64> {
        refused()
    }

    async fn call(&self, _: Address, _: Bytes) -> TransportResult<Bytes> {
        refused()
    }

    async fn estimate_gas(&self, _: Address, _: &Call) -> TransportResult<u64> {
        refused()
    }

    async fn estimate_fees(&self) -> TransportResult<Eip1559Estimation> {
        refused()
    }

    async fn block_timestamp(&self) -> TransportResult<u64> {
        refused()
    }

    async fn send_raw_transaction(&self, _: Bytes) -> TransportResult<B256> {
        refused()
    }

    async fn get_transaction_receipt(&self, _: B256) -> TransportResult<Option<Receipt>> {
        refused()
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_reported() {
    let settler = Settler::new(
        Arc::new(Unreachable),
        DynSigner::random(),
        CHAIN_ID,
        SettlerConfig::default()
            .with_max_retries(3)
            .with_sleep_interval(Duration::from_millis(10)),
    );

    let err = settler
        .settle(|| async { Ok(Call::transfer(Address::repeat_byte(0xee), U256::from(1))) })
        .await
        .unwrap_err();
    assert!(matches!(err, OperatorError::Settle(SettleError::Unreachable(_))), "{err:?}");
}
