//! A simulated ledger, used for testing and dry runs.

use super::{LedgerApi, Receipt};
use crate::types::{Call, ChainContracts, OnChainState};
use alloy::{
    consensus::{Transaction, TxEnvelope},
    eips::{Decodable2718, eip1559::Eip1559Estimation},
    primitives::{Address, B256, Bytes, ChainId, TxKind, U256},
    rpc::json_rpc::ErrorPayload,
    transports::{RpcError, TransportResult},
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

mod state;
use state::ChainState;
pub use state::StakingProgramParams;

/// Priority fee recommended by [`SimulatedLedger::estimate_fees`].
const PRIORITY_FEE: u128 = 1_000_000_000;

/// A receipt that becomes visible after a number of polls.
#[derive(Debug)]
struct PendingReceipt {
    receipt: Receipt,
    polls_left: u32,
}

#[derive(Debug)]
struct Inner {
    state: ChainState,
    receipts: HashMap<B256, PendingReceipt>,
    send_errors: VecDeque<String>,
    receipt_delay: u32,
    base_fee: u128,
    mined: usize,
}

/// In-memory [`LedgerApi`] with the registry, staking, Safe, multi-send and ERC-20 semantics the
/// operator relies on.
///
/// Signed transactions are decoded, checked for chain id, nonce and fees, and executed
/// atomically: a failing execution restores the previous state and produces a failed receipt.
/// Gas is not charged.
#[derive(Debug)]
pub struct SimulatedLedger {
    inner: Mutex<Inner>,
}

fn error_resp(
    code: i64,
    message: impl Into<String>,
) -> RpcError<alloy::transports::TransportErrorKind> {
    RpcError::ErrorResp(ErrorPayload { code, message: message.into().into(), data: None })
}

impl SimulatedLedger {
    /// Creates an empty chain with the given contracts.
    pub fn new(chain_id: ChainId, contracts: ChainContracts) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ChainState::new(chain_id, contracts),
                receipts: HashMap::new(),
                send_errors: VecDeque::new(),
                receipt_delay: 0,
                base_fee: 1_000_000_000,
                mined: 0,
            }),
        }
    }

    /// Credits native currency to an address.
    pub async fn fund(&self, address: Address, amount: U256) {
        self.inner.lock().await.state.fund(address, amount);
    }

    /// Native balance of an address.
    pub async fn balance(&self, address: Address) -> U256 {
        self.inner.lock().await.state.balance(address)
    }

    /// Registers an ERC-20 token contract.
    pub async fn add_erc20(&self, token: Address) {
        self.inner.lock().await.state.add_erc20(token);
    }

    /// Mints ERC-20 tokens.
    pub async fn mint_token(&self, token: Address, to: Address, amount: U256) {
        self.inner.lock().await.state.mint_token(token, to, amount);
    }

    /// ERC-20 balance of an address.
    pub async fn token_balance(&self, token: Address, holder: Address) -> U256 {
        self.inner.lock().await.state.token_balance(token, holder)
    }

    /// Registers a staking contract.
    pub async fn add_staking_program(&self, address: Address, params: StakingProgramParams) {
        self.inner.lock().await.state.add_staking_program(address, params);
    }

    /// Sets the rewards left in a staking contract.
    pub async fn set_available_rewards(&self, contract: Address, rewards: U256) {
        self.inner.lock().await.state.set_available_rewards(contract, rewards);
    }

    /// Evicts a staked service from a staking contract.
    pub async fn evict(&self, contract: Address, service_id: U256) {
        self.inner.lock().await.state.evict(contract, service_id);
    }

    /// Overwrites the registry state of a service.
    pub async fn set_service_state(&self, service_id: U256, state: OnChainState) {
        self.inner.lock().await.state.set_service_state(service_id, state);
    }

    /// Creates a Safe with the given owners and returns its address.
    pub async fn deploy_safe(&self, owners: Vec<Address>, threshold: u64) -> Address {
        self.inner.lock().await.state.deploy_safe(owners, threshold)
    }

    /// Moves the chain clock forward.
    pub async fn advance_time(&self, seconds: u64) {
        let mut inner = self.inner.lock().await;
        inner.state.timestamp += seconds;
        inner.state.block_number += 1;
    }

    /// Makes the next submission fail with a node error carrying `message`.
    pub async fn inject_send_error(&self, message: impl Into<String>) {
        self.inner.lock().await.send_errors.push_back(message.into());
    }

    /// Sets how many polls a receipt stays hidden after its transaction was accepted.
    pub async fn set_receipt_delay(&self, polls: u32) {
        self.inner.lock().await.receipt_delay = polls;
    }

    /// Sets the base fee below which transactions are rejected as underpriced.
    pub async fn set_base_fee(&self, base_fee: u128) {
        self.inner.lock().await.base_fee = base_fee;
    }

    /// Number of transactions mined so far, successful or not.
    pub async fn transaction_count(&self) -> usize {
        self.inner.lock().await.mined
    }
}

#[async_trait]
impl LedgerApi for SimulatedLedger {
    async fn chain_id(&self) -> TransportResult<ChainId> {
        Ok(self.inner.lock().await.state.chain_id)
    }

    async fn get_balance(&self, address: Address) -> TransportResult<U256> {
        Ok(self.inner.lock().await.state.balance(address))
    }

    async fn get_transaction_count(&self, address: Address) -> TransportResult<u64> {
        Ok(self.inner.lock().await.state.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn call(&self, to: Address, input: Bytes) -> TransportResult<Bytes> {
        let mut state = self.inner.lock().await.state.clone();
        state
            .execute(Address::ZERO, to, U256::ZERO, &input)
            .map_err(|reason| error_resp(3, format!("execution reverted: {reason}")))
    }

    async fn estimate_gas(&self, from: Address, call: &Call) -> TransportResult<u64> {
        let mut state = self.inner.lock().await.state.clone();
        state
            .execute(from, call.to, call.value, &call.data)
            .map_err(|reason| error_resp(3, format!("execution reverted: {reason}")))?;
        Ok(100_000 + 16 * call.data.len() as u64)
    }

    async fn estimate_fees(&self) -> TransportResult<Eip1559Estimation> {
        let base_fee = self.inner.lock().await.base_fee;
        Ok(Eip1559Estimation {
            max_fee_per_gas: base_fee * 2 + PRIORITY_FEE,
            max_priority_fee_per_gas: PRIORITY_FEE,
        })
    }

    async fn block_timestamp(&self) -> TransportResult<u64> {
        Ok(self.inner.lock().await.state.timestamp)
    }

    async fn send_raw_transaction(&self, encoded: Bytes) -> TransportResult<B256> {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.send_errors.pop_front() {
            return Err(error_resp(-32000, message));
        }

        let envelope = TxEnvelope::decode_2718(&mut encoded.as_ref())
            .map_err(|_| error_resp(-32602, "malformed transaction"))?;
        let TxEnvelope::Eip1559(signed) = envelope else {
            return Err(error_resp(-32602, "transaction type not supported"));
        };

        let tx_hash = *signed.hash();
        if inner.receipts.contains_key(&tx_hash) {
            return Err(error_resp(-32000, "already known"));
        }

        let sender = signed
            .signature()
            .recover_address_from_prehash(&signed.signature_hash())
            .map_err(|_| error_resp(-32000, "invalid sender"))?;
        let tx = signed.tx();

        if tx.chain_id != inner.state.chain_id {
            return Err(error_resp(-32000, "invalid chain id"));
        }
        let expected_nonce = inner.state.nonces.get(&sender).copied().unwrap_or_default();
        if tx.nonce < expected_nonce {
            return Err(error_resp(
                -32000,
                format!("nonce too low: next nonce {expected_nonce}, tx nonce {}", tx.nonce),
            ));
        }
        if tx.nonce > expected_nonce {
            return Err(error_resp(
                -32000,
                format!("nonce too high: next nonce {expected_nonce}, tx nonce {}", tx.nonce),
            ));
        }
        if tx.max_fee_per_gas() < inner.base_fee {
            return Err(error_resp(-32000, "transaction underpriced"));
        }
        let TxKind::Call(to) = tx.to else {
            return Err(error_resp(-32000, "contract creation not supported"));
        };
        if inner.state.balance(sender) < tx.value {
            return Err(error_resp(-32000, "insufficient funds for gas * price + value"));
        }

        let snapshot = inner.state.clone();
        let status = match inner.state.execute(sender, to, tx.value, &tx.input) {
            Ok(_) => true,
            Err(reason) => {
                debug!(%tx_hash, %reason, "simulated transaction reverted");
                inner.state = snapshot;
                false
            }
        };
        *inner.state.nonces.entry(sender).or_default() += 1;
        inner.state.block_number += 1;
        inner.mined += 1;

        let receipt = Receipt {
            tx_hash,
            status,
            block_number: inner.state.block_number,
            gas_used: 21_000 + 16 * tx.input.len() as u64,
        };
        let polls_left = inner.receipt_delay;
        inner.receipts.insert(tx_hash, PendingReceipt { receipt, polls_left });
        Ok(tx_hash)
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> TransportResult<Option<Receipt>> {
        let mut inner = self.inner.lock().await;
        let Some(pending) = inner.receipts.get_mut(&tx_hash) else {
            return Ok(None);
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return Ok(None);
        }
        Ok(Some(pending.receipt))
    }
}
