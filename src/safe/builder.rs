use super::{
    MultiSendCall, SafeOperation, SafeOwner, SafeTxPayload, encode_multisend, safe_tx_hash,
    sign_safe_tx,
};
use crate::{
    error::{OperatorError, SafeTxError},
    ledger::{LedgerApi, LedgerExt, Receipt},
    transactions::Settler,
    types::{Call, IMultiSend, ISafe},
};
use alloy::{
    primitives::{Address, Bytes, ChainId, U256},
    sol_types::SolCall,
};
use tracing::debug;

/// Accumulates calls into one Safe transaction.
///
/// The calls are executed atomically through a `multiSend` delegate call. The transaction is
/// signed by the configured owners and submitted through `execTransaction`, whose sender only
/// pays for gas.
#[derive(Debug, Clone)]
pub struct SafeTxBuilder {
    chain_id: ChainId,
    safe: Address,
    multisend: Address,
    owners: Vec<SafeOwner>,
    calls: Vec<MultiSendCall>,
}

impl SafeTxBuilder {
    /// Creates an empty batch for `safe`.
    pub fn new(chain_id: ChainId, safe: Address, multisend: Address) -> Self {
        Self { chain_id, safe, multisend, owners: Vec::new(), calls: Vec::new() }
    }

    /// Adds an owner signing the transaction.
    pub fn with_owner(mut self, owner: SafeOwner) -> Self {
        self.owners.push(owner);
        self
    }

    /// Appends a call to the batch.
    ///
    /// Delegate calls are rejected, the only delegate call is the `multiSend` wrapper itself.
    pub fn add(&mut self, call: impl Into<MultiSendCall>) -> Result<&mut Self, SafeTxError> {
        let call = call.into();
        if call.operation == SafeOperation::DelegateCall {
            return Err(SafeTxError::DelegateCall(call.to));
        }
        self.calls.push(call);
        Ok(self)
    }

    /// The Safe executing the batch.
    pub fn safe(&self) -> Address {
        self.safe
    }

    /// The accumulated calls.
    pub fn calls(&self) -> &[MultiSendCall] {
        &self.calls
    }

    /// Prepares the payload of the batch at the given Safe nonce, including its hash.
    pub fn prepare(&self, nonce: U256) -> Result<SafeTxPayload, SafeTxError> {
        if self.calls.is_empty() {
            return Err(SafeTxError::EmptyBatch);
        }

        let data = IMultiSend::multiSendCall { transactions: encode_multisend(&self.calls) }
            .abi_encode()
            .into();
        let mut payload = SafeTxPayload {
            to: self.multisend,
            operation: SafeOperation::DelegateCall,
            data,
            ..Default::default()
        };
        payload.safe_tx_hash = safe_tx_hash(self.chain_id, self.safe, &payload.safe_tx(nonce));
        Ok(payload)
    }

    /// Signs the batch at the given Safe nonce and returns the `execTransaction` call.
    pub async fn exec_call(&self, nonce: U256) -> Result<Call, OperatorError> {
        let payload = self.prepare(nonce)?;
        let signatures = sign_safe_tx(&self.owners, payload.safe_tx_hash).await?;
        debug!(
            safe = %self.safe,
            %nonce,
            safe_tx_hash = %payload.safe_tx_hash,
            calls = self.calls.len(),
            "signed safe transaction"
        );
        Ok(exec_transaction_call(self.safe, &payload, signatures))
    }

    /// Reads the current Safe nonce and returns the signed `execTransaction` call.
    pub async fn build(&self, ledger: &dyn LedgerApi) -> Result<Call, OperatorError> {
        let nonce = ledger.read(self.safe, ISafe::nonceCall {}).await?;
        self.exec_call(nonce).await
    }

    /// Builds the batch and settles it.
    ///
    /// The Safe nonce is re-read whenever the settler rebuilds the transaction.
    pub async fn settle(&self, settler: &Settler) -> Result<Receipt, OperatorError> {
        settler.settle(|| self.build(settler.ledger())).await
    }
}

/// Wraps a signed payload into the Safe's `execTransaction`.
pub fn exec_transaction_call(safe: Address, payload: &SafeTxPayload, signatures: Bytes) -> Call {
    Call::contract(
        safe,
        ISafe::execTransactionCall {
            to: payload.to,
            value: payload.value,
            data: payload.data.clone(),
            operation: payload.operation as u8,
            safeTxGas: payload.safe_tx_gas,
            baseGas: payload.base_gas,
            gasPrice: payload.gas_price,
            gasToken: payload.gas_token,
            refundReceiver: payload.refund_receiver,
            signatures,
        },
    )
}
