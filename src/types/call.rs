//! A single contract call.

use alloy::{
    primitives::{Address, Bytes, U256},
    rpc::types::TransactionRequest,
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};

/// A call to a contract or a plain value transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// The call target.
    pub to: Address,
    /// Amount of native value to send to the target.
    pub value: U256,
    /// The calldata bytes.
    pub data: Bytes,
}

impl Call {
    /// Creates a call of a contract function.
    pub fn contract(to: Address, call: impl SolCall) -> Self {
        Self { to, value: U256::ZERO, data: call.abi_encode().into() }
    }

    /// Creates a plain value transfer.
    pub fn transfer(to: Address, value: U256) -> Self {
        Self { to, value, data: Bytes::new() }
    }

    /// Sets the native value attached to the call.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Converts the call into a [`TransactionRequest`] sent from `from`.
    pub fn into_request(self, from: Address) -> TransactionRequest {
        TransactionRequest::default()
            .from(from)
            .to(self.to)
            .value(self.value)
            .input(self.data.into())
    }
}
