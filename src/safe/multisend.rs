//! Packed multi-send batch encoding.
//!
//! Every entry is `operation (1) | to (20) | value (32) | data length (32) | data`, entries are
//! concatenated without padding.

use super::SafeOperation;
use crate::{error::SafeTxError, types::Call};
use alloy::primitives::{Address, Bytes, U256};

/// Width of an entry without its data.
const ENTRY_HEADER_LEN: usize = 1 + 20 + 32 + 32;

/// One call of a multi-send batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiSendCall {
    /// How the batch executes the call.
    pub operation: SafeOperation,
    /// Call target.
    pub to: Address,
    /// Native value.
    pub value: U256,
    /// Calldata.
    pub data: Bytes,
}

impl From<Call> for MultiSendCall {
    fn from(call: Call) -> Self {
        Self { operation: SafeOperation::Call, to: call.to, value: call.value, data: call.data }
    }
}

/// Encodes calls into the packed multi-send format.
pub fn encode_multisend(calls: &[MultiSendCall]) -> Bytes {
    let len = calls.iter().map(|call| ENTRY_HEADER_LEN + call.data.len()).sum();
    let mut out = Vec::with_capacity(len);
    for call in calls {
        out.push(call.operation as u8);
        out.extend_from_slice(call.to.as_slice());
        out.extend_from_slice(&call.value.to_be_bytes::<32>());
        out.extend_from_slice(&U256::from(call.data.len()).to_be_bytes::<32>());
        out.extend_from_slice(&call.data);
    }
    out.into()
}

/// Decodes a packed multi-send batch.
pub fn decode_multisend(mut input: &[u8]) -> Result<Vec<MultiSendCall>, SafeTxError> {
    let total = input.len();
    let mut calls = Vec::new();
    while !input.is_empty() {
        let offset = total - input.len();
        if input.len() < ENTRY_HEADER_LEN {
            return Err(SafeTxError::TruncatedMultiSend { offset });
        }
        let operation = SafeOperation::try_from(input[0])?;
        let to = Address::from_slice(&input[1..21]);
        let value = U256::from_be_slice(&input[21..53]);
        let data_len = usize::try_from(U256::from_be_slice(&input[53..85]))
            .map_err(|_| SafeTxError::TruncatedMultiSend { offset })?;
        let rest = &input[ENTRY_HEADER_LEN..];
        if rest.len() < data_len {
            return Err(SafeTxError::TruncatedMultiSend { offset });
        }
        calls.push(MultiSendCall {
            operation,
            to,
            value,
            data: Bytes::copy_from_slice(&rest[..data_len]),
        });
        input = &rest[data_len..];
    }
    Ok(calls)
}
