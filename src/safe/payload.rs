//! Fixed-width encoding of a prepared Safe transaction.

use super::SafeOperation;
use crate::error::SafeTxError;
use alloy::primitives::{Address, B256, Bytes, U256};

/// Length of the encoding without the trailing call data.
pub const SAFE_TX_PAYLOAD_HEADER_LEN: usize =
    32 + 32 + 32 + 20 + 1 + 32 + 32 + 20 + 20 + 32 + 32 + 32;

/// A Safe transaction ready to be signed, together with its hash.
///
/// Encoded as the concatenation of
///
/// | field                        | bytes |
/// |------------------------------|-------|
/// | safe tx hash                 | 32    |
/// | value                        | 32    |
/// | safe tx gas                  | 32    |
/// | destination                  | 20    |
/// | operation                    | 1     |
/// | base gas                     | 32    |
/// | gas price                    | 32    |
/// | gas token                    | 20    |
/// | refund receiver              | 20    |
/// | use flashbots                | 32    |
/// | gas limit                    | 32    |
/// | raise on failed simulation   | 32    |
/// | data                         | rest  |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafeTxPayload {
    /// EIP-712 hash of the transaction.
    pub safe_tx_hash: B256,
    /// Native value.
    pub value: U256,
    /// Gas forwarded to the inner call, zero for all available gas.
    pub safe_tx_gas: U256,
    /// Destination of the Safe call.
    pub to: Address,
    /// Call or delegate call.
    pub operation: SafeOperation,
    /// Gas accounted on top of the inner call for refunds.
    pub base_gas: U256,
    /// Refund gas price.
    pub gas_price: U256,
    /// Refund token, zero for the native currency.
    pub gas_token: Address,
    /// Refund receiver.
    pub refund_receiver: Address,
    /// Whether the transaction should go through a private relay.
    pub use_flashbots: bool,
    /// Gas limit of the outer transaction, zero to estimate.
    pub gas_limit: U256,
    /// Whether a failed simulation aborts submission.
    pub raise_on_failed_simulation: bool,
    /// Call data.
    pub data: Bytes,
}

impl SafeTxPayload {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(SAFE_TX_PAYLOAD_HEADER_LEN + self.data.len());
        out.extend_from_slice(self.safe_tx_hash.as_slice());
        out.extend_from_slice(&self.value.to_be_bytes::<32>());
        out.extend_from_slice(&self.safe_tx_gas.to_be_bytes::<32>());
        out.extend_from_slice(self.to.as_slice());
        out.push(self.operation as u8);
        out.extend_from_slice(&self.base_gas.to_be_bytes::<32>());
        out.extend_from_slice(&self.gas_price.to_be_bytes::<32>());
        out.extend_from_slice(self.gas_token.as_slice());
        out.extend_from_slice(self.refund_receiver.as_slice());
        out.extend_from_slice(&U256::from(self.use_flashbots as u8).to_be_bytes::<32>());
        out.extend_from_slice(&self.gas_limit.to_be_bytes::<32>());
        out.extend_from_slice(
            &U256::from(self.raise_on_failed_simulation as u8).to_be_bytes::<32>(),
        );
        out.extend_from_slice(&self.data);
        out.into()
    }

    /// Decodes a payload, reading every field from its fixed offset.
    pub fn decode(input: &[u8]) -> Result<Self, SafeTxError> {
        if input.len() < SAFE_TX_PAYLOAD_HEADER_LEN {
            return Err(SafeTxError::InvalidLength {
                expected: SAFE_TX_PAYLOAD_HEADER_LEN,
                got: input.len(),
            });
        }

        let mut reader = Reader { input, offset: 0 };
        Ok(Self {
            safe_tx_hash: B256::from_slice(reader.take(32)),
            value: reader.word(),
            safe_tx_gas: reader.word(),
            to: reader.address(),
            operation: SafeOperation::try_from(reader.take(1)[0])?,
            base_gas: reader.word(),
            gas_price: reader.word(),
            gas_token: reader.address(),
            refund_receiver: reader.address(),
            use_flashbots: reader.flag()?,
            gas_limit: reader.word(),
            raise_on_failed_simulation: reader.flag()?,
            data: Bytes::copy_from_slice(&input[SAFE_TX_PAYLOAD_HEADER_LEN..]),
        })
    }
}

/// Cursor over the fixed-width header. Bounds are checked once by the caller.
struct Reader<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.input[self.offset..self.offset + len];
        self.offset += len;
        slice
    }

    fn word(&mut self) -> U256 {
        U256::from_be_slice(self.take(32))
    }

    fn address(&mut self) -> Address {
        Address::from_slice(self.take(20))
    }

    fn flag(&mut self) -> Result<bool, SafeTxError> {
        let offset = self.offset;
        match self.word() {
            value if value.is_zero() => Ok(false),
            value if value == U256::from(1) => Ok(true),
            _ => Err(SafeTxError::InvalidFlag { offset }),
        }
    }
}
