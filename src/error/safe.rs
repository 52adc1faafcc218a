use alloy::primitives::Address;
use thiserror::Error;

/// Errors related to building Safe transactions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafeTxError {
    /// A Safe transaction needs at least one sub-call.
    #[error("safe transaction has no calls")]
    EmptyBatch,
    /// Sub-calls of a multi-send batch must be plain calls.
    #[error("delegate call to {0} is not allowed in a batch")]
    DelegateCall(Address),
    /// The operation byte is neither `CALL` nor `DELEGATE_CALL`.
    #[error("invalid safe operation {0}")]
    InvalidOperation(u8),
    /// A 32 byte boolean flag holds a value other than zero or one.
    #[error("invalid flag at offset {offset}")]
    InvalidFlag {
        /// Byte offset of the flag.
        offset: usize,
    },
    /// An encoded payload is shorter than its fixed-width header.
    #[error("invalid payload length: expected at least {expected} bytes, got {got}")]
    InvalidLength {
        /// Minimum length of the encoding.
        expected: usize,
        /// Length of the input.
        got: usize,
    },
    /// A multi-send entry claims more data than the blob holds.
    #[error("multi-send entry at offset {offset} overruns the batch")]
    TruncatedMultiSend {
        /// Byte offset of the offending entry.
        offset: usize,
    },
    /// The Safe owners differ from the expected owner set.
    #[error("safe {safe} owners {actual:?} do not match expected {expected:?}")]
    OwnerMismatch {
        /// The Safe.
        safe: Address,
        /// Owners expected before the swap.
        expected: Vec<Address>,
        /// Owners read from chain.
        actual: Vec<Address>,
    },
    /// No signing key is known for an owner of the Safe.
    #[error("no key for safe owner {0}")]
    MissingOwnerKey(Address),
}
