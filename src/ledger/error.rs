//! Classification of node errors returned on submission.

use alloy::transports::TransportError;

/// An Extension trait for [`TransportError`].
pub trait TransportErrExt {
    /// Returns true if this is a "already known" error thrown when the transaction is already
    /// contained within the pool.
    ///
    /// This represents duplicate transaction submission.
    fn is_already_known(&self) -> bool;

    /// Returns true if the fees of the transaction are too low to be accepted or to replace a
    /// pending transaction.
    fn is_underpriced(&self) -> bool;

    /// Returns true if the nonce of the transaction is no longer the next nonce of the sender.
    fn is_stale_nonce(&self) -> bool;

    /// Returns true if the node rejected the transaction for a reason a retry cannot fix.
    fn is_permanent(&self) -> bool;
}

impl TransportErrExt for TransportError {
    fn is_already_known(&self) -> bool {
        // see also: op-geth: https://github.com/ethereum-optimism/op-geth/blob/e666543dc5500428ee7c940e54263fe4968c5efd/core/txpool/legacypool/legacypool.go#L991-L993
        // reth: https://github.com/paradigmxyz/reth/blob/a3b749676c6c748bf977983c189f9f4c4f9e9fbe/crates/rpc/rpc-eth-types/src/error/mod.rs#L663-L665
        message_contains(self, &["already known", "known transaction"])
    }

    fn is_underpriced(&self) -> bool {
        message_contains(
            self,
            &[
                "underpriced",
                "fee too low",
                "feetoolow",
                "max fee per gas less than block base fee",
            ],
        )
    }

    fn is_stale_nonce(&self) -> bool {
        message_contains(
            self,
            &["nonce too low", "nonce too high", "wrong transaction nonce", "oldnonce"],
        )
    }

    fn is_permanent(&self) -> bool {
        message_contains(
            self,
            &["revert", "insufficient funds", "intrinsic gas too low", "invalid", "malformed"],
        )
    }
}

/// Whether the error is a JSON-RPC error response whose message contains one of `needles`,
/// compared case-insensitively.
fn message_contains(err: &TransportError, needles: &[&str]) -> bool {
    err.as_error_resp()
        .map(|resp| {
            let message = resp.message.to_lowercase();
            needles.iter().any(|needle| message.contains(needle))
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;
    use alloy::transports::{RpcError, TransportErrorKind};

    fn resp(message: &str) -> TransportError {
        RpcError::ErrorResp(ErrorPayload {
            code: -32000,
            message: message.to_string().into(),
            data: None,
        })
    }

    #[test]
    fn classifies_node_messages() {
        assert!(resp("already known").is_already_known());
        assert!(resp("replacement transaction underpriced").is_underpriced());
        assert!(resp("FeeTooLow").is_underpriced());
        assert!(resp("nonce too low: next nonce 4, tx nonce 3").is_stale_nonce());
        assert!(resp("execution reverted: GS013").is_permanent());
        assert!(resp("insufficient funds for gas * price + value").is_permanent());
        assert!(!resp("header not found").is_permanent());
    }

    #[test]
    fn transport_errors_are_unclassified() {
        let err = TransportErrorKind::custom_str("connection refused");
        assert!(!err.is_already_known());
        assert!(!err.is_permanent());
        assert!(!err.is_stale_nonce());
    }
}
