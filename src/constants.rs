//! Operator constants.

use alloy::{
    primitives::{Address, address},
    transports::layers::RetryBackoffLayer,
};
use std::time::Duration;

/// Registry token value of a service that has not been minted yet.
pub const NON_EXISTENT_TOKEN: i64 = -1;

/// Token address the service manager interprets as "bond in the native currency".
pub const ETH_TOKEN_ADDRESS: Address = address!("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Head of the Safe owners linked list.
///
/// Used as `prevOwner` when removing the first owner of a Safe.
pub const SENTINEL_OWNERS: Address = address!("0x0000000000000000000000000000000000000001");

/// Amount of native currency the service manager expects per bond slot when the service is
/// secured with an ERC-20 token instead of the native currency.
pub const TOKEN_BOND_NATIVE_VALUE: u64 = 1;

/// Default time the settler waits for a transaction to be mined.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of attempts the settler makes before giving up.
pub const DEFAULT_SETTLE_RETRIES: u32 = 5;

/// Default pause between two settler attempts.
pub const DEFAULT_SETTLE_SLEEP: Duration = Duration::from_secs(3);

/// Extra buffer added on top of gas estimates.
///
/// The Safe requires `gasleft() >= max(safeTxGas * 64 / 63, safeTxGas + 2500) + 500`, so an
/// estimate taken through `execTransaction` is routinely short by a few thousand gas.
pub const TX_GAS_BUFFER: u64 = 50_000;

/// [`RetryBackoffLayer`] used for ledger providers.
///
/// We are allowing max 10 retries with a backoff of 800ms. The CU/s is set to max value to avoid
/// any throttling.
pub const RETRY_LAYER: RetryBackoffLayer = RetryBackoffLayer::new(10, 800, u64::MAX);

/// Default timeout of a single RPC request.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval of the funding job.
pub const DEFAULT_FUNDING_INTERVAL: Duration = Duration::from_secs(60);

/// Default time the healthcheck job waits for the service to come up.
pub const DEFAULT_HEALTHCHECK_STARTUP_TIMEOUT: Duration = Duration::from_secs(600);

/// Default period of the healthcheck job.
pub const DEFAULT_HEALTHCHECK_PERIOD: Duration = Duration::from_secs(30);

/// Number of consecutive failed healthchecks after which the service is redeployed.
pub const DEFAULT_HEALTHCHECK_MAX_FAILURES: u32 = 5;
