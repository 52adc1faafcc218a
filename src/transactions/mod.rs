//! Transaction settlement.

mod executor;
pub use executor::{CallExecutor, ControllerExecutor};

mod fees;
pub use fees::{FeesError, MIN_GAS_PRICE_BUMP, bump_fees};

mod metrics;
pub use metrics::SettlerMetrics;

mod settler;
pub use settler::{Settler, SettlerConfig};
