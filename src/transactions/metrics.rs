use metrics::Counter;
use metrics_derive::Metrics;

/// Metrics for a [`Settler`](crate::transactions::Settler).
#[derive(Metrics, Clone)]
#[metrics(scope = "settler")]
pub struct SettlerMetrics {
    /// Number of sent transactions.
    pub sent: Counter,
    /// Number of transactions replaced with higher fees.
    pub repriced: Counter,
    /// Number of confirmed transactions.
    pub confirmed: Counter,
    /// Number of failed settlements.
    pub failed: Counter,
}
