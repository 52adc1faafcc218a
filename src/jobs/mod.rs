//! Background jobs attached to running services.
//!
//! Jobs are keyed by service hash and [`JobKind`]. Starting a job replaces the running job with
//! the same key. Jobs stop cooperatively: every loop races its work against its
//! [`CancellationToken`], so a stopped job makes no further chain calls.

use dashmap::DashMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod funding;
pub use funding::FundingJob;

mod healthcheck;
pub use healthcheck::{HealthProbe, HealthcheckConfig, HealthcheckJob, HttpProbe, Redeployer};

/// Kind of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    /// Keeps service addresses funded.
    Funding,
    /// Restarts the service when it stops responding.
    Healthcheck,
}

#[derive(Debug)]
struct RunningJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of running background jobs.
#[derive(Debug, Default)]
pub struct JobManager {
    jobs: DashMap<(String, JobKind), RunningJob>,
}

impl JobManager {
    /// Spawns the job produced by `job`, stopping the job running under the same key first.
    pub async fn start<F, Fut>(&self, hash: impl Into<String>, kind: JobKind, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hash = hash.into();
        self.stop(&hash, kind).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(job(cancel.clone()));
        debug!(service = %hash, ?kind, "job started");
        self.jobs.insert((hash, kind), RunningJob { cancel, handle });
    }

    /// Stops a job and waits for it to exit. Returns whether a job was running.
    pub async fn stop(&self, hash: &str, kind: JobKind) -> bool {
        let Some((_, job)) = self.jobs.remove(&(hash.to_string(), kind)) else {
            return false;
        };
        job.cancel.cancel();
        if let Err(err) = job.handle.await {
            warn!(service = %hash, ?kind, %err, "job panicked");
        }
        debug!(service = %hash, ?kind, "job stopped");
        true
    }

    /// Stops every job of every service.
    pub async fn stop_all(&self) {
        let keys: Vec<_> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        for (hash, kind) in keys {
            self.stop(&hash, kind).await;
        }
    }

    /// Whether a job is registered and has not exited.
    pub fn is_running(&self, hash: &str, kind: JobKind) -> bool {
        self.jobs
            .get(&(hash.to_string(), kind))
            .is_some_and(|job| !job.handle.is_finished())
    }
}
