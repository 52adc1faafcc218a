use crate::constants::{
    DEFAULT_HEALTHCHECK_MAX_FAILURES, DEFAULT_HEALTHCHECK_PERIOD,
    DEFAULT_HEALTHCHECK_STARTUP_TIMEOUT,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Liveness check of a running service.
#[async_trait]
pub trait HealthProbe: Debug + Send + Sync {
    /// Whether the service is healthy.
    async fn check(&self) -> bool;
}

/// Restarts a service that stopped responding.
#[async_trait]
pub trait Redeployer: Debug + Send + Sync {
    /// Stops and redeploys the service `hash`.
    async fn redeploy(&self, hash: &str) -> eyre::Result<()>;
}

/// [`HealthProbe`] expecting a successful HTTP status from an endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    /// Creates a probe of `url` with a per request timeout.
    pub fn new(url: Url, timeout: Duration) -> eyre::Result<Self> {
        Ok(Self { client: reqwest::Client::builder().timeout(timeout).build()?, url })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(url = %self.url, %err, "healthcheck request failed");
                false
            }
        }
    }
}

/// Timing of a [`HealthcheckJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// Time the service has to come up after a (re)deployment.
    #[serde(with = "crate::serde::duration")]
    pub startup_timeout: Duration,
    /// Pause between two checks.
    #[serde(with = "crate::serde::duration")]
    pub period: Duration,
    /// Consecutive failed checks after which the service is redeployed.
    pub max_failures: u32,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_HEALTHCHECK_STARTUP_TIMEOUT,
            period: DEFAULT_HEALTHCHECK_PERIOD,
            max_failures: DEFAULT_HEALTHCHECK_MAX_FAILURES,
        }
    }
}

/// Polls a service's liveness endpoint and redeploys it after repeated failures.
#[derive(Debug, Clone)]
pub struct HealthcheckJob {
    hash: String,
    probe: Arc<dyn HealthProbe>,
    redeployer: Arc<dyn Redeployer>,
    config: HealthcheckConfig,
}

impl HealthcheckJob {
    /// Creates a job watching the service `hash`.
    pub fn new(
        hash: impl Into<String>,
        probe: Arc<dyn HealthProbe>,
        redeployer: Arc<dyn Redeployer>,
        config: HealthcheckConfig,
    ) -> Self {
        Self { hash: hash.into(), probe, redeployer, config }
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = self.watch() => {}
        }
        debug!(service = %self.hash, "healthcheck job stopped");
    }

    async fn watch(&self) {
        loop {
            self.wait_for_startup().await;

            let mut failures = 0;
            while failures < self.config.max_failures {
                tokio::time::sleep(self.config.period).await;
                if self.probe.check().await {
                    failures = 0;
                } else {
                    failures += 1;
                    debug!(service = %self.hash, failures, "healthcheck failed");
                }
            }

            warn!(service = %self.hash, failures, "service unhealthy, redeploying");
            if let Err(err) = self.redeployer.redeploy(&self.hash).await {
                warn!(service = %self.hash, %err, "redeployment failed");
            }
        }
    }

    /// Polls until the service is healthy or the startup timeout elapses.
    async fn wait_for_startup(&self) {
        let deadline = Instant::now() + self.config.startup_timeout;
        while Instant::now() < deadline {
            if self.probe.check().await {
                info!(service = %self.hash, "service is up");
                return;
            }
            tokio::time::sleep(self.config.period).await;
        }
        warn!(service = %self.hash, "service did not come up in time");
    }
}
