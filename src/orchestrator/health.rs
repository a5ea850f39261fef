use std::time::Duration;

use anyhow::{bail, Context, Result};
use backon::{ConstantBuilder, Retryable};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::model::HealthCheck;

/// Upper bound for a single health check attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { elapsed: Duration },
    TimedOut { elapsed: Duration },
    Cancelled,
}

/// Polls a health check until it passes, the deadline hits, or shutdown
/// begins.
#[derive(Debug, Clone)]
pub struct HealthGate {
    interval: Duration,
    client: reqwest::Client,
}

impl HealthGate {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            interval: POLL_INTERVAL,
            client,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn wait(
        &self,
        label: &str,
        check: &HealthCheck,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> HealthOutcome {
        let start = Instant::now();
        let deadline = start + timeout;

        let poll = (|| async { self.check_once(check).await })
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.interval)
                    .with_max_times(usize::MAX),
            )
            .notify(|err: &anyhow::Error, dur: Duration| {
                debug!(service = %label, "health check failed: {:#}, retrying in {:?}", err, dur);
            });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => HealthOutcome::Cancelled,
            result = tokio::time::timeout_at(deadline, poll) => match result {
                Ok(Ok(())) => HealthOutcome::Healthy { elapsed: start.elapsed() },
                Ok(Err(_)) | Err(_) => HealthOutcome::TimedOut { elapsed: start.elapsed() },
            },
        }
    }

    /// One attempt, bounded by [`ATTEMPT_TIMEOUT`].
    async fn check_once(&self, check: &HealthCheck) -> Result<()> {
        match check {
            HealthCheck::Http { url, .. } => {
                let response = self.client.get(url).send().await.context("HTTP health check")?;
                // Any answer short of a server error counts as up.
                if response.status().is_server_error() {
                    bail!("HTTP health check returned status {}", response.status());
                }
                Ok(())
            }
            HealthCheck::Tcp { host, port, .. } => {
                tokio::time::timeout(
                    ATTEMPT_TIMEOUT,
                    tokio::net::TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .context("TCP connect timed out")?
                .context("TCP connect failed")?;
                Ok(())
            }
        }
    }
}
