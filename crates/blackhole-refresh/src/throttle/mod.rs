//! Replication-lag backpressure.
//!
//! [`ReplicationThrottle`] is a proportional controller: after every batch
//! it measures lag and, when lag is above the ceiling, sleeps for a time
//! proportional to the observed lag. Higher lag means longer pauses, which
//! gives replicas room to drain the binlog before the next batch.
//!
//! [`RateCap`] optionally caps the average copy rate independently of lag.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::ThrottleConfig;
use crate::error::{RefreshError, Result};
use crate::session::Session;

/// Lag-driven pacing for the copy loop.
#[derive(Debug, Clone)]
pub struct ReplicationThrottle {
    config: ThrottleConfig,
}

impl ReplicationThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Current replica lag as reported by the configured lag query.
    ///
    /// No row or a NULL value means nothing is replicating, which counts as
    /// zero lag.
    pub async fn measure_lag<S: Session>(&self, session: &mut S) -> Result<Duration> {
        let sql = self.config.lag_query.as_str();
        let value = session
            .query_row(sql)
            .await?
            .and_then(|row| row.into_iter().next().flatten());

        let Some(text) = value else {
            debug!("Lag query returned no value; treating lag as zero");
            return Ok(Duration::ZERO);
        };
        let seconds: f64 = text.trim().parse().map_err(|e| {
            RefreshError::statement(sql, format!("lag is not a number ('{}'): {}", text, e))
        })?;
        Duration::try_from_secs_f64(seconds.max(0.0))
            .map_err(|e| RefreshError::statement(sql, format!("lag {} out of range: {}", seconds, e)))
    }

    /// Sleep to apply for an observed lag. Zero at or below the ceiling.
    pub fn backoff_for(&self, lag: Duration) -> Duration {
        if lag <= self.config.max_lag() {
            return Duration::ZERO;
        }
        let wanted = lag.as_secs_f64() * self.config.backoff_factor;
        Duration::try_from_secs_f64(wanted)
            .unwrap_or(Duration::MAX)
            .min(self.config.max_sleep())
    }

    /// Block until lag is at or below the ceiling.
    ///
    /// Polls every `poll_interval`, ending the open transaction before each
    /// poll so the lag query sees fresh data. Fails with
    /// [`RefreshError::ReplicationTimeout`] once `max_wait` has passed and
    /// lag is still too high.
    pub async fn wait_until_caught_up<S: Session>(&self, session: &mut S) -> Result<()> {
        let max_lag = self.config.max_lag();
        let max_wait = self.config.max_wait();
        let started = Instant::now();

        loop {
            session.rollback().await?;
            let lag = self.measure_lag(session).await?;
            if lag <= max_lag {
                info!("Replication caught up (lag {:.1}s)", lag.as_secs_f64());
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(RefreshError::ReplicationTimeout {
                    lag,
                    max_lag,
                    waited,
                });
            }

            let pause = self.config.poll_interval().min(max_wait - waited);
            warn!(
                "Replication lag {:.1}s above {:.1}s; waiting (elapsed {:.0}s of {:.0}s)",
                lag.as_secs_f64(),
                max_lag.as_secs_f64(),
                waited.as_secs_f64(),
                max_wait.as_secs_f64()
            );
            sleep(pause).await;
        }
    }

    /// Per-batch check. Sleeps in proportion to lag when it is over the
    /// ceiling and returns the time slept.
    pub async fn throttle<S: Session>(&self, session: &mut S) -> Result<Duration> {
        let lag = self.measure_lag(session).await?;
        let pause = self.backoff_for(lag);
        if !pause.is_zero() {
            info!(
                "Throttling for {:.1}s (replication lag {:.1}s)",
                pause.as_secs_f64(),
                lag.as_secs_f64()
            );
            sleep(pause).await;
        }
        Ok(pause)
    }
}

/// Keeps the average copy rate at or below a fixed number of rows per second.
#[derive(Debug)]
pub struct RateCap {
    rows_per_second: u64,
    started: Instant,
}

impl RateCap {
    pub fn new(rows_per_second: u64) -> Self {
        Self {
            rows_per_second: rows_per_second.max(1),
            started: Instant::now(),
        }
    }

    /// Sleep needed so that `rows_copied` rows took at least the capped time.
    pub fn delay_for(&self, rows_copied: u64, elapsed: Duration) -> Duration {
        let budget = Duration::try_from_secs_f64(rows_copied as f64 / self.rows_per_second as f64)
            .unwrap_or(Duration::MAX);
        budget.saturating_sub(elapsed)
    }

    /// Sleep as needed after `rows_copied` rows in total.
    pub async fn pace(&self, rows_copied: u64) -> Duration {
        let pause = self.delay_for(rows_copied, self.started.elapsed());
        if !pause.is_zero() {
            debug!(
                "Rate cap {} rows/s: sleeping {:.2}s",
                self.rows_per_second,
                pause.as_secs_f64()
            );
            sleep(pause).await;
        }
        pause
    }
}
