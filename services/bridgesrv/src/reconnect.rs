//! Reconnection helper
//!
//! Fixed-interval retry loop used to bring the serial link back after a
//! failure. Each round waits a short backoff, attempts to reopen the link,
//! and on failure waits the poll interval before the next round.

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconnection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    /// Maximum attempts reached
    #[error("Maximum reconnection attempts exceeded")]
    MaxAttemptsExceeded,

    /// Shutdown requested while waiting
    #[error("Reconnection cancelled")]
    Cancelled,
}

/// Reconnection policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum attempts per outage (0 means unlimited)
    pub max_attempts: u32,
    /// Wait between a failed attempt and the next round
    pub poll_interval: Duration,
    /// Wait before each reopen
    pub backoff: Duration,
    /// Add up to ±25% random jitter to every wait
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            poll_interval: Duration::from_secs(5),
            backoff: Duration::from_secs(2),
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(poll_interval_ms: u64, backoff_ms: u64, jitter: bool, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            poll_interval: Duration::from_millis(poll_interval_ms),
            backoff: Duration::from_millis(backoff_ms),
            jitter,
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        // Sub-millisecond delays leave no range to draw from
        if !self.jitter || delay.as_millis() == 0 {
            return delay;
        }
        let jitter_range = delay.as_millis() as f64 * 0.25;
        let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
        let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Reconnection statistics, accumulated over every outage
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    /// Attempts per outage limit was hit
    pub gave_up: u64,
    #[serde(skip)]
    pub last_connected: Option<Instant>,
}

/// Drives reconnect attempts according to a [`ReconnectPolicy`]
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    stats: Mutex<ReconnectStats>,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            stats: Mutex::new(ReconnectStats::default()),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn stats(&self) -> ReconnectStats {
        self.stats.lock().clone()
    }

    /// Retry `connect_fn` until it succeeds, the attempt limit is hit or
    /// `cancel` fires
    pub async fn reconnect_until<F, Fut, E>(
        &self,
        cancel: &CancellationToken,
        mut connect_fn: F,
    ) -> Result<u32, ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            if self.policy.max_attempts > 0 && attempt >= self.policy.max_attempts {
                warn!(
                    "Maximum reconnection attempts ({}) exceeded",
                    self.policy.max_attempts
                );
                self.stats.lock().gave_up += 1;
                return Err(ReconnectError::MaxAttemptsExceeded);
            }
            attempt += 1;
            self.stats.lock().total_attempts += 1;

            sleep_or_cancel(cancel, self.policy.apply_jitter(self.policy.backoff)).await?;

            debug!("Reconnection attempt {attempt}");
            match connect_fn().await {
                Ok(()) => {
                    let mut stats = self.stats.lock();
                    stats.successful_reconnects += 1;
                    stats.last_connected = Some(Instant::now());
                    drop(stats);
                    info!("Reconnected after {attempt} attempt(s)");
                    return Ok(attempt);
                },
                Err(e) => {
                    self.stats.lock().failed_reconnects += 1;
                    warn!(
                        "Reconnection attempt {attempt} failed: {e}; retrying in {:?}",
                        self.policy.poll_interval
                    );
                },
            }

            sleep_or_cancel(cancel, self.policy.apply_jitter(self.policy.poll_interval)).await?;
        }
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> Result<(), ReconnectError> {
    tokio::select! {
        () = cancel.cancelled() => Err(ReconnectError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
