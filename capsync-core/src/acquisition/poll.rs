//! Bounded polling

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Probe something at a fixed interval, at most `max_attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedPoll {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl BoundedPoll {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn from_config(config: &crate::config::AcquisitionConfig) -> Self {
        Self::new(config.poll_interval(), config.max_poll_attempts)
    }

    /// Call `probe` with the 1-based attempt number until it yields a value.
    ///
    /// The first probe runs immediately; later probes wait `interval`.
    /// Exhausting every attempt returns [`Error::Timeout`]. Probe errors end
    /// polling early.
    pub async fn run<T, F, Fut>(&self, mut probe: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.interval).await;
            }
            if let Some(value) = probe(attempt).await? {
                return Ok(value);
            }
        }

        Err(Error::Timeout {
            attempts: self.max_attempts,
        })
    }
}
