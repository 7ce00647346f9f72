use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::types::VmId;
use crate::{HypervisorDriver, Result, env};

/// Result of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    Ready { value: T, attempts: u32 },
    TimedOut { attempts: u32 },
}

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for Retry {
    /// 30 attempts, 10 seconds apart.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

impl Retry {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Create from env vars:
    ///
    /// - `ADDRESS_POLL_INTERVAL_SECS` (default: `10`)
    /// - `ADDRESS_MAX_ATTEMPTS` (default: `30`)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            interval: env::secs_or("ADDRESS_POLL_INTERVAL_SECS", 10)?,
            max_attempts: env::parse_or("ADDRESS_MAX_ATTEMPTS", 30)?,
        })
    }

    /// Call `probe` until it yields a value or the budget runs out. The probe
    /// receives the 1-based attempt number; sleeps happen only between attempts.
    pub async fn poll<T, F, Fut>(&self, mut probe: F) -> Polled<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = probe(attempt).await {
                return Polled::Ready {
                    value,
                    attempts: attempt,
                };
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Polled::TimedOut {
            attempts: self.max_attempts,
        }
    }
}

/// Poll the guest's reported address. Query errors count as a miss.
pub async fn wait_for_address(
    driver: &dyn HypervisorDriver,
    id: &VmId,
    retry: &Retry,
) -> Polled<String> {
    let polled = retry
        .poll(|attempt| async move {
            match driver.resolve_guest_address(id).await {
                Ok(Some(address)) => Some(address),
                Ok(None) => {
                    debug!(vm_id = %id, attempt, "guest address not reported yet");
                    None
                }
                Err(e) => {
                    warn!(vm_id = %id, attempt, error = %e, "guest address query failed");
                    None
                }
            }
        })
        .await;

    match &polled {
        Polled::Ready { value, attempts } => {
            info!(vm_id = %id, address = %value, attempts, "guest address resolved")
        }
        Polled::TimedOut { attempts } => {
            warn!(vm_id = %id, attempts, "guest address not reported within retry budget")
        }
    }
    polled
}
