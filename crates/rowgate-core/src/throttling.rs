use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::ConfigError;

/// Added to every computed wait so the oldest admission has fully left the
/// window when the check runs again.
pub const SAFETY_BUFFER: Duration = Duration::from_millis(10);

/// Result of one admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Timestamp recorded in the window for this call.
    pub at: Instant,
    /// Time spent queued or sleeping before admission.
    pub waited: Duration,
}

/// Sliding-window rate limiter: at most `max_requests` admissions inside any
/// trailing `window`.
///
/// The whole prune/check/append sequence runs while holding one
/// `tokio::sync::Mutex`, including the sleep when the window is full. Tokio's
/// mutex hands the lock out in FIFO order, so concurrent callers are admitted
/// strictly one after another and can never interleave their
/// read-modify-write of the timestamp log.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, ConfigError> {
        if max_requests == 0 {
            return Err(ConfigError::ZeroRequestsPerWindow);
        }
        if window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }

        let max_requests = max_requests as usize;
        Ok(Self {
            max_requests,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests)),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(config.requests_per_window, config.window_length)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Suspends until one more call fits in the window, then records it.
    pub async fn admit(&self) -> Admission {
        let queued_at = Instant::now();
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            prune(&mut admitted, now, self.window);

            if admitted.len() < self.max_requests {
                admitted.push_back(now);
                return Admission {
                    at: now,
                    waited: now.saturating_duration_since(queued_at),
                };
            }

            // Full window: wait for the oldest admission to age out, then
            // re-check rather than assume the slot is ours.
            let wait = admitted
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default()
                + SAFETY_BUFFER;
            debug!(
                wait_ms = wait.as_millis() as u64,
                in_window = admitted.len(),
                "rate window full; delaying admission"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Admissions currently inside the trailing window.
    pub async fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock().await;
        prune(&mut admitted, Instant::now(), self.window);
        admitted.len()
    }
}

fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = admitted.front() {
        if now.saturating_duration_since(*oldest) >= window {
            admitted.pop_front();
        } else {
            break;
        }
    }
}
