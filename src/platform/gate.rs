//! Process-wide outbound throttle.
//!
//! One watermark ("no request before this instant") shared by every client
//! call in the process. When the platform answers 429/5xx, the failing call
//! pushes the watermark forward and every other caller waits too, instead of
//! each call discovering the rate limit on its own.

use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 30_000;

#[derive(Clone, Default)]
pub struct RateGate {
    next_allowed: Arc<Mutex<Option<Instant>>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until the shared watermark has passed (no-op when clear).
    pub async fn wait_ready(&self) {
        let deadline = {
            let guard = self
                .next_allowed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard
        };
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if deadline > now {
                debug!(wait_ms = (deadline - now).as_millis() as u64, "rate gate holding");
                sleep(deadline - now).await;
            }
            let mut guard = self
                .next_allowed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Only clear if nobody pushed it further while we slept.
            if guard.map(|d| d <= Instant::now()).unwrap_or(false) {
                *guard = None;
            }
        }
    }

    /// Move the watermark forward; keeps the later of current and requested.
    pub fn push_back(&self, delay: Duration) {
        let candidate = Instant::now() + delay;
        let mut guard = self
            .next_allowed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *guard {
            Some(existing) if existing >= candidate => {}
            _ => *guard = Some(candidate),
        }
    }

    /// Whether the gate currently has a pending hold.
    pub fn is_held(&self) -> bool {
        self.next_allowed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map(|d| d > Instant::now())
            .unwrap_or(false)
    }
}

/// Delay before retry `attempt` (1-based): the server's retry-after hint when
/// present, else exponential backoff with jitter, capped.
pub fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(hint) = retry_after {
        return hint;
    }
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_hint_wins() {
        let d = backoff_delay(3, Some(Duration::from_secs(7)));
        assert_eq!(d, Duration::from_secs(7));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let d1 = backoff_delay(1, None);
        assert!(d1 >= Duration::from_millis(BACKOFF_BASE_MS));
        let d5 = backoff_delay(5, None);
        assert!(d5 >= Duration::from_millis(BACKOFF_BASE_MS * 16));
        let d20 = backoff_delay(20, None);
        assert!(d20 <= Duration::from_millis(BACKOFF_CAP_MS + BACKOFF_CAP_MS / 4 + 1));
    }

    #[test]
    fn push_back_keeps_latest_watermark() {
        let gate = RateGate::new();
        assert!(!gate.is_held());
        gate.push_back(Duration::from_secs(5));
        assert!(gate.is_held());
        // An earlier deadline must not pull the watermark back.
        gate.push_back(Duration::from_millis(1));
        let held = gate
            .next_allowed
            .lock()
            .unwrap()
            .expect("watermark should be set");
        assert!(held > Instant::now() + Duration::from_secs(4));
    }

    #[tokio::test]
    async fn wait_ready_clears_expired_watermark() {
        let gate = RateGate::new();
        gate.push_back(Duration::from_millis(10));
        gate.wait_ready().await;
        assert!(!gate.is_held());
    }
}
