//! Background expiry sweep.
//!
//! A dedicated thread that periodically removes expired rate-limit windows
//! and IP block entries so keyed state never grows without bound. The sweep
//! takes the same per-map locks as foreground checks; it holds each lock
//! only for the duration of one `retain` pass.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::blocklist::IpBlocklist;
use crate::rate_limit::RateLimiter;

/// Default time between sweeps: 5 minutes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle to the sweep thread. Dropping it (or calling
/// [`shutdown`](Sweeper::shutdown)) stops the thread and joins it.
pub struct Sweeper {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start sweeping `rate_limiter` and `blocklist` every `interval`.
    pub fn spawn(
        rate_limiter: Arc<RateLimiter>,
        blocklist: Arc<IpBlocklist>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || loop {
            match shutdown_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let now = Utc::now();
                    let removed =
                        rate_limiter.sweep_expired(now) + blocklist.sweep_expired(now);
                    debug!(removed, "expiry sweep complete");
                }
            }
        });
        Sweeper {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            // Ignore send errors: the thread may already have exited.
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_sweeper_shutdown_joins_cleanly() {
        let limiter = Arc::new(RateLimiter::new());
        let blocklist = Arc::new(IpBlocklist::new());
        let sweeper = Sweeper::spawn(limiter, blocklist, Duration::from_secs(300));
        sweeper.shutdown();
    }

    #[test]
    fn test_sweeper_removes_expired_entries() {
        let limiter = Arc::new(RateLimiter::new());
        let blocklist = Arc::new(IpBlocklist::new());

        let past = Utc::now() - ChronoDuration::minutes(10);
        limiter.check_at(
            "stale",
            "/e",
            &crate::rate_limit::RateLimitConfig::new(1_000, 5),
            past,
        );
        blocklist.block_at("stale-ip", ChronoDuration::seconds(1), "test", past);
        assert_eq!(limiter.active_windows(), 1);
        assert_eq!(blocklist.active_blocks(), 1);

        let sweeper = Sweeper::spawn(
            Arc::clone(&limiter),
            Arc::clone(&blocklist),
            Duration::from_millis(20),
        );
        // Give the thread a couple of intervals to run.
        std::thread::sleep(Duration::from_millis(200));
        sweeper.shutdown();

        assert_eq!(limiter.active_windows(), 0);
        assert_eq!(blocklist.active_blocks(), 0);
    }

    #[test]
    fn test_drop_stops_thread() {
        let limiter = Arc::new(RateLimiter::new());
        let blocklist = Arc::new(IpBlocklist::new());
        {
            let _sweeper = Sweeper::spawn(limiter, blocklist, Duration::from_millis(10));
        }
        // Dropped without explicit shutdown; nothing to assert beyond not
        // hanging or panicking.
    }
}
