//! Cooperative stop token
//!
//! Shared by the lifecycle coordinator, the Ctrl-C handler and both execution
//! contexts. Loops check `should_stop()` between polls; idle loops can block in
//! `wait_timeout()` and are woken as soon as a stop is requested.
//!
//! ```no_run
//! use chainsnap_core::resilience::StopToken;
//!
//! let stop = StopToken::new();
//! stop.install_ctrlc().expect("ctrl-c handler");
//!
//! while !stop.should_stop() {
//!     // poll, process...
//! }
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Condvar, Mutex};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StopState {
    Running = 0,
    Stopping = 1,
}

impl From<u8> for StopState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Stopping,
            _ => Self::Running,
        }
    }
}

struct StopReason {
    reason: Option<String>,
    time: Option<SystemTime>,
}

/// Thread-safe, clonable stop flag
#[derive(Clone)]
pub struct StopToken {
    state: Arc<AtomicU8>,
    reason: Arc<Mutex<StopReason>>,
    wake: Arc<Condvar>,
}

impl StopToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(StopState::Running as u8)),
            reason: Arc::new(Mutex::new(StopReason {
                reason: None,
                time: None,
            })),
            wake: Arc::new(Condvar::new()),
        }
    }

    /// Route Ctrl-C / SIGTERM to `stop`
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || token.stop("interrupt received"))?;
        info!("Ctrl-C handler installed");
        Ok(())
    }

    #[inline]
    pub fn should_stop(&self) -> bool {
        self.state() == StopState::Stopping
    }

    pub fn state(&self) -> StopState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Request a stop; the first reason wins
    pub fn stop(&self, reason: &str) {
        let mut guard = self.reason.lock();
        let previous = self
            .state
            .swap(StopState::Stopping as u8, Ordering::AcqRel);
        if StopState::from(previous) == StopState::Running {
            info!(reason, "stop requested");
            guard.reason = Some(reason.to_string());
            guard.time = Some(SystemTime::now());
        }
        self.wake.notify_all();
    }

    /// Sleep up to `timeout`, returning early on stop. Returns `should_stop()`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.reason.lock();
        if !self.should_stop() {
            self.wake.wait_for(&mut guard, timeout);
        }
        self.should_stop()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().reason.clone()
    }

    pub fn stop_time(&self) -> Option<SystemTime> {
        self.reason.lock().time
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_new_token_is_running() {
        let token = StopToken::new();
        assert!(!token.should_stop());
        assert_eq!(token.reason(), None);
    }

    #[test]
    fn test_first_reason_wins() {
        let token = StopToken::new();
        token.stop("first");
        token.stop("second");
        assert!(token.should_stop());
        assert_eq!(token.reason(), Some("first".to_string()));
        assert!(token.stop_time().is_some());
    }

    #[test]
    fn test_wait_wakes_on_stop() {
        let token = StopToken::new();
        let remote = token.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.stop("test");
        });

        let started = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_when_running() {
        let token = StopToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
    }
}
