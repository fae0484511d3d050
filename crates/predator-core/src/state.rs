//! Shared orchestration state.
//!
//! The in-flight fetch flag, the in-flight download flag and the active
//! cancellation handle are the only state touched from more than one task.
//! They are never exposed as bare primitives: every change goes through one
//! of the transition methods below, which use compare-and-set so that two
//! racing callers cannot both win.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Logical state of the session as seen by the control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing resolved, nothing running.
    Idle,
    /// A metadata fetch is in flight.
    Fetching,
    /// A catalog is available and no download runs.
    Ready,
    /// A download session is active.
    Downloading,
    /// Cancellation was requested and the engine has not returned yet.
    Canceling,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Fetching => write!(f, "Fetching"),
            Self::Ready => write!(f, "Ready"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Canceling => write!(f, "Canceling"),
        }
    }
}

/// Single-flight flags and the cancellation handle.
#[derive(Debug, Default)]
pub struct OrchestrationState {
    fetch_in_flight: AtomicBool,
    download_in_flight: AtomicBool,
    cancel_requested: AtomicBool,
    cancel_handle: Mutex<Option<CancellationToken>>,
}

impl OrchestrationState {
    /// Create a state with no activity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the fetch slot. Returns `false` if a fetch is already in flight.
    pub fn try_begin_fetch(&self) -> bool {
        let claimed = self
            .fetch_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            debug!("Fetch slot busy");
        }
        claimed
    }

    /// Release the fetch slot.
    pub fn finish_fetch(&self) {
        self.fetch_in_flight.store(false, Ordering::Release);
    }

    /// Whether a fetch is in flight.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.fetch_in_flight.load(Ordering::Acquire)
    }

    /// Claim the download slot and install a fresh cancellation handle.
    ///
    /// Returns `None` if a download is already active.
    pub fn try_begin_download(&self) -> Option<CancellationToken> {
        if self
            .download_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Download slot busy");
            return None;
        }

        let token = CancellationToken::new();
        self.cancel_requested.store(false, Ordering::Release);
        *self.handle() = Some(token.clone());
        Some(token)
    }

    /// Signal the active download to stop.
    ///
    /// Returns `true` only for the first request against an active download.
    pub fn request_cancel(&self) -> bool {
        if !self.is_downloading() {
            return false;
        }

        let guard = self.handle();
        let Some(token) = guard.as_ref() else {
            return false;
        };
        if self
            .cancel_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        token.cancel();
        true
    }

    /// Release the download slot and drop the cancellation handle.
    pub fn finish_download(&self) {
        self.handle().take();
        self.cancel_requested.store(false, Ordering::Release);
        self.download_in_flight.store(false, Ordering::Release);
    }

    /// Whether a download is active.
    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.download_in_flight.load(Ordering::Acquire)
    }

    /// Whether cancellation of the active download was requested.
    #[must_use]
    pub fn is_canceling(&self) -> bool {
        self.is_downloading() && self.cancel_requested.load(Ordering::Acquire)
    }

    /// Whether a cancellation handle is currently installed.
    #[must_use]
    pub fn has_cancel_handle(&self) -> bool {
        self.handle().is_some()
    }

    /// Derive the session state. Downloads take precedence over fetches.
    #[must_use]
    pub fn session_state(&self, has_catalog: bool) -> SessionState {
        if self.is_downloading() {
            if self.cancel_requested.load(Ordering::Acquire) {
                SessionState::Canceling
            } else {
                SessionState::Downloading
            }
        } else if self.is_fetching() {
            SessionState::Fetching
        } else if has_catalog {
            SessionState::Ready
        } else {
            SessionState::Idle
        }
    }

    fn handle(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        // The guarded value is a plain Option; a panic mid-update cannot
        // leave it inconsistent.
        self.cancel_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_fetch_slot_is_single_flight() {
        let state = OrchestrationState::new();

        assert!(state.try_begin_fetch());
        assert!(!state.try_begin_fetch());
        assert!(state.is_fetching());

        state.finish_fetch();
        assert!(!state.is_fetching());
        assert!(state.try_begin_fetch());
    }

    #[test]
    fn test_download_slot_is_single_flight() {
        let state = OrchestrationState::new();

        let token = state.try_begin_download();
        assert!(token.is_some());
        assert!(state.try_begin_download().is_none());
        assert!(state.has_cancel_handle());

        state.finish_download();
        assert!(!state.is_downloading());
        assert!(!state.has_cancel_handle());
        assert!(state.try_begin_download().is_some());
    }

    #[test]
    fn test_flags_are_independent() {
        let state = OrchestrationState::new();

        assert!(state.try_begin_download().is_some());
        assert!(state.try_begin_fetch());
        assert_eq!(state.session_state(true), SessionState::Downloading);

        state.finish_download();
        assert_eq!(state.session_state(true), SessionState::Fetching);

        state.finish_fetch();
        assert_eq!(state.session_state(true), SessionState::Ready);
        assert_eq!(state.session_state(false), SessionState::Idle);
    }

    #[test]
    fn test_cancel_without_download_is_noop() {
        let state = OrchestrationState::new();
        assert!(!state.request_cancel());
        assert!(!state.is_canceling());
    }

    #[test]
    fn test_cancel_signals_token_once() {
        let state = OrchestrationState::new();
        let token = state.try_begin_download().unwrap();

        assert!(state.request_cancel());
        assert!(token.is_cancelled());
        assert!(state.is_canceling());
        assert_eq!(state.session_state(true), SessionState::Canceling);

        assert!(!state.request_cancel());
    }

    #[test]
    fn test_new_session_gets_fresh_token() {
        let state = OrchestrationState::new();
        let first = state.try_begin_download().unwrap();
        state.request_cancel();
        state.finish_download();

        let second = state.try_begin_download().unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!state.is_canceling());
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let state = Arc::new(OrchestrationState::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.try_begin_fetch())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }
}
