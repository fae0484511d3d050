//! Debounced fetch trigger.
//!
//! Every input change cancels the pending timer and, for non-empty input,
//! arms a new one. Only when the input has been quiet for the whole window
//! does [`DebouncedTrigger::fired`] yield a [`FetchRequest`].

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use tracing::debug;

/// Default quiescence window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(600);

/// A metadata request produced once input settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Trimmed, non-empty URL.
    pub url: String,
    /// Input generation this request was made from.
    pub token: u64,
}

#[derive(Debug)]
struct Pending {
    url: String,
    token: u64,
    deadline: Pin<Box<Sleep>>,
}

/// Collapses bursts of input changes into a single request.
#[derive(Debug)]
pub struct DebouncedTrigger {
    window: Duration,
    generation: u64,
    pending: Option<Pending>,
}

impl DebouncedTrigger {
    /// Create a trigger with the given quiescence window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            generation: 0,
            pending: None,
        }
    }

    /// Register an input change.
    ///
    /// Returns `true` if a timer was armed.
    pub fn on_input(&mut self, text: &str) -> bool {
        self.generation += 1;
        if self.pending.take().is_some() {
            debug!("Debounce timer reset");
        }

        let url = text.trim();
        if url.is_empty() {
            return false;
        }

        self.pending = Some(Pending {
            url: url.to_string(),
            token: self.generation,
            deadline: Box::pin(sleep(self.window)),
        });
        true
    }

    /// Drop the pending timer, if any.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Whether a timer is armed.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Generation of the most recent input change.
    #[must_use]
    pub const fn latest_token(&self) -> u64 {
        self.generation
    }

    /// Wait for the armed timer to fire.
    ///
    /// Never resolves while nothing is armed. Cancel safe: dropping the
    /// future keeps the timer armed.
    pub async fn fired(&mut self) -> FetchRequest {
        let Some(pending) = self.pending.as_mut() else {
            return future::pending().await;
        };
        pending.deadline.as_mut().await;

        match self.pending.take() {
            Some(Pending { url, token, .. }) => FetchRequest { url, token },
            None => future::pending().await,
        }
    }
}

impl Default for DebouncedTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{Instant, advance, timeout};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_window() {
        let mut trigger = DebouncedTrigger::default();
        let start = Instant::now();

        assert!(trigger.on_input("  https://example.com/watch?v=1  "));
        let request = trigger.fired().await;

        assert_eq!(request.url, "https://example.com/watch?v=1");
        assert_eq!(request.token, 1);
        assert!(start.elapsed() >= DEFAULT_DEBOUNCE);
        assert!(!trigger.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_latest_input() {
        let mut trigger = DebouncedTrigger::default();

        for text in ["h", "ht", "https://a", "https://ab"] {
            trigger.on_input(text);
            advance(Duration::from_millis(100)).await;
        }

        let request = trigger.fired().await;
        assert_eq!(request.url, "https://ab");
        assert_eq!(request.token, 4);

        // Nothing else is pending.
        let second = timeout(Duration::from_secs(5), trigger.fired()).await;
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_clears_pending() {
        let mut trigger = DebouncedTrigger::default();

        trigger.on_input("https://a");
        assert!(!trigger.on_input("   "));
        assert!(!trigger.is_pending());

        let fired = timeout(Duration::from_secs(5), trigger.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_window() {
        let mut trigger = DebouncedTrigger::new(Duration::from_millis(600));
        let start = Instant::now();

        trigger.on_input("https://a");
        advance(Duration::from_millis(500)).await;
        trigger.on_input("https://b");

        let request = trigger.fired().await;
        assert_eq!(request.url, "https://b");
        assert!(start.elapsed() >= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_wait_keeps_timer_armed() {
        let mut trigger = DebouncedTrigger::default();
        trigger.on_input("https://a");

        let early = timeout(Duration::from_millis(100), trigger.fired()).await;
        assert!(early.is_err());
        assert!(trigger.is_pending());

        assert_eq!(trigger.fired().await.url, "https://a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_increase_on_every_change() {
        let mut trigger = DebouncedTrigger::default();
        assert_eq!(trigger.latest_token(), 0);

        trigger.on_input("");
        trigger.on_input("x");
        assert_eq!(trigger.latest_token(), 2);
    }
}
