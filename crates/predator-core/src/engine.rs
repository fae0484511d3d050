//! The media engine seam.
//!
//! The core never talks to the network itself. Metadata lookups and
//! transfers are delegated to a [`MediaEngine`], which the orchestrator
//! drives from background tasks.
//!
//! # Cancellation
//!
//! [`MediaEngine::download`] receives a [`CancellationToken`]. Implementations
//! must select on it (or poll it) and return [`EngineError::Canceled`]
//! shortly after it fires. Callers wait for the call to return before
//! reporting a terminal state, so an engine that ignores the token keeps the
//! session in `Canceling` until the transfer ends on its own.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::selector::FormatRequest;

/// Errors reported by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The call stopped because its cancellation token fired.
    #[error("operation canceled")]
    Canceled,

    /// The call did not finish in time.
    #[error("operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The engine could not be started.
    #[error("failed to start engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine ran but exited unsuccessfully.
    #[error("engine exited with {code:?}: {stderr}")]
    Exited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Tail of the engine's diagnostic output.
        stderr: String,
    },

    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether the error is the result of cancellation.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Status attached to a progress sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStatus {
    /// Bytes are being transferred.
    Downloading,
    /// The transfer of the current stream is done; post-processing may follow.
    Finished,
    /// Anything else the engine reports.
    Other,
}

impl SampleStatus {
    /// Parse an engine status string such as `downloading` or `finished`.
    #[must_use]
    pub fn from_engine(status: &str) -> Self {
        match status.trim() {
            "downloading" => Self::Downloading,
            "finished" => Self::Finished,
            _ => Self::Other,
        }
    }
}

/// A raw progress report from the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Bytes transferred so far for the current stream.
    pub downloaded_bytes: u64,
    /// Exact size of the current stream, if known.
    pub total_bytes: Option<u64>,
    /// Estimated size of the current stream, if the exact size is unknown.
    pub total_bytes_estimate: Option<u64>,
    /// Remaining time as reported by the engine.
    pub eta: Option<Duration>,
    /// When the sample was taken.
    pub timestamp: Instant,
    /// Sample status.
    pub status: SampleStatus,
}

impl ProgressSample {
    /// Create a downloading sample with no size information.
    #[must_use]
    pub const fn downloading(downloaded_bytes: u64, timestamp: Instant) -> Self {
        Self {
            downloaded_bytes,
            total_bytes: None,
            total_bytes_estimate: None,
            eta: None,
            timestamp,
            status: SampleStatus::Downloading,
        }
    }

    /// Set the exact total size.
    #[must_use]
    pub const fn with_total(mut self, total_bytes: u64) -> Self {
        self.total_bytes = Some(total_bytes);
        self
    }

    /// Set the status.
    #[must_use]
    pub const fn with_status(mut self, status: SampleStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the engine-reported ETA.
    #[must_use]
    pub const fn with_eta(mut self, eta: Duration) -> Self {
        self.eta = Some(eta);
        self
    }

    /// Best known size of the current stream.
    #[must_use]
    pub fn expected_bytes(&self) -> Option<u64> {
        self.total_bytes
            .or(self.total_bytes_estimate)
            .filter(|&total| total > 0)
    }

    /// Completion of the current stream in percent (0.0 - 100.0).
    ///
    /// A finished sample with no size information counts as complete.
    #[must_use]
    pub fn percent(&self) -> f64 {
        match self.expected_bytes() {
            Some(total) => (self.downloaded_bytes as f64 / total as f64 * 100.0).min(100.0),
            None if self.status == SampleStatus::Finished => 100.0,
            None => 0.0,
        }
    }
}

/// Sending half of the progress channel handed to [`MediaEngine::download`].
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressSample>,
}

impl ProgressSink {
    /// Create a sink and the receiver that observes it.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressSample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a sample. Returns `false` if nobody is listening anymore.
    pub fn send(&self, sample: ProgressSample) -> bool {
        self.tx.send(sample).is_ok()
    }
}

/// Everything the engine needs to perform one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Resource URL.
    pub url: String,
    /// Format selection derived from the user's choice.
    pub format: FormatRequest,
    /// Directory the result is written to.
    pub output_directory: PathBuf,
}

/// The external capability that looks up metadata and transfers media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Dump the resource metadata as raw JSON.
    ///
    /// Implementations must give up once `timeout` has elapsed.
    async fn fetch_metadata(&self, url: &str, timeout: Duration) -> Result<String, EngineError>;

    /// Download the resource described by `job`.
    ///
    /// Progress is pushed through `progress` in emission order. The call must
    /// return [`EngineError::Canceled`] promptly once `cancel` fires.
    async fn download(
        &self,
        job: &DownloadJob,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_status_from_engine() {
        assert_eq!(
            SampleStatus::from_engine("downloading"),
            SampleStatus::Downloading
        );
        assert_eq!(SampleStatus::from_engine("finished"), SampleStatus::Finished);
        assert_eq!(SampleStatus::from_engine("error"), SampleStatus::Other);
    }

    #[test]
    fn test_percent_prefers_exact_total() {
        let now = Instant::now();
        let mut sample = ProgressSample::downloading(250, now).with_total(1000);
        sample.total_bytes_estimate = Some(500);
        assert_eq!(sample.percent(), 25.0);
    }

    #[test]
    fn test_percent_falls_back_to_estimate() {
        let mut sample = ProgressSample::downloading(250, Instant::now());
        sample.total_bytes_estimate = Some(500);
        assert_eq!(sample.percent(), 50.0);
    }

    #[test]
    fn test_percent_without_size() {
        let now = Instant::now();
        assert_eq!(ProgressSample::downloading(250, now).percent(), 0.0);
        let finished = ProgressSample::downloading(250, now).with_status(SampleStatus::Finished);
        assert_eq!(finished.percent(), 100.0);
    }

    #[test]
    fn test_percent_is_capped() {
        let sample = ProgressSample::downloading(1500, Instant::now()).with_total(1000);
        assert_eq!(sample.percent(), 100.0);
    }

    #[tokio::test]
    async fn test_progress_sink_delivers_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        let now = Instant::now();
        for bytes in [10, 20, 30] {
            assert!(sink.send(ProgressSample::downloading(bytes, now)));
        }
        drop(sink);

        let mut seen = Vec::new();
        while let Some(sample) = rx.recv().await {
            seen.push(sample.downloaded_bytes);
        }
        assert_eq!(seen, vec![10, 20, 30]);
    }

    #[test]
    fn test_progress_sink_reports_closed_receiver() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        assert!(!sink.send(ProgressSample::downloading(1, Instant::now())));
    }
}
