//! Download session lifecycle.
//!
//! A [`DownloadController`] runs at most one download at a time. Starting a
//! session claims the download slot in [`OrchestrationState`], spawns the
//! engine call on a background task and relays its progress samples, in
//! order, followed by a single completion event. The owner feeds those events
//! back through [`DownloadController::on_sample`] and
//! [`DownloadController::finish`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::{DownloadJob, EngineError, MediaEngine, ProgressSample, ProgressSink};
use crate::error::{Error, Result};
use crate::progress::{ProgressSmoother, ProgressUpdate};
use crate::selector::{DownloadSpec, FormatRequest};
use crate::state::OrchestrationState;

/// Identifies one download session.
pub type SessionId = u64;

/// Events produced by a running session's background task.
#[derive(Debug)]
pub enum SessionEvent {
    /// A raw progress sample from the engine.
    Sample {
        /// Session the sample belongs to.
        session: SessionId,
        /// The sample.
        sample: ProgressSample,
    },
    /// The engine call returned. Always the last event of a session.
    Finished {
        /// Session that finished.
        session: SessionId,
        /// What the engine returned.
        result: std::result::Result<(), EngineError>,
    },
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// The engine finished successfully.
    Completed,
    /// The session was canceled by the user.
    Canceled,
    /// The engine failed.
    Failed,
}

impl DownloadOutcome {
    /// Progress shown once the session has settled.
    #[must_use]
    pub const fn final_percent(self) -> f64 {
        match self {
            Self::Completed => 100.0,
            Self::Canceled | Self::Failed => 0.0,
        }
    }

    /// Final progress update for this outcome.
    #[must_use]
    pub const fn settled_update(self) -> ProgressUpdate {
        ProgressUpdate::settled(self.final_percent())
    }
}

impl From<&Result<()>> for DownloadOutcome {
    fn from(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(e) if e.is_canceled() => Self::Canceled,
            Err(_) => Self::Failed,
        }
    }
}

#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    cancel: CancellationToken,
}

/// Starts, cancels and settles download sessions.
pub struct DownloadController {
    engine: Arc<dyn MediaEngine>,
    state: Arc<OrchestrationState>,
    smoother: ProgressSmoother,
    active: Option<ActiveSession>,
    next_session: SessionId,
}

impl DownloadController {
    /// Create a controller sharing `state` with the rest of the control flow.
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        state: Arc<OrchestrationState>,
        smoothing_factor: f64,
    ) -> Self {
        Self {
            engine,
            state,
            smoother: ProgressSmoother::new(smoothing_factor, Instant::now()),
            active: None,
            next_session: 0,
        }
    }

    /// Id of the active session, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<SessionId> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Whether a session is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a download of `url`.
    ///
    /// Session events are delivered through `events`. Fails with
    /// [`Error::DownloadActive`] while another session runs, and with
    /// [`Error::InvalidSelection`] for an empty URL or output directory.
    pub fn start<M>(
        &mut self,
        url: &str,
        spec: &DownloadSpec,
        events: &mpsc::UnboundedSender<M>,
    ) -> Result<SessionId>
    where
        M: From<SessionEvent> + Send + 'static,
    {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidSelection("no URL".to_string()));
        }
        if spec.output_directory.as_os_str().is_empty() {
            return Err(Error::InvalidSelection("no output directory".to_string()));
        }

        let Some(cancel) = self.state.try_begin_download() else {
            return Err(Error::DownloadActive);
        };

        self.next_session += 1;
        let session = self.next_session;
        self.smoother.reset(Instant::now());

        let job = DownloadJob {
            url: url.to_string(),
            format: FormatRequest::for_kind(spec.kind),
            output_directory: spec.output_directory.clone(),
        };
        info!(
            "Starting download session {} for {} into {}",
            session,
            job.url,
            job.output_directory.display()
        );

        tokio::spawn(run_session(
            session,
            Arc::clone(&self.engine),
            job,
            cancel.clone(),
            events.clone(),
        ));

        self.active = Some(ActiveSession {
            id: session,
            cancel,
        });
        Ok(session)
    }

    /// Request cancellation of the active session.
    ///
    /// Returns `true` if this call signaled the engine. The session stays
    /// active until the engine returns.
    pub fn cancel(&self) -> bool {
        if self.active.is_none() {
            return false;
        }
        let signaled = self.state.request_cancel();
        if signaled {
            info!("Cancellation requested for session {:?}", self.active_session());
        }
        signaled
    }

    /// Smooth a sample from session `session`.
    ///
    /// Samples from sessions other than the active one are dropped.
    pub fn on_sample(
        &mut self,
        session: SessionId,
        sample: &ProgressSample,
    ) -> Option<ProgressUpdate> {
        if self.active_session() != Some(session) {
            debug!("Dropping sample from inactive session {}", session);
            return None;
        }
        self.smoother
            .observe(sample)
            .map(|reading| reading.to_update())
    }

    /// Settle session `session` with the engine's result.
    ///
    /// Releases the download slot and drops the cancellation handle. Returns
    /// `None` if `session` is not the active session.
    pub fn finish(
        &mut self,
        session: SessionId,
        result: std::result::Result<(), EngineError>,
    ) -> Option<DownloadOutcome> {
        if self.active_session() != Some(session) {
            debug!("Ignoring completion of inactive session {}", session);
            return None;
        }
        let active = self.active.take()?;

        let result = classify(result, active.cancel.is_cancelled());
        let outcome = DownloadOutcome::from(&result);
        match &result {
            Ok(()) => info!("Download session {} completed", session),
            Err(e) if e.is_canceled() => info!("Download session {} canceled", session),
            Err(e) => error!("Download session {} failed: {}", session, e),
        }

        self.state.finish_download();
        self.smoother.reset(Instant::now());
        Some(outcome)
    }
}

impl std::fmt::Debug for DownloadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadController")
            .field("active", &self.active)
            .field("next_session", &self.next_session)
            .finish_non_exhaustive()
    }
}

/// Any error after cancellation was requested counts as cancellation.
fn classify(result: std::result::Result<(), EngineError>, cancel_requested: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_canceled() || cancel_requested => {
            debug!("Engine stopped after cancellation: {}", e);
            Err(Error::DownloadCanceled)
        }
        Err(e) => Err(Error::DownloadEngine(e.to_string())),
    }
}

async fn run_session<M>(
    session: SessionId,
    engine: Arc<dyn MediaEngine>,
    job: DownloadJob,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<M>,
) where
    M: From<SessionEvent> + Send + 'static,
{
    let (sink, mut samples) = ProgressSink::channel();
    let mut transfer = tokio::spawn(async move { engine.download(&job, sink, cancel).await });

    let forward = |sample: ProgressSample| {
        // A closed channel means the owner is gone; keep draining so the
        // engine is never blocked.
        let _ = events.send(SessionEvent::Sample { session, sample }.into());
    };

    let joined = loop {
        tokio::select! {
            biased;
            Some(sample) = samples.recv() => forward(sample),
            joined = &mut transfer => break joined,
        }
    };
    while let Ok(sample) = samples.try_recv() {
        forward(sample);
    }

    let result = joined.unwrap_or_else(|e| {
        Err(EngineError::Other(if e.is_panic() {
            "engine task panicked".to_string()
        } else {
            format!("engine task aborted: {e}")
        }))
    });
    let _ = events.send(SessionEvent::Finished { session, result }.into());
}
