//! The control flow.
//!
//! One [`Orchestrator`] task owns every piece of UI-facing state: the current
//! input, the resolved metadata and catalog, and the phase last reported to
//! the presentation layer. Presentation code talks to it through an
//! [`OrchestratorHandle`] and listens to [`CoreEvent`]s. Metadata fetches and
//! downloads run on background tasks and report back over an internal
//! channel, so state is only ever mutated from the control task.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = Arc::new(YtDlpEngine::from_config(&config));
//! let (handle, mut events, task) = Orchestrator::spawn(engine, config);
//!
//! handle.input_changed("https://example.com/watch?v=1")?;
//! while let Some(event) = events.recv().await {
//!     if let CoreEvent::CatalogReady { .. } = event {
//!         handle.start_download(DownloadSpec::video(Resolution::Height(720), "out"))?;
//!     }
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::CoreConfig;
use crate::debounce::{DebouncedTrigger, FetchRequest};
use crate::engine::MediaEngine;
use crate::error::{Error, FetchFailure, Result};
use crate::metadata::{Catalog, MetadataResolver, ResourceMetadata};
use crate::progress::ProgressUpdate;
use crate::selector::{DownloadKind, DownloadSpec};
use crate::session::{DownloadController, DownloadOutcome, SessionEvent};
use crate::state::{OrchestrationState, SessionState};

/// Phase shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing resolved yet.
    Idle,
    /// Metadata fetch in flight.
    Fetching,
    /// Catalog available.
    Ready,
    /// Download running.
    Downloading,
    /// Cancellation requested, waiting for the engine.
    Canceling,
    /// Last download finished successfully.
    Completed,
    /// Last download was canceled.
    Canceled,
    /// Last download failed.
    Failed,
}

impl Phase {
    /// Whether this phase ends a download session.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

impl From<SessionState> for Phase {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Idle => Self::Idle,
            SessionState::Fetching => Self::Fetching,
            SessionState::Ready => Self::Ready,
            SessionState::Downloading => Self::Downloading,
            SessionState::Canceling => Self::Canceling,
        }
    }
}

impl From<DownloadOutcome> for Phase {
    fn from(outcome: DownloadOutcome) -> Self {
        match outcome {
            DownloadOutcome::Completed => Self::Completed,
            DownloadOutcome::Canceled => Self::Canceled,
            DownloadOutcome::Failed => Self::Failed,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Fetching => write!(f, "Fetching info..."),
            Self::Ready => write!(f, "Ready"),
            Self::Downloading => write!(f, "Downloading..."),
            Self::Canceling => write!(f, "Canceling..."),
            Self::Completed => write!(f, "Download complete"),
            Self::Canceled => write!(f, "Download canceled"),
            Self::Failed => write!(f, "Download failed"),
        }
    }
}

/// Events sent to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Metadata resolved; the catalog replaces any previous one.
    CatalogReady {
        /// Resource title.
        title: String,
        /// Resolution catalog, first entry selected.
        catalog: Catalog,
    },
    /// Metadata lookup failed. Any previous catalog stays valid.
    FetchFailed(FetchFailure),
    /// Download progress.
    Progress(ProgressUpdate),
    /// The phase changed.
    PhaseChanged(Phase),
    /// A download request was refused.
    DownloadRejected(String),
}

/// Commands accepted by the control task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The URL input changed.
    InputChanged(String),
    /// Start downloading the current input.
    StartDownload(DownloadSpec),
    /// Cancel the running download.
    CancelDownload,
    /// Stop the control task.
    Shutdown,
}

/// Messages from background tasks to the control task.
#[derive(Debug)]
pub(crate) enum TaskMessage {
    FetchFinished {
        request: FetchRequest,
        result: Result<ResourceMetadata>,
    },
    Session(SessionEvent),
}

impl From<SessionEvent> for TaskMessage {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

/// Cloneable handle for sending commands to the control task.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<OrchestrationState>,
}

impl OrchestratorHandle {
    /// Report a change of the URL input.
    pub fn input_changed(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::InputChanged(text.into()))
    }

    /// Request a download of the current input.
    pub fn start_download(&self, spec: DownloadSpec) -> Result<()> {
        self.send(Command::StartDownload(spec))
    }

    /// Request cancellation of the running download.
    pub fn cancel_download(&self) -> Result<()> {
        self.send(Command::CancelDownload)
    }

    /// Stop the control task. A running download is canceled first.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Whether a download is active.
    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.state.is_downloading()
    }

    /// Whether a metadata fetch is in flight.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.state.is_fetching()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ChannelClosed)
    }
}

enum Wake {
    Command(Option<Command>),
    Task(TaskMessage),
    Fire(FetchRequest),
}

/// The control task.
pub struct Orchestrator {
    config: CoreConfig,
    state: Arc<OrchestrationState>,
    resolver: Arc<MetadataResolver>,
    downloads: DownloadController,
    trigger: DebouncedTrigger,
    input: String,
    metadata: Option<ResourceMetadata>,
    catalog: Option<Catalog>,
    reported: Phase,
    events: mpsc::UnboundedSender<CoreEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    tasks_tx: mpsc::UnboundedSender<TaskMessage>,
    tasks_rx: mpsc::UnboundedReceiver<TaskMessage>,
}

impl Orchestrator {
    /// Build a control task without starting it.
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        config: CoreConfig,
    ) -> (Self, OrchestratorHandle, mpsc::UnboundedReceiver<CoreEvent>) {
        let config = config.validate();
        let state = Arc::new(OrchestrationState::new());
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            resolver: Arc::new(MetadataResolver::new(
                Arc::clone(&engine),
                config.fetch_timeout(),
            )),
            downloads: DownloadController::new(
                engine,
                Arc::clone(&state),
                config.smoothing_factor,
            ),
            trigger: DebouncedTrigger::new(config.debounce()),
            state: Arc::clone(&state),
            config,
            input: String::new(),
            metadata: None,
            catalog: None,
            reported: Phase::Idle,
            events,
            commands,
            tasks_tx,
            tasks_rx,
        };
        let handle = OrchestratorHandle {
            commands: commands_tx,
            state,
        };

        (orchestrator, handle, events_rx)
    }

    /// Build a control task and spawn it on the current runtime.
    pub fn spawn(
        engine: Arc<dyn MediaEngine>,
        config: CoreConfig,
    ) -> (
        OrchestratorHandle,
        mpsc::UnboundedReceiver<CoreEvent>,
        JoinHandle<()>,
    ) {
        let (orchestrator, handle, events) = Self::new(engine, config);
        let task = tokio::spawn(orchestrator.run());
        (handle, events, task)
    }

    /// Process commands and task messages until shutdown.
    pub async fn run(mut self) {
        info!("Orchestrator started");

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(message) = self.tasks_rx.recv() => Wake::Task(message),
                request = self.trigger.fired() => Wake::Fire(request),
            };

            match wake {
                Wake::Command(None | Some(Command::Shutdown)) => break,
                Wake::Command(Some(command)) => self.handle_command(command),
                Wake::Task(message) => self.handle_task(message),
                Wake::Fire(request) => self.begin_fetch(request),
            }
        }

        self.trigger.cancel();
        self.settle_active_download().await;
        info!("Orchestrator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::InputChanged(text) => {
                trace!("Input changed: {:?}", text);
                self.trigger.on_input(&text);
                self.input = text;
            }
            Command::StartDownload(spec) => self.start_download(&spec),
            Command::CancelDownload => {
                if self.downloads.cancel() {
                    self.publish_state();
                } else {
                    debug!("Cancel requested with no active download");
                }
            }
            Command::Shutdown => {}
        }
    }

    fn handle_task(&mut self, message: TaskMessage) {
        match message {
            TaskMessage::FetchFinished { request, result } => self.finish_fetch(request, result),
            TaskMessage::Session(SessionEvent::Sample { session, sample }) => {
                if let Some(update) = self.downloads.on_sample(session, &sample) {
                    self.emit(CoreEvent::Progress(update));
                }
            }
            TaskMessage::Session(SessionEvent::Finished { session, result }) => {
                if let Some(outcome) = self.downloads.finish(session, result) {
                    self.emit(CoreEvent::Progress(outcome.settled_update()));
                    let phase = Phase::from(outcome);
                    self.reported = phase;
                    self.emit(CoreEvent::PhaseChanged(phase));
                }
            }
        }
    }

    fn begin_fetch(&mut self, request: FetchRequest) {
        if !self.state.try_begin_fetch() {
            debug!("Fetch in flight, dropping trigger for {}", request.url);
            return;
        }
        self.publish_state();

        let resolver = Arc::clone(&self.resolver);
        let tasks = self.tasks_tx.clone();
        tokio::spawn(async move {
            let url = request.url.clone();
            let lookup = tokio::spawn(async move { resolver.resolve(&url).await });
            let result = lookup
                .await
                .unwrap_or_else(|e| Err(Error::FetchEngine(format!("metadata task failed: {e}"))));
            let _ = tasks.send(TaskMessage::FetchFinished { request, result });
        });
    }

    fn finish_fetch(&mut self, request: FetchRequest, result: Result<ResourceMetadata>) {
        self.state.finish_fetch();

        if self.config.discard_stale_fetches && request.token != self.trigger.latest_token() {
            info!("Discarding metadata for outdated input {}", request.url);
            if !self.trigger.is_pending() {
                let input = self.input.clone();
                self.trigger.on_input(&input);
            }
            self.publish_state();
            return;
        }

        match result {
            Ok(metadata) => {
                let catalog = metadata.catalog();
                info!(
                    "Catalog ready for '{}' ({} resolutions with size)",
                    metadata.title,
                    metadata.available_resolutions.len()
                );
                self.emit(CoreEvent::CatalogReady {
                    title: metadata.title.clone(),
                    catalog: catalog.clone(),
                });
                self.metadata = Some(metadata);
                self.catalog = Some(catalog);
            }
            Err(e) => {
                warn!("Metadata fetch for {} failed: {}", request.url, e);
                let failure = e.fetch_failure().unwrap_or(FetchFailure::Engine);
                self.emit(CoreEvent::FetchFailed(failure));
            }
        }
        self.publish_state();
    }

    fn start_download(&mut self, spec: &DownloadSpec) {
        if let Err(e) = self.check_selection(spec) {
            self.reject(&e);
            return;
        }

        match self.downloads.start(&self.input, spec, &self.tasks_tx) {
            Ok(session) => {
                debug!("Session {} started", session);
                self.publish_state();
            }
            Err(e) => self.reject(&e),
        }
    }

    fn check_selection(&self, spec: &DownloadSpec) -> Result<()> {
        let Some(catalog) = self.catalog.as_ref() else {
            return Err(Error::InvalidSelection("no metadata available".to_string()));
        };
        if let DownloadKind::Video(resolution) = spec.kind
            && catalog.entry_for(resolution).is_none()
        {
            return Err(Error::InvalidSelection(format!(
                "resolution {resolution} is not offered"
            )));
        }
        if spec.output_directory.as_os_str().is_empty() {
            return Err(Error::InvalidSelection("no output directory".to_string()));
        }
        if self.input.trim().is_empty() {
            return Err(Error::InvalidSelection("no URL".to_string()));
        }
        Ok(())
    }

    fn reject(&self, error: &Error) {
        info!("Download request rejected: {}", error);
        self.emit(CoreEvent::DownloadRejected(error.to_string()));
    }

    /// Emit the derived phase if it differs from the last reported one.
    fn publish_state(&mut self) {
        let phase = Phase::from(self.state.session_state(self.catalog.is_some()));
        if phase != self.reported {
            debug!("Phase {} -> {}", self.reported, phase);
            self.reported = phase;
            self.emit(CoreEvent::PhaseChanged(phase));
        }
    }

    /// Cancel a running download and wait for its completion message.
    async fn settle_active_download(&mut self) {
        if !self.downloads.is_active() {
            return;
        }
        info!("Canceling active download before shutdown");
        if self.downloads.cancel() {
            self.publish_state();
        }

        while self.downloads.is_active() {
            match self.tasks_rx.recv().await {
                Some(message) => self.handle_task(message),
                None => break,
            }
        }
    }

    fn emit(&self, event: CoreEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("input", &self.input)
            .field("title", &self.metadata.as_ref().map(|m| &m.title))
            .field("reported", &self.reported)
            .field("downloads", &self.downloads)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockMediaEngine;
    use crate::progress::ProgressStage;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(Phase::from(SessionState::Canceling), Phase::Canceling);
        assert_eq!(Phase::from(DownloadOutcome::Failed), Phase::Failed);
        assert!(Phase::Completed.is_terminal());
        assert!(!Phase::Ready.is_terminal());
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Progress(ProgressUpdate::settled(100.0));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["data"]["stage"], "settled");

        let event = CoreEvent::PhaseChanged(Phase::Canceling);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"phase_changed","data":"canceling"}"#);

        let failed = CoreEvent::FetchFailed(FetchFailure::Timeout);
        let back: CoreEvent =
            serde_json::from_str(&serde_json::to_string(&failed).unwrap()).unwrap();
        assert_eq!(back, failed);
    }

    #[tokio::test]
    async fn test_download_before_metadata_is_rejected() {
        let (orchestrator, handle, mut events) =
            Orchestrator::new(Arc::new(MockMediaEngine::new()), CoreConfig::default());
        let task = tokio::spawn(orchestrator.run());

        handle
            .start_download(DownloadSpec::video(
                crate::selector::Resolution::Height(720),
                "/tmp/out",
            ))
            .unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, CoreEvent::DownloadRejected(reason) if reason.contains("no metadata")));
        assert!(!handle.is_downloading());

        handle.shutdown().unwrap();
        task.await.unwrap();
        assert!(matches!(handle.input_changed("x"), Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_the_task() {
        let (handle, _events, task) =
            Orchestrator::spawn(Arc::new(MockMediaEngine::new()), CoreConfig::default());
        drop(handle);
        task.await.unwrap();
    }

    #[test]
    fn test_settled_update_stage() {
        assert_eq!(
            DownloadOutcome::Completed.settled_update().stage,
            ProgressStage::Settled
        );
    }
}
