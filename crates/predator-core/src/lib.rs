//! Predator Core Library
//!
//! This crate provides the orchestration core of the Predator media
//! downloader:
//! - Debounced metadata fetching as the URL input changes
//! - Resolution catalogs built from the engine's metadata dump
//! - Single-flight, cancellable download sessions
//! - Smoothed transfer speed and remaining-time estimates
//!
//! The media engine itself sits behind the [`MediaEngine`] trait; the
//! [`YtDlpEngine`] drives a `yt-dlp` subprocess.

pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod format;
pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod selector;
pub mod session;
pub mod state;
pub mod ytdlp;

pub use config::CoreConfig;
pub use engine::{DownloadJob, EngineError, MediaEngine, ProgressSample, ProgressSink, SampleStatus};
pub use error::{Error, FetchFailure, Result};
pub use metadata::{Catalog, CatalogEntry, ResourceMetadata, SizeDescriptor};
pub use orchestrator::{CoreEvent, Orchestrator, OrchestratorHandle, Phase};
pub use progress::{ProgressStage, ProgressUpdate};
pub use selector::{AudioFormat, DownloadKind, DownloadSpec, Resolution};
pub use ytdlp::YtDlpEngine;
