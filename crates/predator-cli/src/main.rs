//! Predator command line front end.
//!
//! Resolves the URL's formats, prints the catalog, downloads the requested
//! selection and renders progress until the session settles. Ctrl-C cancels
//! the download.

mod cli;
mod logging;
mod render;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use predator_core::config::prepare_output_directory;
use predator_core::{CoreConfig, CoreEvent, FetchFailure, Orchestrator, Phase, YtDlpEngine};
use tokio::signal;
use tracing::{Level, error, info};

use crate::cli::Cli;
use crate::logging::{LoggingConfig, LoggingError};
use crate::render::Renderer;

/// Exit code for a download canceled with Ctrl-C.
const EXIT_CANCELED: u8 = 130;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] predator_core::Error),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("{0}")]
    Fetch(FetchFailure),

    #[error("Download rejected: {0}")]
    Rejected(String),

    #[error("Orchestrator task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Failed to listen for Ctrl-C: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Orchestrator stopped unexpectedly")]
    Stopped,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(&logging_config(&cli)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(Phase::Completed) => ExitCode::SUCCESS,
        Ok(Phase::Canceled) => ExitCode::from(EXIT_CANCELED),
        Ok(phase) => {
            info!("Finished in phase {}", phase);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = LoggingConfig::auto();
    if cli.verbose {
        config = config.with_console_level(Level::DEBUG);
    }
    if let Some(directory) = &cli.log_dir {
        config = config.with_log_directory(directory.clone());
    } else if cli.log {
        config = config.with_log_directory(logging::default_log_directory());
    }
    if let Some(rotation) = cli.log_rotation {
        config = config.with_rotation(rotation);
    }
    config
}

/// Drive one fetch-then-download session. Returns the terminal phase.
async fn run(cli: Cli) -> Result<Phase, CliError> {
    let config = match &cli.config {
        Some(path) => CoreConfig::load_from(path)?,
        None => CoreConfig::load()?,
    };
    prepare_output_directory(&cli.output)?;

    let spec = cli.download_spec();
    let engine = Arc::new(YtDlpEngine::from_config(&config));
    let (handle, mut events, task) = Orchestrator::spawn(engine, config);
    let mut renderer = Renderer::new(cli.json);

    handle.input_changed(cli.url.clone())?;
    let mut requested = false;

    let outcome: Result<Phase, CliError> = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Err(CliError::Stopped);
                };
                renderer.render(&event);

                match event {
                    CoreEvent::CatalogReady { .. } if !requested => {
                        requested = true;
                        if let Err(e) = handle.start_download(spec.clone()) {
                            break Err(e.into());
                        }
                    }
                    CoreEvent::FetchFailed(failure) if !requested => {
                        break Err(CliError::Fetch(failure));
                    }
                    CoreEvent::DownloadRejected(reason) => break Err(CliError::Rejected(reason)),
                    CoreEvent::PhaseChanged(phase) if phase.is_terminal() => break Ok(phase),
                    _ => {}
                }
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    break Err(CliError::Signal(e));
                }
                if !handle.is_downloading() {
                    break Ok(Phase::Canceled);
                }
                info!("Interrupted, canceling download");
                if let Err(e) = handle.cancel_download() {
                    break Err(e.into());
                }
            }
        }
    };

    // The task may already be gone if it stopped on its own.
    let _ = handle.shutdown();
    task.await?;
    outcome
}
