//! Terminal rendering of core events.

use std::io::Write;

use predator_core::{CoreEvent, ProgressStage, ProgressUpdate};

/// Renders events either as text or as JSON lines.
#[derive(Debug)]
pub struct Renderer {
    json: bool,
    progress_line_open: bool,
}

impl Renderer {
    /// Create a renderer. With `json`, every event goes to stdout verbatim.
    #[must_use]
    pub const fn new(json: bool) -> Self {
        Self {
            json,
            progress_line_open: false,
        }
    }

    /// Print one event.
    pub fn render(&mut self, event: &CoreEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
            return;
        }

        match event {
            CoreEvent::CatalogReady { title, catalog } => {
                self.close_progress_line();
                println!("{title}");
                for entry in catalog.display_list() {
                    println!("  {entry}");
                }
            }
            CoreEvent::FetchFailed(failure) => {
                self.close_progress_line();
                eprintln!("{failure}");
            }
            CoreEvent::Progress(update) => match progress_line(update) {
                Some(line) => {
                    eprint!("\r{line}");
                    let _ = std::io::stderr().flush();
                    self.progress_line_open = true;
                }
                None => self.close_progress_line(),
            },
            CoreEvent::PhaseChanged(phase) => {
                self.close_progress_line();
                eprintln!("{phase}");
            }
            CoreEvent::DownloadRejected(reason) => {
                self.close_progress_line();
                eprintln!("Download rejected: {reason}");
            }
        }
    }

    fn close_progress_line(&mut self) {
        if self.progress_line_open {
            eprintln!();
            self.progress_line_open = false;
        }
    }
}

/// Text for an in-place progress line; `None` once the session settled.
fn progress_line(update: &ProgressUpdate) -> Option<String> {
    match update.stage {
        ProgressStage::Downloading => Some(format!(
            "{:>5.1}%  {:>12}  ETA {:<8}",
            update.percent,
            update.speed_text.as_deref().unwrap_or_default(),
            update.eta_text.as_deref().unwrap_or("--:--"),
        )),
        ProgressStage::Processing => Some(format!("{:>5.1}%  Processing...{:>14}", update.percent, "")),
        ProgressStage::Settled => None,
    }
}
