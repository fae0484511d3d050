//! [`MediaEngine`] backed by a `yt-dlp` subprocess.
//!
//! Metadata comes from `--dump-json`. Downloads run with a custom
//! `--progress-template` so every progress line is machine readable:
//!
//! ```text
//! predator:<status>|<downloaded>|<total>|<estimate>|<eta>
//! ```
//!
//! Missing fields are printed by yt-dlp as `NA`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::CoreConfig;
use crate::engine::{
    DownloadJob, EngineError, MediaEngine, ProgressSample, ProgressSink, SampleStatus,
};
use crate::selector::FormatRequest;

/// Prefix marking our progress lines on stdout.
const PROGRESS_PREFIX: &str = "predator:";

const PROGRESS_TEMPLATE: &str = "download:predator:%(progress.status)s|\
    %(progress.downloaded_bytes)s|%(progress.total_bytes)s|\
    %(progress.total_bytes_estimate)s|%(progress.eta)s";

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `yt-dlp` for metadata lookups and downloads.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary: PathBuf,
    output_template: String,
    progress_interval: Duration,
}

impl YtDlpEngine {
    /// Create an engine using the given executable.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let defaults = CoreConfig::default();
        let progress_interval = defaults.progress_interval();
        Self {
            binary: binary.into(),
            output_template: defaults.output_template,
            progress_interval,
        }
    }

    /// Create an engine from the core configuration.
    #[must_use]
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            output_template: config.output_template.clone(),
            progress_interval: config.progress_interval(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    async fn fetch_metadata(&self, url: &str, timeout: Duration) -> Result<String, EngineError> {
        let child = self
            .command()
            .args(metadata_args(url))
            .spawn()
            .map_err(EngineError::Spawn)?;
        debug!("Spawned yt-dlp metadata dump for {}", url);

        // Dropping the child on timeout kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::Timeout(timeout))?
            .map_err(|e| EngineError::Other(format!("failed to wait for yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Exited {
                code: output.status.code(),
                stderr: tail(stderr.lines()),
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| EngineError::Other(format!("metadata is not valid UTF-8: {e}")))
    }

    async fn download(
        &self,
        job: &DownloadJob,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let args = download_args(job, &self.output_template);
        let mut child = self.command().args(&args).spawn().map_err(EngineError::Spawn)?;
        info!("Spawned yt-dlp download for {}", job.url);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Other("yt-dlp stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Other("yt-dlp stderr unavailable".to_string()))?;

        let interval = self.progress_interval;
        let progress_reader = tokio::spawn(read_progress(stdout, progress, interval));
        let stderr_reader = tokio::spawn(collect_tail(stderr));

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| EngineError::Other(format!("failed to wait for yt-dlp: {e}")))?,
            () = cancel.cancelled() => {
                info!("Stopping yt-dlp for {}", job.url);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill yt-dlp: {}", e);
                }
                progress_reader.abort();
                stderr_reader.abort();
                return Err(EngineError::Canceled);
            }
        };

        let _ = progress_reader.await;
        let stderr = stderr_reader.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Exited {
                code: status.code(),
                stderr,
            })
        }
    }
}

fn metadata_args(url: &str) -> Vec<String> {
    ["--dump-json", "--no-playlist", "--no-warnings", "--", url]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn download_args(job: &DownloadJob, output_template: &str) -> Vec<String> {
    let output = job.output_directory.join(output_template);
    let mut args = vec![
        "--no-playlist".to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
    ];

    match &job.format {
        FormatRequest::Video {
            selector,
            merge_container,
        } => {
            args.extend([
                "-f".to_string(),
                selector.clone(),
                "--merge-output-format".to_string(),
                merge_container.clone(),
            ]);
        }
        FormatRequest::Audio { format } => {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                format.as_str().to_string(),
            ]);
        }
    }

    args.extend(["--".to_string(), job.url.clone()]);
    args
}

async fn read_progress<R>(stdout: R, progress: ProgressSink, interval: Duration)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut throttle = SampleThrottle::new(interval);

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(sample) = parse_progress_line(&line, Instant::now()) else {
            trace!("yt-dlp: {}", line);
            continue;
        };
        if throttle.admit(&sample) {
            progress.send(sample);
        }
    }
}

async fn collect_tail<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut kept = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if kept.len() == STDERR_TAIL_LINES {
            kept.pop_front();
        }
        kept.push_back(line);
    }
    tail(kept.iter().map(String::as_str))
}

fn tail<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let lines: Vec<&str> = lines.filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Parse one progress line emitted through our progress template.
pub fn parse_progress_line(line: &str, timestamp: Instant) -> Option<ProgressSample> {
    let payload = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = payload.split('|');

    let status = SampleStatus::from_engine(fields.next()?);
    let downloaded_bytes = parse_count(fields.next()?).unwrap_or(0);
    let total_bytes = parse_count(fields.next()?);
    let total_bytes_estimate = parse_count(fields.next()?);
    let eta = fields
        .next()
        .and_then(parse_count)
        .map(Duration::from_secs);

    Some(ProgressSample {
        downloaded_bytes,
        total_bytes,
        total_bytes_estimate,
        eta,
        timestamp,
        status,
    })
}

/// `NA`, `None` and garbage map to `None`; floats are rounded.
fn parse_count(field: &str) -> Option<u64> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u64)
}

/// Limits how often samples are passed on; status changes always pass.
#[derive(Debug)]
struct SampleThrottle {
    interval: Duration,
    last: Option<(Instant, SampleStatus)>,
}

impl SampleThrottle {
    const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn admit(&mut self, sample: &ProgressSample) -> bool {
        let admit = match self.last {
            None => true,
            Some((at, status)) => {
                status != sample.status
                    || sample.timestamp.saturating_duration_since(at) >= self.interval
            }
        };
        if admit {
            self.last = Some((sample.timestamp, sample.status));
        }
        admit
    }
}
