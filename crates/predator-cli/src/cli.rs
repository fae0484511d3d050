//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;
use predator_core::{AudioFormat, DownloadSpec, Resolution};

use crate::logging::LogRotation;

/// Fetch a media resource's formats and download it with live progress.
#[derive(Debug, Parser)]
#[command(name = "predator", version, about)]
pub struct Cli {
    /// URL of the resource to download.
    pub url: String,

    /// Directory the download is written to.
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Maximum video resolution, e.g. `720p` or `best`.
    #[arg(short, long, value_name = "LABEL", default_value = "best")]
    pub resolution: Resolution,

    /// Extract audio in this format instead of downloading video.
    #[arg(short, long, value_name = "FORMAT", conflicts_with = "resolution")]
    pub audio: Option<AudioFormat>,

    /// Configuration file (defaults to the per-user config).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show debug output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Write JSON log files to the default log directory.
    #[arg(long)]
    pub log: bool,

    /// Write JSON log files to this directory.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// How often log files are rotated.
    #[arg(long, value_name = "WHEN", value_enum)]
    pub log_rotation: Option<LogRotation>,

    /// Print every event as a JSON line on stdout.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// The download requested on the command line.
    #[must_use]
    pub fn download_spec(&self) -> DownloadSpec {
        match self.audio {
            Some(format) => DownloadSpec::audio(format, self.output.clone()),
            None => DownloadSpec::video(self.resolution, self.output.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use predator_core::DownloadKind;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("predator").chain(args.iter().copied()))
    }

    #[test]
    fn test_video_defaults_to_best() {
        let cli = parse(&["https://example.com/v", "-o", "out"]).unwrap();
        assert_eq!(
            cli.download_spec(),
            DownloadSpec::video(Resolution::Best, "out")
        );
        assert!(!cli.verbose);
    }

    #[test]
    fn test_resolution_label() {
        let cli = parse(&["https://example.com/v", "-o", "out", "-r", "720p"]).unwrap();
        assert_eq!(
            cli.download_spec().kind,
            DownloadKind::Video(Resolution::Height(720))
        );
    }

    #[test]
    fn test_audio_extraction() {
        let cli = parse(&["https://example.com/v", "--output", "out", "-a", "opus"]).unwrap();
        assert_eq!(
            cli.download_spec().kind,
            DownloadKind::Audio(AudioFormat::Opus)
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["https://example.com/v"]).is_err());
        assert!(parse(&["https://example.com/v", "-o", "out", "-r", "hd"]).is_err());
        assert!(parse(&["https://example.com/v", "-o", "out", "-a", "flac"]).is_err());
        assert!(parse(&["https://example.com/v", "-o", "out", "-r", "720p", "-a", "mp3"]).is_err());
    }

    #[test]
    fn test_logging_flags() {
        let cli = parse(&[
            "https://example.com/v",
            "-o",
            "out",
            "-v",
            "--log-dir",
            "/tmp/logs",
            "--json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.json);
        assert_eq!(cli.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(cli.log_rotation, None);
    }

    #[test]
    fn test_log_rotation_flag() {
        let cli = parse(&["https://example.com/v", "-o", "out", "--log-rotation", "never"]).unwrap();
        assert_eq!(cli.log_rotation, Some(LogRotation::Never));
        assert!(parse(&["https://example.com/v", "-o", "out", "--log-rotation", "weekly"]).is_err());
    }
}
