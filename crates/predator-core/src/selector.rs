//! Download selections and the engine format requests derived from them.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Container that video and audio streams are merged into.
pub const MERGE_CONTAINER: &str = "mp4";

/// A video resolution choice: a height ceiling or the `best` policy label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    /// Best stream at or below this height in pixels.
    Height(u32),
    /// Best available stream, no ceiling.
    Best,
}

impl Resolution {
    /// Label used in the catalog, e.g. `720p` or `best`.
    #[must_use]
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Height(height) => write!(f, "{height}p"),
            Self::Best => write!(f, "best"),
        }
    }
}

impl FromStr for Resolution {
    type Err = Error;

    /// Accepts bare labels (`720p`, `best`) as well as catalog display
    /// strings such as `720p (28.6 MiB)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.split_whitespace().next().unwrap_or_default();
        if label.eq_ignore_ascii_case("best") {
            return Ok(Self::Best);
        }

        label
            .strip_suffix('p')
            .and_then(|height| height.parse::<u32>().ok())
            .filter(|&height| height > 0)
            .map(Self::Height)
            .ok_or_else(|| Error::InvalidSelection(format!("unknown resolution '{s}'")))
    }
}

impl TryFrom<String> for Resolution {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

/// Target format for audio extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MPEG-1 Audio Layer III.
    #[default]
    Mp3,
    /// AAC in an MPEG-4 container.
    M4a,
    /// Opus.
    Opus,
    /// Uncompressed PCM.
    Wav,
}

impl AudioFormat {
    /// All supported formats, in presentation order.
    pub const ALL: [Self; 4] = [Self::Mp3, Self::M4a, Self::Opus, Self::Wav];

    /// The engine's name for this format.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
            Self::Wav => "wav",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidSelection(format!("unsupported audio format '{s}'")))
    }
}

/// What to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DownloadKind {
    /// Video with audio, merged into [`MERGE_CONTAINER`].
    Video(Resolution),
    /// Extracted audio only.
    Audio(AudioFormat),
}

/// A download request as issued by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSpec {
    /// Video or audio, with the matching option.
    pub kind: DownloadKind,
    /// Directory the result is written to. Must not be empty.
    pub output_directory: PathBuf,
}

impl DownloadSpec {
    /// Request a video download.
    pub fn video(resolution: Resolution, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            kind: DownloadKind::Video(resolution),
            output_directory: output_directory.into(),
        }
    }

    /// Request an audio extraction.
    pub fn audio(format: AudioFormat, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            kind: DownloadKind::Audio(format),
            output_directory: output_directory.into(),
        }
    }
}

/// Format selection handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatRequest {
    /// Select video and audio streams and merge them.
    Video {
        /// Engine format selector expression.
        selector: String,
        /// Container to merge into.
        merge_container: String,
    },
    /// Extract audio in the given format.
    Audio {
        /// Target format.
        format: AudioFormat,
    },
}

impl FormatRequest {
    /// Build the engine request for a download kind.
    ///
    /// Video prefers mp4 video with m4a audio at or below the height ceiling
    /// and falls back to any video+audio pair, then to the best single file.
    #[must_use]
    pub fn for_kind(kind: DownloadKind) -> Self {
        match kind {
            DownloadKind::Video(resolution) => Self::Video {
                selector: video_selector(resolution),
                merge_container: MERGE_CONTAINER.to_string(),
            },
            DownloadKind::Audio(format) => Self::Audio { format },
        }
    }

    /// Height ceiling requested, if any.
    #[must_use]
    pub fn max_height(&self) -> Option<u32> {
        let Self::Video { selector, .. } = self else {
            return None;
        };
        let (_, rest) = selector.split_once("[height<=")?;
        rest.split(']').next()?.parse().ok()
    }
}

fn video_selector(resolution: Resolution) -> String {
    match resolution {
        Resolution::Height(height) => format!(
            "bestvideo[ext=mp4][height<={height}]+bestaudio[ext=m4a]/mp4/\
             bestvideo[height<={height}]+bestaudio/best"
        ),
        Resolution::Best => {
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/mp4/bestvideo+bestaudio/best".to_string()
        }
    }
}
