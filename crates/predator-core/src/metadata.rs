//! Resource metadata resolution.
//!
//! This module asks the engine for a metadata dump, parses it, and turns the
//! list of available formats into a fixed resolution catalog the user picks
//! from.
//!
//! # Example
//!
//! ```rust
//! use predator_core::metadata::parse_metadata;
//!
//! let raw = r#"{"title": "Clip", "formats": [
//!     {"height": 720, "filesize": 30000000, "vcodec": "avc1"}
//! ]}"#;
//! let metadata = parse_metadata(raw).unwrap();
//! let catalog = metadata.catalog();
//! assert_eq!(catalog.display_list()[4], "720p (28.6 MiB)");
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{EngineError, MediaEngine};
use crate::error::{Error, Result};
use crate::format::format_size;
use crate::selector::Resolution;

/// Candidate labels offered to the user, in display order.
pub const CATALOG_LABELS: [&str; 9] = [
    "144p", "240p", "360p", "480p", "720p", "1080p", "1440p", "2160p", "best",
];

/// Default bound on a metadata lookup.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of the stream behind a resolution label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "bytes", rename_all = "snake_case")]
pub enum SizeDescriptor {
    /// Size reported exactly by the engine.
    Exact(u64),
    /// Size estimated by the engine.
    Approximate(u64),
    /// No size information.
    Unknown,
}

impl std::fmt::Display for SizeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(bytes) => f.write_str(&format_size(*bytes)),
            Self::Approximate(bytes) => write!(f, "~{}", format_size(*bytes)),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Metadata for one resource, as resolved from the engine's dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Resource title.
    pub title: String,
    /// Known sizes by resolution label (`"720p"`).
    pub available_resolutions: BTreeMap<String, SizeDescriptor>,
}

impl ResourceMetadata {
    /// Build the display catalog. The first entry is selected.
    #[must_use]
    pub fn catalog(&self) -> Catalog {
        let entries = CATALOG_LABELS
            .iter()
            .map(|label| CatalogEntry {
                label: (*label).to_string(),
                size: self
                    .available_resolutions
                    .get(*label)
                    .copied()
                    .unwrap_or(SizeDescriptor::Unknown),
            })
            .collect();

        Catalog {
            entries,
            selected: 0,
        }
    }
}

/// One selectable resolution with its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Resolution label.
    pub label: String,
    /// Size, or `Unknown`.
    pub size: SizeDescriptor,
}

impl std::fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.size)
    }
}

/// The ordered resolution catalog and the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Entries in [`CATALOG_LABELS`] order.
    pub entries: Vec<CatalogEntry>,
    /// Index of the selected entry.
    pub selected: usize,
}

impl Catalog {
    /// Display strings such as `"720p (28.6 MiB)"`.
    #[must_use]
    pub fn display_list(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// The selected entry.
    #[must_use]
    pub fn selected_entry(&self) -> Option<&CatalogEntry> {
        self.entries.get(self.selected)
    }

    /// Look up the entry for a resolution.
    #[must_use]
    pub fn entry_for(&self, resolution: Resolution) -> Option<&CatalogEntry> {
        let label = resolution.label();
        self.entries.iter().find(|entry| entry.label == label)
    }
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    title: String,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    #[serde(default, deserialize_with = "lenient_count")]
    height: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    filesize_approx: Option<u64>,
    #[serde(default)]
    vcodec: Option<String>,
}

/// Accept integers, floats and `null` for counts.
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u64))
}

/// Parse an engine metadata dump.
pub fn parse_metadata(raw: &str) -> Result<ResourceMetadata> {
    let parsed: RawMetadata = serde_json::from_str(raw).map_err(Error::MetadataParse)?;

    let mut available_resolutions = BTreeMap::new();
    for format in &parsed.formats {
        if format.vcodec.as_deref() == Some("none") {
            continue;
        }
        let Some(height) = format.height else {
            continue;
        };

        let size = match (format.filesize, format.filesize_approx) {
            (Some(bytes), _) => SizeDescriptor::Exact(bytes),
            (None, Some(bytes)) => SizeDescriptor::Approximate(bytes),
            (None, None) => continue,
        };
        available_resolutions.insert(format!("{height}p"), size);
    }

    debug!(
        "Parsed metadata for '{}': {} formats, {} sized resolutions",
        parsed.title,
        parsed.formats.len(),
        available_resolutions.len()
    );

    Ok(ResourceMetadata {
        title: parsed.title,
        available_resolutions,
    })
}

/// Looks up resource metadata through the engine.
pub struct MetadataResolver {
    engine: Arc<dyn MediaEngine>,
    timeout: Duration,
}

impl MetadataResolver {
    /// Create a resolver with the given lookup bound.
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Fetch and parse metadata for `url`.
    ///
    /// The engine is asked to honor the timeout itself; the resolver enforces
    /// it as well, so a stuck engine still yields [`Error::FetchTimeout`].
    pub async fn resolve(&self, url: &str) -> Result<ResourceMetadata> {
        info!("Fetching metadata for {}", url);

        let lookup = self.engine.fetch_metadata(url, self.timeout);
        let raw = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(EngineError::Timeout(_))) | Err(_) => {
                warn!("Metadata fetch for {} timed out", url);
                return Err(Error::FetchTimeout(self.timeout));
            }
            Ok(Err(e)) => {
                warn!("Metadata fetch for {} failed: {}", url, e);
                return Err(Error::FetchEngine(e.to_string()));
            }
        };

        let metadata = parse_metadata(&raw).inspect_err(|e| {
            warn!("Metadata for {} could not be parsed: {}", url, e);
        })?;
        info!("Resolved metadata: {}", metadata.title);
        Ok(metadata)
    }
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
