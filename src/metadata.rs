#![forbid(unsafe_code)]

//! Records returned by the catalog service and the `metadata.json` sidecar
//! written next to every downloaded VOD.
//!
//! Only the fields the archiver actually reads are named; everything else the
//! API returns (title, duration, view count, ...) rides along in `extra` so the
//! sidecar preserves the payload verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// File name of the per-video sidecar inside each date folder.
pub const METADATA_FILE: &str = "metadata.json";

/// A single archived broadcast as listed by the catalog service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub user_id: String,
    /// RFC 3339 timestamp, e.g. `2018-03-02T20:53:41Z`.
    pub created_at: String,
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VideoRecord {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        created_at: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            created_at: created_at.into(),
            url: url.into(),
            extra: Map::new(),
        }
    }

    /// Title shown in log lines; falls back to the id when the API omitted it.
    pub fn title(&self) -> &str {
        self.extra
            .get("title")
            .and_then(Value::as_str)
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(&self.id)
    }
}

/// Canonical owner of the archived videos.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub login: String,
    pub display_name: String,
}

/// Pretty-prints the record with tab indentation, matching what earlier
/// archives on disk look like.
pub fn render_metadata(record: &VideoRecord) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    record
        .serialize(&mut serializer)
        .with_context(|| format!("serializing metadata for {}", record.id))?;
    Ok(buffer)
}

/// Writes `metadata.json` into `folder`, replacing any previous sidecar.
pub fn write_metadata_file(folder: &Path, record: &VideoRecord) -> Result<PathBuf> {
    let payload = render_metadata(record)?;
    let path = folder.join(METADATA_FILE);
    fs::write(&path, payload).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn read_metadata_file(path: &Path) -> Result<VideoRecord> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
