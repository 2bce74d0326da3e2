//! Discovered videos from a yt-dlp `--flat-playlist --dump-json` dump.

use crate::error::PipelineError;
use crate::store::{Collection, EpisodePatch};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// One playlist entry. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    /// `YYYYMMDD`, as yt-dlp prints it.
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl PlaylistEntry {
    /// Metadata-only patch. Never carries subtitles or structured data.
    pub fn into_patch(self) -> EpisodePatch {
        let url = self
            .url
            .filter(|u| u.starts_with("http"))
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id));

        let published_at = self
            .upload_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
            .or_else(|| {
                self.timestamp
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                    .map(|dt| dt.date_naive())
            })
            .map(|date| date.format("%Y-%m-%d").to_string());

        let mut extra = BTreeMap::new();
        if let Some(duration) = self.duration {
            extra.insert("duration".to_string(), Value::from(duration.round() as u64));
        }

        EpisodePatch {
            title: self.title.filter(|t| !t.trim().is_empty()),
            url: Some(url),
            published_at,
            view_count: self.view_count,
            extra,
            ..Default::default()
        }
    }
}

/// Parse a playlist dump: either a JSON array or one JSON object per line.
pub fn parse_playlist(content: &str) -> Result<Vec<PlaylistEntry>, PipelineError> {
    let trimmed = content.trim_start();
    let entries: Vec<PlaylistEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .map_err(|e| PipelineError::Json(format!("line {}: {}", n + 1, e)))
            })
            .collect::<Result<_, _>>()?
    };

    Ok(entries
        .into_iter()
        .filter(|e| !e.id.trim().is_empty())
        .collect())
}

pub fn read_playlist(path: &Path) -> Result<Vec<PlaylistEntry>, PipelineError> {
    let content = std::fs::read_to_string(path)?;
    parse_playlist(&content)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Merge discovered videos into the collection as stubs.
pub fn import_entries(collection: &mut Collection, entries: Vec<PlaylistEntry>) -> ImportSummary {
    let mut summary = ImportSummary::default();
    for entry in entries {
        let id = entry.id.trim().to_string();
        let existed = collection.get(&id).is_some();
        let changed = collection.upsert(&id, entry.into_patch());
        match (existed, changed) {
            (false, _) => summary.added += 1,
            (true, true) => summary.updated += 1,
            (true, false) => summary.unchanged += 1,
        }
    }
    log::info!(
        "Imported playlist: {} new, {} updated, {} unchanged",
        summary.added,
        summary.updated,
        summary.unchanged
    );
    summary
}
