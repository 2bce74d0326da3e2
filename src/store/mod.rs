pub mod merge;
pub mod models;


use crate::error::PipelineError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub use merge::{diff_is_meaningful, merge, merge_structured};
pub use models::*;

/// The whole dataset, in snapshot order, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    episodes: Vec<Episode>,
    index: HashMap<String, usize>,
    /// Records rewritten by `from_episodes`; the snapshot is stale until saved.
    normalized: usize,
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.episodes == other.episodes
    }
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records in file order. Later duplicates of an id are
    /// merged into the first occurrence, and structured subfields written
    /// at the top level of a record are moved under `structured`.
    pub fn from_episodes(episodes: Vec<Episode>) -> Self {
        let mut collection = Self::new();
        for mut episode in episodes {
            if episode.lift_top_level_structured() {
                log::info!("Moved top-level guest/year/movies of {} under structured", episode.id);
                collection.normalized += 1;
            }
            match collection.index.get(&episode.id) {
                Some(&pos) => {
                    log::warn!(
                        "Duplicate record {} in snapshot, folding into first occurrence",
                        episode.id
                    );
                    let existing = &mut collection.episodes[pos];
                    let patch = EpisodePatch {
                        subtitles: episode.subtitles.clone(),
                        structured: episode.structured.clone(),
                        ..Default::default()
                    };
                    merge(existing, patch);
                    collection.normalized += 1;
                }
                None => {
                    collection
                        .index
                        .insert(episode.id.clone(), collection.episodes.len());
                    collection.episodes.push(episode);
                }
            }
        }
        collection
    }

    /// Duplicates folded and records lifted while building the collection.
    pub fn normalized(&self) -> usize {
        self.normalized
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Episode> {
        self.index.get(id).map(|&pos| &self.episodes[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Episode> {
        self.episodes.iter()
    }

    /// Mutable access in snapshot order. Ids must not be changed through it.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Episode> {
        self.episodes.iter_mut()
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    /// Merge `patch` into record `id`, appending a stub first if the id is
    /// new. Returns true if anything changed.
    pub fn upsert(&mut self, id: &str, patch: EpisodePatch) -> bool {
        match self.index.get(id) {
            Some(&pos) => merge(&mut self.episodes[pos], patch),
            None => {
                let mut episode = Episode::stub(id);
                merge(&mut episode, patch);
                self.index.insert(id.to_string(), self.episodes.len());
                self.episodes.push(episode);
                true
            }
        }
    }
}

/// Where a pass loads its collection from and writes it back to.
pub trait SnapshotStore {
    fn load(&self) -> Result<Collection, PipelineError>;
    fn save(&self, collection: &Collection) -> Result<(), PipelineError>;
}

/// JSON snapshot file holding the whole collection.
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Like `load`, but a missing file is an empty collection.
    pub fn load_or_empty(&self) -> Result<Collection, PipelineError> {
        if self.path.exists() {
            self.load()
        } else {
            log::info!("No snapshot at {:?}, starting empty", self.path);
            Ok(Collection::new())
        }
    }

    fn corrupt(&self, reason: impl ToString) -> PipelineError {
        PipelineError::CorruptSnapshot {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn persistence(&self, reason: impl ToString) -> PipelineError {
        PipelineError::Persistence {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn write_snapshot(&self, collection: &Collection) -> Result<(), PipelineError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.persistence(e))?;

        // Dropping the temp file on any early return removes it.
        let tmp = NamedTempFile::new_in(&dir).map_err(|e| self.persistence(e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, collection.episodes())
                .map_err(|e| self.persistence(e))?;
            writer.write_all(b"\n").map_err(|e| self.persistence(e))?;
            writer.flush().map_err(|e| self.persistence(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.persistence(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.persistence(e.error))?;
        Ok(())
    }
}

impl SnapshotStore for RecordStore {
    fn load(&self) -> Result<Collection, PipelineError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::SnapshotMissing(self.path.clone()))
            }
            Err(e) => return Err(self.corrupt(e)),
        };
        let episodes: Vec<Episode> =
            serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| self.corrupt(e))?;
        if let Some(blank) = episodes.iter().position(|e| e.id.trim().is_empty()) {
            return Err(self.corrupt(format!("record {} has an empty id", blank)));
        }
        let collection = Collection::from_episodes(episodes);
        log::info!("Loaded {} records from {:?}", collection.len(), self.path);
        Ok(collection)
    }

    fn save(&self, collection: &Collection) -> Result<(), PipelineError> {
        self.write_snapshot(collection)?;
        log::info!("Saved {} records to {:?}", collection.len(), self.path);
        Ok(())
    }
}
