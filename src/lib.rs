//! Resumable enrichment of the Criterion Closet episode dataset.
//!
//! A pass loads the snapshot, fetches missing subtitles, extracts guest,
//! year and films from them, and writes the snapshot back only when
//! something changed. Re-running a pass on a fully enriched dataset does
//! nothing.

pub mod config;
pub mod error;
pub mod extract;
pub mod gate;
pub mod ollama;
pub mod pipeline;
pub mod playlist;
pub mod store;
pub mod subtitles;

pub use config::PipelineConfig;
pub use error::{ErrorClass, ExtractionError, FetchError, PipelineError};
pub use gate::{evaluate, Gate, GatePolicy, Stage};
pub use pipeline::{PassOptions, PassReport, PipelineDriver};
pub use store::{diff_is_meaningful, Collection, Episode, RecordStore, SnapshotStore};
