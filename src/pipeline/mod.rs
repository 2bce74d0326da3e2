//! One enrichment pass over the collection.
//!
//! Records are visited in snapshot order, one at a time. Each record gets
//! at most one subtitle fetch and one extraction per pass; failures are
//! recorded on the record and never abort the pass. The snapshot is
//! written once, at the end, and only if something changed.

mod report;


use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extract::{validate, ExtractionRequest, StructuredExtractor};
use crate::gate::{evaluate, BlockReason, Gate, GatePolicy, Stage};
use crate::store::{merge, AttemptState, Collection, Episode, EpisodePatch, SnapshotStore};
use crate::subtitles::{SubtitleFetch, SubtitleSource};
use chrono::Utc;
use std::time::Duration;

pub use report::{collection_status, CollectionStatus, IncompleteRecord, PassReport, StageCounts};

#[derive(Debug, Clone)]
pub struct PassOptions {
    pub policy: GatePolicy,
    /// Subtitle fetches allowed in one pass. `None` = unlimited.
    pub max_fetches: Option<usize>,
    /// Pause between consecutive subtitle fetches.
    pub request_spacing: Duration,
    pub save_attempts: u32,
    pub save_backoff: Duration,
    /// Give stages that ran out of attempts a fresh start this pass.
    pub retry_exhausted: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            policy: GatePolicy::default(),
            max_fetches: None,
            request_spacing: Duration::ZERO,
            save_attempts: 3,
            save_backoff: Duration::from_millis(500),
            retry_exhausted: false,
        }
    }
}

impl From<&PipelineConfig> for PassOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            policy: GatePolicy::new(config.max_attempts, config.exhausted_cooldown_hours),
            max_fetches: config.max_fetches(),
            request_spacing: config.request_spacing(),
            ..Default::default()
        }
    }
}

pub struct PipelineDriver<'a> {
    subtitles: &'a dyn SubtitleSource,
    extractor: &'a dyn StructuredExtractor,
    options: PassOptions,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(
        subtitles: &'a dyn SubtitleSource,
        extractor: &'a dyn StructuredExtractor,
        options: PassOptions,
    ) -> Self {
        Self {
            subtitles,
            extractor,
            options,
        }
    }

    /// Load, enrich, and save if anything changed. Only load and save
    /// failures are returned as errors.
    pub async fn run_pass(&self, store: &dyn SnapshotStore) -> Result<PassReport, PipelineError> {
        let mut report = PassReport::new();
        log::info!("Enrichment pass {} started", report.pass_id);

        let mut collection = store.load()?;
        report.normalized = collection.normalized();
        self.enrich(&mut collection, &mut report).await;

        if report.changed > 0 || report.normalized > 0 {
            self.persist(store, &collection).await?;
            report.saved = true;
        } else {
            log::info!("No records changed, snapshot left untouched");
        }

        log::info!("Enrichment pass {} finished: {}", report.pass_id, report.summary());
        Ok(report)
    }

    /// Advance every record in memory. Never fails.
    pub async fn enrich(&self, collection: &mut Collection, report: &mut PassReport) {
        let mut fetches = 0usize;

        for episode in collection.iter_mut() {
            report.records += 1;
            let before = episode.clone();

            if self.options.retry_exhausted {
                self.reset_exhausted(episode);
            }
            let deferred = self.subtitle_stage(episode, &mut fetches, report).await;
            self.structured_stage(episode, report).await;

            if *episode != before {
                report.changed += 1;
            }
            report.note_incomplete(episode, &self.options.policy, deferred);
        }
    }

    fn reset_exhausted(&self, episode: &mut Episode) {
        for stage in [Stage::Subtitles, Stage::Structured] {
            if evaluate(episode, stage, &self.options.policy)
                == Gate::Blocked(BlockReason::AttemptsExhausted)
            {
                log::info!("Retrying {} for {} after exhausted attempts", stage, episode.id);
                *episode.enrichment_meta.stage_mut(stage) = AttemptState::NeverAttempted;
            }
        }
    }

    /// Returns true if the fetch was deferred by the per-pass budget.
    async fn subtitle_stage(
        &self,
        episode: &mut Episode,
        fetches: &mut usize,
        report: &mut PassReport,
    ) -> bool {
        if evaluate(episode, Stage::Subtitles, &self.options.policy) != Gate::NeedsWork {
            return false;
        }
        if let Some(max) = self.options.max_fetches {
            if *fetches >= max {
                report.deferred += 1;
                return true;
            }
        }
        if *fetches > 0 && !self.options.request_spacing.is_zero() {
            tokio::time::sleep(self.options.request_spacing).await;
        }
        *fetches += 1;

        match self.subtitles.fetch(&episode.id).await {
            Ok(SubtitleFetch::Text(text)) if !text.trim().is_empty() => {
                log::info!("Fetched subtitles for {} ({} chars)", episode.id, text.len());
                merge(episode, EpisodePatch::subtitles(text));
                episode.enrichment_meta.subtitles = AttemptState::Resolved;
                report.subtitles_fetched += 1;
            }
            Ok(_) => {
                log::info!("No subtitles exist for {}", episode.id);
                merge(episode, EpisodePatch::subtitles(""));
                episode.enrichment_meta.subtitles = AttemptState::Resolved;
                report.subtitles_absent += 1;
            }
            Err(e) => {
                log::warn!("Subtitle fetch for {} failed: {}", episode.id, e);
                episode.enrichment_meta.subtitles =
                    episode.enrichment_meta.subtitles.failed(e.class(), Utc::now());
                report.failures += 1;
            }
        }
        false
    }

    async fn structured_stage(&self, episode: &mut Episode, report: &mut PassReport) {
        if evaluate(episode, Stage::Structured, &self.options.policy) != Gate::NeedsWork {
            return;
        }

        let known = episode.structured.clone().unwrap_or_default();
        let wanted = known.missing();
        let answer = {
            let request = ExtractionRequest {
                video_id: &episode.id,
                title: &episode.title,
                subtitles: episode.subtitles.as_deref().unwrap_or_default(),
                known: &known,
                wanted: &wanted,
            };
            self.extractor.extract(&request).await
        };

        match answer.and_then(|value| validate(&value)) {
            Ok(extracted) => {
                // Only the gaps are taken from the answer; known subfields stay.
                let filled = extracted.only(&wanted);
                merge(episode, EpisodePatch::structured(filled));
                episode.enrichment_meta.structured = AttemptState::Resolved;
                report.structured_extracted += 1;

                let still_missing = episode
                    .structured
                    .as_ref()
                    .map(|s| s.missing())
                    .unwrap_or_default();
                if still_missing.is_empty() {
                    log::info!("Structured data complete for {}", episode.id);
                } else {
                    log::info!(
                        "Structured data for {} still missing {:?}",
                        episode.id,
                        still_missing
                    );
                }
            }
            Err(e) => {
                log::warn!("Extraction for {} failed: {}", episode.id, e);
                episode.enrichment_meta.structured =
                    episode.enrichment_meta.structured.failed(e.class(), Utc::now());
                report.failures += 1;
            }
        }
    }

    async fn persist(&self, store: &dyn SnapshotStore, collection: &Collection) -> Result<(), PipelineError> {
        let attempts = self.options.save_attempts.max(1);
        let mut attempt = 1;
        loop {
            match store.save(collection) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    let delay = self.options.save_backoff * attempt;
                    log::warn!(
                        "Snapshot save attempt {} failed, retrying in {:?}: {}",
                        attempt,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("Snapshot save failed after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
