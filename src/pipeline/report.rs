use crate::gate::{evaluate, BlockReason, Gate, GatePolicy, Stage};
use crate::store::{AttemptState, Collection, Episode};
use serde::Serialize;
use uuid::Uuid;

/// A record that still needs work after a pass, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteRecord {
    pub id: String,
    pub stage: Stage,
    pub reason: String,
}

/// Outcome of one enrichment pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub records: usize,
    pub subtitles_fetched: usize,
    pub subtitles_absent: usize,
    pub structured_extracted: usize,
    /// Per-record failures (fetch or extraction), isolated from the pass.
    pub failures: usize,
    /// Records skipped because the fetch budget ran out.
    pub deferred: usize,
    /// Records whose persisted form changed.
    pub changed: usize,
    /// Records rewritten while loading (duplicates folded, old layout lifted).
    pub normalized: usize,
    pub saved: bool,
    pub incomplete: Vec<IncompleteRecord>,
}

impl PassReport {
    pub fn new() -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            records: 0,
            subtitles_fetched: 0,
            subtitles_absent: 0,
            structured_extracted: 0,
            failures: 0,
            deferred: 0,
            changed: 0,
            normalized: 0,
            saved: false,
            incomplete: Vec::new(),
        }
    }

    /// Record why `episode` is not complete yet, for every stage that isn't.
    pub(crate) fn note_incomplete(&mut self, episode: &Episode, policy: &GatePolicy, deferred: bool) {
        for stage in [Stage::Subtitles, Stage::Structured] {
            let reason = match evaluate(episode, stage, policy) {
                Gate::AlreadyComplete => continue,
                Gate::NeedsWork if deferred && stage == Stage::Subtitles => {
                    "deferred: fetch budget for this pass used up".to_string()
                }
                Gate::NeedsWork => needs_work_reason(episode, stage),
                Gate::Blocked(BlockReason::NoSubtitles) => "waiting for subtitles".to_string(),
                Gate::Blocked(BlockReason::AttemptsExhausted) => {
                    format!("gave up: {}", needs_work_reason(episode, stage))
                }
            };
            self.incomplete.push(IncompleteRecord {
                id: episode.id.clone(),
                stage,
                reason,
            });
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records: {} subtitles fetched, {} without subtitles, {} extracted, {} failed, {} deferred, {} changed, {} normalized, {} incomplete",
            self.records,
            self.subtitles_fetched,
            self.subtitles_absent,
            self.structured_extracted,
            self.failures,
            self.deferred,
            self.changed,
            self.normalized,
            self.incomplete.len()
        )
    }
}

impl Default for PassReport {
    fn default() -> Self {
        Self::new()
    }
}

fn needs_work_reason(episode: &Episode, stage: Stage) -> String {
    match episode.enrichment_meta.stage(stage) {
        AttemptState::PendingRetry {
            count, last_error, ..
        } => format!("{} after {} attempt(s)", last_error, count),
        AttemptState::NeverAttempted => "not attempted yet".to_string(),
        AttemptState::Resolved => match &episode.structured {
            Some(s) if stage == Stage::Structured => {
                let missing: Vec<String> = s.missing().iter().map(|f| f.to_string()).collect();
                format!("unresolved: {}", missing.join(", "))
            }
            _ => "not attempted yet".to_string(),
        },
    }
}

/// Gate decisions per stage across a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub needs_work: usize,
    pub complete: usize,
    pub waiting_for_subtitles: usize,
    pub attempts_exhausted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    pub records: usize,
    pub subtitles: StageCounts,
    pub structured: StageCounts,
}

/// Evaluate the gate for every record without touching anything.
pub fn collection_status(collection: &Collection, policy: &GatePolicy) -> CollectionStatus {
    let mut status = CollectionStatus {
        records: collection.len(),
        ..Default::default()
    };
    for episode in collection.iter() {
        for stage in [Stage::Subtitles, Stage::Structured] {
            let counts = match stage {
                Stage::Subtitles => &mut status.subtitles,
                Stage::Structured => &mut status.structured,
            };
            match evaluate(episode, stage, policy) {
                Gate::NeedsWork => counts.needs_work += 1,
                Gate::AlreadyComplete => counts.complete += 1,
                Gate::Blocked(BlockReason::NoSubtitles) => counts.waiting_for_subtitles += 1,
                Gate::Blocked(BlockReason::AttemptsExhausted) => counts.attempts_exhausted += 1,
            }
        }
    }
    status
}
