//! Enrichment gate: decides, without side effects, whether a record still
//! needs work for a stage.

use crate::store::{AttemptState, Episode, SubtitleState};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Subtitles,
    Structured,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subtitles => write!(f, "subtitles"),
            Self::Structured => write!(f, "structured"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Structured extraction needs subtitle text first.
    NoSubtitles,
    /// Too many failed attempts; left alone until the cooldown since the
    /// last attempt has passed or the attempt state is reset.
    AttemptsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum Gate {
    NeedsWork,
    AlreadyComplete,
    Blocked(BlockReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Failed attempts after which a stage is blocked. 0 = never.
    pub max_attempts: u32,
    /// How long an exhausted stage stays blocked after its last attempt.
    /// `None` = until reset.
    pub exhausted_cooldown: Option<TimeDelta>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            exhausted_cooldown: TimeDelta::try_hours(24),
        }
    }
}

impl GatePolicy {
    pub fn new(max_attempts: u32, cooldown_hours: u64) -> Self {
        Self {
            max_attempts,
            exhausted_cooldown: i64::try_from(cooldown_hours)
                .ok()
                .filter(|h| *h > 0)
                .and_then(TimeDelta::try_hours),
        }
    }
}

pub fn evaluate(episode: &Episode, stage: Stage, policy: &GatePolicy) -> Gate {
    evaluate_at(episode, stage, policy, Utc::now())
}

/// `evaluate` with an explicit clock, for the attempt cooldown.
pub fn evaluate_at(
    episode: &Episode,
    stage: Stage,
    policy: &GatePolicy,
    now: DateTime<Utc>,
) -> Gate {
    let decision = match stage {
        Stage::Subtitles => match episode.subtitle_state() {
            // An empty string records a confirmed "no subtitles".
            SubtitleState::Present | SubtitleState::ConfirmedAbsent => Gate::AlreadyComplete,
            SubtitleState::NotFetched => Gate::NeedsWork,
        },
        Stage::Structured => match episode.subtitle_state() {
            SubtitleState::NotFetched => Gate::Blocked(BlockReason::NoSubtitles),
            SubtitleState::ConfirmedAbsent => Gate::AlreadyComplete,
            SubtitleState::Present => match &episode.structured {
                None => Gate::NeedsWork,
                Some(s) if !s.is_complete() => Gate::NeedsWork,
                Some(_) => Gate::AlreadyComplete,
            },
        },
    };

    if decision == Gate::NeedsWork && attempts_exhausted(episode, stage, policy, now) {
        return Gate::Blocked(BlockReason::AttemptsExhausted);
    }
    decision
}

fn attempts_exhausted(
    episode: &Episode,
    stage: Stage,
    policy: &GatePolicy,
    now: DateTime<Utc>,
) -> bool {
    if policy.max_attempts == 0 {
        return false;
    }
    match episode.enrichment_meta.stage(stage) {
        AttemptState::PendingRetry {
            count,
            last_attempt_at,
            ..
        } if *count >= policy.max_attempts => match policy.exhausted_cooldown {
            Some(cooldown) => now.signed_duration_since(*last_attempt_at) < cooldown,
            None => true,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::store::{Field, Structured, Subfield};

    fn with_subtitles(text: &str) -> Episode {
        let mut e = Episode::stub("v1");
        e.subtitles = Some(text.to_string());
        e
    }

    fn complete() -> Structured {
        Structured {
            guest: Field::Known("Ari Aster".to_string()),
            year: Field::Known(2019),
            movies: Field::Known(vec!["Cries and Whispers".to_string()]),
        }
    }

    #[test]
    fn test_subtitle_stage() {
        let policy = GatePolicy::default();
        assert_eq!(
            evaluate(&Episode::stub("v1"), Stage::Subtitles, &policy),
            Gate::NeedsWork
        );
        assert_eq!(
            evaluate(&with_subtitles(""), Stage::Subtitles, &policy),
            Gate::AlreadyComplete
        );
        assert_eq!(
            evaluate(&with_subtitles("Intro..."), Stage::Subtitles, &policy),
            Gate::AlreadyComplete
        );
    }

    #[test]
    fn test_structured_blocked_without_subtitles() {
        assert_eq!(
            evaluate(&Episode::stub("v1"), Stage::Structured, &GatePolicy::default()),
            Gate::Blocked(BlockReason::NoSubtitles)
        );
    }

    #[test]
    fn test_structured_skipped_for_empty_subtitles() {
        assert_eq!(
            evaluate(&with_subtitles(""), Stage::Structured, &GatePolicy::default()),
            Gate::AlreadyComplete
        );
    }

    #[test]
    fn test_structured_needs_work_until_complete() {
        let policy = GatePolicy::default();
        let mut e = with_subtitles("Intro...");
        assert_eq!(evaluate(&e, Stage::Structured, &policy), Gate::NeedsWork);

        e.structured = Some(Structured {
            guest: Field::Unresolved,
            year: Field::Known(2005),
            movies: Field::Known(vec!["A".to_string()]),
        });
        assert_eq!(evaluate(&e, Stage::Structured, &policy), Gate::NeedsWork);
        assert_eq!(
            e.structured.as_ref().unwrap().missing(),
            vec![Subfield::Guest]
        );

        e.structured = Some(complete());
        assert_eq!(
            evaluate(&e, Stage::Structured, &policy),
            Gate::AlreadyComplete
        );
    }

    #[test]
    fn test_exhausted_attempts_block_the_stage() {
        let policy = GatePolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let mut e = Episode::stub("v1");
        let now = chrono::Utc::now();
        e.enrichment_meta.subtitles = AttemptState::NeverAttempted
            .failed(ErrorClass::Network, now)
            .failed(ErrorClass::Network, now);
        assert_eq!(
            evaluate(&e, Stage::Subtitles, &policy),
            Gate::Blocked(BlockReason::AttemptsExhausted)
        );
        assert_eq!(
            evaluate(&e, Stage::Subtitles, &GatePolicy::new(0, 24)),
            Gate::NeedsWork
        );
    }

    #[test]
    fn test_exhausted_attempts_do_not_reopen_complete_stages() {
        let policy = GatePolicy::new(1, 24);
        let mut e = with_subtitles("text");
        e.structured = Some(complete());
        e.enrichment_meta.structured =
            AttemptState::NeverAttempted.failed(ErrorClass::MalformedResponse, chrono::Utc::now());
        assert_eq!(
            evaluate(&e, Stage::Structured, &policy),
            Gate::AlreadyComplete
        );
    }

    #[test]
    fn test_exhausted_stage_reopens_after_cooldown() {
        let policy = GatePolicy::new(2, 24);
        let last = chrono::Utc::now();
        let mut e = Episode::stub("v1");
        e.enrichment_meta.subtitles = AttemptState::NeverAttempted
            .failed(ErrorClass::BotCheck, last)
            .failed(ErrorClass::BotCheck, last);

        let soon = last + TimeDelta::try_hours(1).unwrap();
        assert_eq!(
            evaluate_at(&e, Stage::Subtitles, &policy, soon),
            Gate::Blocked(BlockReason::AttemptsExhausted)
        );
        let later = last + TimeDelta::try_hours(25).unwrap();
        assert_eq!(
            evaluate_at(&e, Stage::Subtitles, &policy, later),
            Gate::NeedsWork
        );

        let no_cooldown = GatePolicy::new(2, 0);
        assert_eq!(no_cooldown.exhausted_cooldown, None);
        assert_eq!(
            evaluate_at(&e, Stage::Subtitles, &no_cooldown, later),
            Gate::Blocked(BlockReason::AttemptsExhausted)
        );
    }
}
