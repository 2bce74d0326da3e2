use crate::error::ErrorClass;
use crate::gate::Stage;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Literal written to the snapshot for a subfield the extractor could not determine.
pub const PLACEHOLDER: &str = "Unknown";

const MIN_YEAR: i64 = 1800;
const MAX_YEAR: i64 = 2100;

// ============================================================================
// Structured subfields
// ============================================================================

/// A value that can live inside a [`Field`].
///
/// `from_json` is the only way untrusted input (snapshot or LLM answer)
/// becomes a known value, so normalization lives here.
pub trait FieldValue: Sized + Clone + PartialEq {
    fn from_json(value: &Value) -> Option<Self>;
    fn to_json(&self) -> Value;
}

impl FieldValue for String {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || is_placeholder(trimmed) {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }
}

/// Release year of the episode.
impl FieldValue for i32 {
    fn from_json(value: &Value) -> Option<Self> {
        let year = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))?,
            Value::String(s) => year_regex()
                .find(s)
                .and_then(|m| m.as_str().parse::<i64>().ok())?,
            _ => return None,
        };
        if (MIN_YEAR..=MAX_YEAR).contains(&year) {
            i32::try_from(year).ok()
        } else {
            None
        }
    }

    fn to_json(&self) -> Value {
        Value::from(*self)
    }
}

/// Film titles, in first-mentioned order, without duplicates.
impl FieldValue for Vec<String> {
    fn from_json(value: &Value) -> Option<Self> {
        let titles = match value {
            Value::Array(items) => {
                let mut titles: Vec<String> = Vec::new();
                for item in items {
                    let title = match item {
                        Value::Object(obj) => obj.get("title").and_then(String::from_json),
                        other => String::from_json(other),
                    };
                    if let Some(title) = title {
                        if !titles.contains(&title) {
                            titles.push(title);
                        }
                    }
                }
                titles
            }
            Value::String(_) => String::from_json(value).into_iter().collect(),
            _ => Vec::new(),
        };
        if titles.is_empty() {
            None
        } else {
            Some(titles)
        }
    }

    fn to_json(&self) -> Value {
        Value::Array(self.iter().cloned().map(Value::String).collect())
    }
}

fn year_regex() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"\b(1[89]\d{2}|20\d{2}|2100)\b").expect("valid year regex"))
}

pub fn is_placeholder(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case(PLACEHOLDER)
}

/// One structured subfield: either a real value or the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Field<T> {
    Known(T),
    #[default]
    Unresolved,
}

impl<T: FieldValue> Field<T> {
    /// Lenient conversion: anything that is not a usable value is `Unresolved`.
    pub fn from_json(value: &Value) -> Self {
        match T::from_json(value) {
            Some(v) => Field::Known(v),
            None => Field::Unresolved,
        }
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Field::Known(v) => Some(v),
            Field::Unresolved => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Field::Known(_))
    }
}

impl<T: FieldValue> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Known(v) => v.to_json().serialize(s),
            Field::Unresolved => s.serialize_str(PLACEHOLDER),
        }
    }
}

impl<'de, T: FieldValue> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(Field::from_json(&value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subfield {
    Guest,
    Year,
    Movies,
}

impl std::fmt::Display for Subfield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guest => write!(f, "guest"),
            Self::Year => write!(f, "year"),
            Self::Movies => write!(f, "movies"),
        }
    }
}

/// LLM-extracted facts about an episode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Structured {
    #[serde(default)]
    pub guest: Field<String>,
    #[serde(default)]
    pub year: Field<i32>,
    #[serde(default)]
    pub movies: Field<Vec<String>>,
}

impl Structured {
    /// Subfields still holding the placeholder.
    pub fn missing(&self) -> Vec<Subfield> {
        let mut missing = Vec::new();
        if !self.guest.is_known() {
            missing.push(Subfield::Guest);
        }
        if !self.year.is_known() {
            missing.push(Subfield::Year);
        }
        if !self.movies.is_known() {
            missing.push(Subfield::Movies);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Copy of `self` keeping only the listed subfields; the rest become `Unresolved`.
    pub fn only(&self, subfields: &[Subfield]) -> Structured {
        let mut kept = Structured::default();
        for subfield in subfields {
            match subfield {
                Subfield::Guest => kept.guest = self.guest.clone(),
                Subfield::Year => kept.year = self.year.clone(),
                Subfield::Movies => kept.movies = self.movies.clone(),
            }
        }
        kept
    }

    /// Subfields that hold a real value.
    pub fn known_subfields(&self) -> Vec<Subfield> {
        let missing = self.missing();
        [Subfield::Guest, Subfield::Year, Subfield::Movies]
            .into_iter()
            .filter(|s| !missing.contains(s))
            .collect()
    }
}

// ============================================================================
// Enrichment bookkeeping
// ============================================================================

/// Retry state of one enrichment stage of one record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttemptState {
    #[default]
    NeverAttempted,
    PendingRetry {
        count: u32,
        last_error: ErrorClass,
        last_attempt_at: DateTime<Utc>,
    },
    /// The last attempt produced an answer (possibly "no subtitles" or
    /// placeholder subfields).
    Resolved,
}

impl AttemptState {
    pub fn attempt_count(&self) -> u32 {
        match self {
            AttemptState::PendingRetry { count, .. } => *count,
            _ => 0,
        }
    }

    /// Next state after a failed attempt.
    pub fn failed(&self, class: ErrorClass, at: DateTime<Utc>) -> AttemptState {
        AttemptState::PendingRetry {
            count: self.attempt_count() + 1,
            last_error: class,
            last_attempt_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrichmentMeta {
    #[serde(default)]
    pub subtitles: AttemptState,
    #[serde(default)]
    pub structured: AttemptState,
}

impl EnrichmentMeta {
    pub fn stage(&self, stage: Stage) -> &AttemptState {
        match stage {
            Stage::Subtitles => &self.subtitles,
            Stage::Structured => &self.structured,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut AttemptState {
        match stage {
            Stage::Subtitles => &mut self.subtitles,
            Stage::Structured => &mut self.structured,
        }
    }
}

// ============================================================================
// Episode record
// ============================================================================

/// One video of the series and everything known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    /// `None`: never fetched. `Some("")`: fetched, the video has none.
    #[serde(default)]
    pub subtitles: Option<String>,
    /// `None`: extraction never attempted.
    #[serde(default)]
    pub structured: Option<Structured>,
    #[serde(default)]
    pub enrichment_meta: EnrichmentMeta,
    /// Other playlist metadata, kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Episode {
    /// Metadata-only record, as first discovered in the playlist.
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            url: None,
            published_at: None,
            view_count: None,
            subtitles: None,
            structured: None,
            enrichment_meta: EnrichmentMeta::default(),
            extra: BTreeMap::new(),
        }
    }

    pub fn subtitle_state(&self) -> SubtitleState {
        match self.subtitles.as_deref() {
            None => SubtitleState::NotFetched,
            Some(text) if text.trim().is_empty() => SubtitleState::ConfirmedAbsent,
            Some(_) => SubtitleState::Present,
        }
    }

    /// Move `guest`, `year` and `movies` found at the top level of the
    /// record (older layout) under `structured`. Known subfields already
    /// under `structured` win. Returns true if anything moved.
    pub fn lift_top_level_structured(&mut self) -> bool {
        let mut lifted = false;
        let mut take = |key: &str| match self.extra.remove(key) {
            Some(value) => {
                lifted = true;
                value
            }
            None => Value::Null,
        };
        let legacy = Structured {
            guest: Field::from_json(&take("guest")),
            year: Field::from_json(&take("year")),
            movies: Field::from_json(&take("movies")),
        };
        if !lifted {
            return false;
        }
        self.structured = Some(match self.structured.take() {
            Some(current) => super::merge::merge_structured(current, legacy),
            None => legacy,
        });
        true
    }
}

/// Whether subtitles are there, as compared by `diff_is_meaningful`.
/// Blank text counts as confirmed absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleState {
    NotFetched,
    ConfirmedAbsent,
    Present,
}

/// Partial update for one record. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodePatch {
    pub title: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
    pub view_count: Option<u64>,
    pub extra: BTreeMap<String, Value>,
    pub subtitles: Option<String>,
    pub structured: Option<Structured>,
}

impl EpisodePatch {
    pub fn subtitles(text: impl Into<String>) -> Self {
        Self {
            subtitles: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn structured(structured: Structured) -> Self {
        Self {
            structured: Some(structured),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placeholder_round_trips_as_unknown() {
        let s = Structured::default();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(
            json,
            json!({"guest": "Unknown", "year": "Unknown", "movies": "Unknown"})
        );
        let back: Structured = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_lenient_subfield_parsing() {
        let s: Structured = serde_json::from_value(json!({
            "guest": "  Bong Joon-ho ",
            "year": "released in 2019",
            "movies": [{"title": "Parasite", "description": null}, "unknown", "", "Parasite", "Mother"]
        }))
        .unwrap();
        assert_eq!(s.guest, Field::Known("Bong Joon-ho".to_string()));
        assert_eq!(s.year, Field::Known(2019));
        assert_eq!(
            s.movies,
            Field::Known(vec!["Parasite".to_string(), "Mother".to_string()])
        );
    }

    #[test]
    fn test_missing_and_garbage_subfields_are_unresolved() {
        let s: Structured = serde_json::from_value(json!({
            "guest": null,
            "year": 42,
            "movies": []
        }))
        .unwrap();
        assert_eq!(
            s.missing(),
            vec![Subfield::Guest, Subfield::Year, Subfield::Movies]
        );

        let s: Structured = serde_json::from_value(json!({})).unwrap();
        assert!(!s.is_complete());
    }

    #[test]
    fn test_whole_float_years_are_accepted() {
        assert_eq!(Field::<i32>::from_json(&json!(2005.0)), Field::Known(2005));
        assert_eq!(Field::<i32>::from_json(&json!(2005.5)), Field::Unresolved);
        assert_eq!(Field::<i32>::from_json(&json!(1500.0)), Field::Unresolved);
    }

    #[test]
    fn test_only_keeps_requested_subfields() {
        let s = Structured {
            guest: Field::Known("Wes Anderson".to_string()),
            year: Field::Known(2014),
            movies: Field::Known(vec!["Rushmore".to_string()]),
        };
        let only_guest = s.only(&[Subfield::Guest]);
        assert_eq!(only_guest.guest, s.guest);
        assert_eq!(only_guest.year, Field::Unresolved);
        assert_eq!(only_guest.movies, Field::Unresolved);
    }

    #[test]
    fn test_episode_keeps_unknown_metadata() {
        let raw = json!({
            "id": "abc",
            "title": "Guest X",
            "duration": 612,
            "channel": "Criterion"
        });
        let episode: Episode = serde_json::from_value(raw).unwrap();
        assert_eq!(episode.subtitle_state(), SubtitleState::NotFetched);
        assert_eq!(episode.extra.get("duration"), Some(&json!(612)));

        let out = serde_json::to_value(&episode).unwrap();
        assert_eq!(out["channel"], json!("Criterion"));
        assert_eq!(out["subtitles"], Value::Null);
    }

    #[test]
    fn test_failed_attempt_increments_count() {
        let now = Utc::now();
        let state = AttemptState::NeverAttempted.failed(ErrorClass::Network, now);
        let state = state.failed(ErrorClass::RateLimited, now);
        assert_eq!(state.attempt_count(), 2);
        match state {
            AttemptState::PendingRetry { last_error, .. } => {
                assert_eq!(last_error, ErrorClass::RateLimited)
            }
            other => panic!("unexpected state {:?}", other),
        }
    }
}
