//! Structured extraction interface and validation of extractor answers.

use crate::error::ExtractionError;
use crate::store::{Field, Structured, Subfield};
use async_trait::async_trait;
use serde_json::Value;

/// What the extractor is asked for one record.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub video_id: &'a str,
    pub title: &'a str,
    pub subtitles: &'a str,
    /// Subfields already resolved; the extractor only has to fill the gaps.
    pub known: &'a Structured,
    pub wanted: &'a [Subfield],
}

/// LLM-backed extractor of guest, year and movies.
///
/// Returns the raw JSON answer; [`validate`] turns it into subfields.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<Value, ExtractionError>;
}

/// Normalize an extractor answer. Every subfield ends up present: a
/// missing, `null`, placeholder or unparseable value becomes `Unresolved`.
/// Subfields are validated independently, so a garbled `movies` does not
/// discard a good `year`.
pub fn validate(answer: &Value) -> Result<Structured, ExtractionError> {
    let obj = match answer {
        Value::Object(obj) => obj,
        other => {
            return Err(ExtractionError::Malformed(format!(
                "expected a JSON object, got {}",
                json_kind(other)
            )))
        }
    };

    let field = |key: &str| obj.get(key).cloned().unwrap_or(Value::Null);
    Ok(Structured {
        guest: Field::from_json(&field("guest")),
        year: Field::from_json(&field("year")),
        movies: Field::from_json(&field("movies")),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
