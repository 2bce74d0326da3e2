//! Ollama integration for local LLM extraction
//!
//! Calls the Ollama REST API to pull guest, year and films out of episode
//! transcripts.

use crate::config::OllamaConfig;
use crate::error::ExtractionError;
use crate::extract::{ExtractionRequest, StructuredExtractor};
use crate::store::{Field, Subfield};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a content extraction assistant. Analyze transcripts of Criterion Closet videos, where a guest visits the Criterion Collection closet and picks films. Always respond with valid JSON.";

/// Ollama client for making API calls
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_transcript_chars: usize,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            max_transcript_chars: config.max_transcript_chars,
        }
    }

    /// Check if Ollama is running and the model is available
    pub async fn health_check(&self) -> Result<OllamaStatus, ExtractionError> {
        let tags_url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&tags_url)
            .send()
            .await
            .map_err(|e| ExtractionError::Unavailable(format!("Ollama not running: {}", e)))?;

        if !response.status().is_success() {
            return Err(ExtractionError::Unavailable(format!(
                "Ollama server returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await.map_err(|e| {
            ExtractionError::Malformed(format!("Failed to parse Ollama response: {}", e))
        })?;

        let family = self.model.split(':').next().unwrap_or(&self.model);
        let model_available = tags.models.iter().any(|m| m.name.starts_with(family));

        Ok(OllamaStatus {
            running: true,
            model: self.model.clone(),
            model_available,
            available_models: tags.models.iter().map(|m| m.name.clone()).collect(),
        })
    }

    /// Generate a JSON-mode completion from Ollama
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, ExtractionError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: system.map(|s| s.to_string()),
            stream: false,
            format: Some("json".to_string()),
            options: Some(GenerateOptions {
                temperature: 0.1,
                num_predict: 1024,
            }),
        };

        log::info!(
            "Sending request to Ollama: model={}, prompt_len={}",
            self.model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Unavailable(format!("Failed to call Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Unavailable(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: GenerateResponse = response.json().await.map_err(|e| {
            ExtractionError::Malformed(format!("Failed to parse Ollama response: {}", e))
        })?;

        log::info!(
            "Ollama response received: {} chars, eval_duration={:?}ms",
            result.response.len(),
            result.eval_duration.map(|d| d / 1_000_000)
        );

        Ok(result.response)
    }

    fn build_prompt(&self, request: &ExtractionRequest<'_>) -> String {
        let mut known = Vec::new();
        if let Field::Known(guest) = &request.known.guest {
            known.push(format!("guest: {}", guest));
        }
        if let Field::Known(year) = &request.known.year {
            known.push(format!("year: {}", year));
        }
        if let Field::Known(movies) = &request.known.movies {
            known.push(format!("movies: {}", movies.join("; ")));
        }

        let wanted: Vec<String> = request.wanted.iter().map(Subfield::to_string).collect();
        let transcript = truncate_chars(request.subtitles, self.max_transcript_chars);

        format!(
            "Extract the structured data from the following video transcript.\n\
             Return a JSON object with exactly these keys: \"guest\" (the guest's name), \
             \"year\" (the year the video was published, as a number), \
             \"movies\" (array of film titles discussed, in the order mentioned).\n\
             Use the string \"Unknown\" for any value you cannot determine.\n\
             Fields still needed: {}.\n\
             Already known (do not change): {}.\n\n\
             Title: {}\n\n---\nTRANSCRIPT:\n{}\n---",
            wanted.join(", "),
            if known.is_empty() { "nothing".to_string() } else { known.join(" | ") },
            request.title,
            transcript
        )
    }
}

#[async_trait]
impl StructuredExtractor for OllamaClient {
    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<Value, ExtractionError> {
        let prompt = self.build_prompt(request);
        let response = self.generate(&prompt, Some(SYSTEM_PROMPT)).await?;
        extract_json_from_response(&response).ok_or_else(|| {
            ExtractionError::Malformed(format!(
                "no JSON object in response for {}",
                request.video_id
            ))
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Extract JSON from LLM response (handles markdown code blocks)
fn extract_json_from_response(response: &str) -> Option<Value> {
    let trimmed = response.trim();

    // Try direct parse first
    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        return Some(json);
    }

    // Try to extract from markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after_marker = &trimmed[start + 7..];
        if let Some(end) = after_marker.find("```") {
            if let Ok(json) = serde_json::from_str::<Value>(after_marker[..end].trim()) {
                return Some(json);
            }
        }
    }

    // Find the first balanced {...} object
    let start = trimmed.find('{')?;
    let mut depth = 0;
    for (i, c) in trimmed[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str::<Value>(&trimmed[start..start + i + 1]).ok();
                }
            }
            _ => {}
        }
    }

    None
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaStatus {
    pub running: bool,
    pub model: String,
    pub model_available: bool,
    pub available_models: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Structured;

    #[test]
    fn test_extract_json_from_response() {
        // Direct JSON
        let json = extract_json_from_response(r#"{"guest": "test"}"#);
        assert!(json.is_some());

        // Markdown code block
        let json = extract_json_from_response(
            r#"Here's the result:
```json
{"movies": ["Stalker", "Solaris"]}
```
"#,
        );
        assert_eq!(json.unwrap()["movies"][1], "Solaris");

        // JSON embedded in text, with nesting
        let json = extract_json_from_response(
            r#"The extracted data is: {"guest": "X", "meta": {"a": 1}} and that's it."#,
        );
        assert_eq!(json.unwrap()["meta"]["a"], 1);

        assert!(extract_json_from_response("no json here").is_none());
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn test_prompt_lists_known_and_wanted_fields() {
        let client = OllamaClient::new(&OllamaConfig::default());
        let known = Structured {
            guest: Field::Unresolved,
            year: Field::Known(2005),
            movies: Field::Known(vec!["A".to_string()]),
        };
        let wanted = [Subfield::Guest];
        let request = ExtractionRequest {
            video_id: "v1",
            title: "Guest picks",
            subtitles: "Intro...",
            known: &known,
            wanted: &wanted,
        };
        let prompt = client.build_prompt(&request);
        assert!(prompt.contains("Fields still needed: guest."));
        assert!(prompt.contains("year: 2005 | movies: A"));
        assert!(prompt.contains("Intro..."));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..OllamaConfig::default()
        };
        let client = OllamaClient::new(&config);
        assert!(matches!(
            client.health_check().await,
            Err(ExtractionError::Unavailable(_))
        ));
    }
}
