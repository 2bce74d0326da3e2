//! Pipeline configuration: YAML file, then environment overrides.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "closet.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub snapshot_path: PathBuf,
    /// Subtitle fetches per pass. 0 = unlimited.
    pub max_fetches_per_pass: usize,
    /// Pause between consecutive subtitle fetches.
    pub request_spacing_ms: u64,
    /// Failed attempts after which a stage stops being retried. 0 = never.
    pub max_attempts: u32,
    /// Hours an exhausted stage waits before it is tried again. 0 = never.
    pub exhausted_cooldown_hours: u64,
    pub subtitles: SubtitleConfig,
    pub ollama: OllamaConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data").join("enriched_playlist.json"),
            max_fetches_per_pass: 0,
            request_spacing_ms: 2000,
            max_attempts: 5,
            exhausted_cooldown_hours: 24,
            subtitles: SubtitleConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub yt_dlp_path: PathBuf,
    pub language: String,
    pub cookies_file: Option<PathBuf>,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: PathBuf::from("yt-dlp"),
            language: "en".to_string(),
            cookies_file: Some(PathBuf::from("data").join("cookies.txt")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_transcript_chars: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout_secs: 120,
            max_transcript_chars: 60_000,
        }
    }
}

impl PipelineConfig {
    /// Load from `explicit`, else `./closet.yaml`, else the user config
    /// dir, else defaults; then apply environment overrides.
    pub fn load(explicit: Option<&Path>, work_dir: &Path) -> Result<Self, PipelineError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => [
                Some(work_dir.join(CONFIG_FILE_NAME)),
                dirs::config_dir().map(|d| d.join("closet").join("config.yaml")),
            ]
            .into_iter()
            .flatten()
            .find(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {:?}: {}", path, e))
                })?;
                log::info!("Configuration loaded from {:?}", path);
                serde_yaml::from_str::<PipelineConfig>(&content)?
            }
            None => PipelineConfig::default(),
        };

        config.apply_env(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| load_env_value(work_dir, key))
        })?;
        Ok(config)
    }

    fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), PipelineError> {
        if let Some(v) = lookup("CLOSET_SNAPSHOT") {
            self.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAX_VIDEOS_PER_RUN") {
            self.max_fetches_per_pass = v.trim().parse().map_err(|_| {
                PipelineError::Config(format!("MAX_VIDEOS_PER_RUN is not a number: {:?}", v))
            })?;
        }
        if let Some(v) = lookup("YOUTUBE_COOKIES_FILE") {
            self.subtitles.cookies_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            self.ollama.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("OLLAMA_MODEL") {
            self.ollama.model = v;
        }
        Ok(())
    }

    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    pub fn max_fetches(&self) -> Option<usize> {
        (self.max_fetches_per_pass > 0).then_some(self.max_fetches_per_pass)
    }
}

/// Load a value from the .env file by key name
pub fn load_env_value(project_dir: &Path, key: &str) -> Option<String> {
    let env_path = project_dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(&env_path).ok()?;
    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}
