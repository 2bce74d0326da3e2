use super::vtt::clean_vtt;
use super::{SubtitleFetch, SubtitleSource};
use crate::config::SubtitleConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

const RATE_LIMIT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(8),
    Duration::from_secs(30),
];
const COOKIES_STALE_DAYS: u64 = 30;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Subtitle source backed by the `yt-dlp` executable.
pub struct YtDlpSubtitles {
    yt_dlp_path: PathBuf,
    language: String,
    cookies_file: Option<PathBuf>,
    backoff: Vec<Duration>,
}

/// How a failed yt-dlp run should be treated.
#[derive(Debug)]
enum Failure {
    Absent,
    Error(FetchError),
    Unclassified(String),
}

impl YtDlpSubtitles {
    pub fn new(config: &SubtitleConfig) -> Self {
        let cookies_file = config.cookies_file.clone().filter(|p| p.exists());
        match &cookies_file {
            Some(path) => {
                log::info!("Using cookies file: {:?}", path);
                check_cookies_age(path);
            }
            None => log::warn!(
                "No cookies file found; YouTube may trigger its anti-bot check"
            ),
        }

        Self {
            yt_dlp_path: config.yt_dlp_path.clone(),
            language: config.language.clone(),
            cookies_file,
            backoff: RATE_LIMIT_BACKOFF.to_vec(),
        }
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    fn command(&self, video_id: &str, out_dir: &Path, mode_flag: &str) -> Command {
        let mut cmd = Command::new(&self.yt_dlp_path);
        cmd.arg("--skip-download")
            .args(["--sub-format", "vtt"])
            .arg("-o")
            .arg(out_dir.join("%(id)s.%(ext)s"))
            .arg(format!("https://www.youtube.com/watch?v={}", video_id));
        if let Some(cookies) = &self.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.args([
            "--extractor-args",
            "youtube:player_client=android,web",
            "--user-agent",
            USER_AGENT,
            "--sleep-requests",
            "1",
            "--sleep-subtitles",
            "1",
        ]);
        cmd.arg(mode_flag).args(["--sub-lang", self.language.as_str()]);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run yt-dlp once; `Err` carries stderr.
    async fn run(&self, video_id: &str, out_dir: &Path, mode_flag: &str) -> Result<(), Failure> {
        let output = self
            .command(video_id, out_dir, mode_flag)
            .output()
            .await
            .map_err(|e| {
                Failure::Error(FetchError::Transient(format!(
                    "Failed to spawn yt-dlp: {}",
                    e
                )))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(classify_stderr(video_id, &stderr))
        }
    }

    /// One fetch: manual subtitles first, then auto-generated ones.
    async fn try_fetch(&self, video_id: &str) -> Result<SubtitleFetch, FetchError> {
        let temp_dir = tempfile::TempDir::new()
            .map_err(|e| FetchError::Transient(format!("Failed to create temp dir: {}", e)))?;

        for mode_flag in ["--write-sub", "--write-auto-sub"] {
            match self.run(video_id, temp_dir.path(), mode_flag).await {
                Ok(()) => {}
                Err(Failure::Absent) => return Ok(SubtitleFetch::Absent),
                Err(Failure::Error(e)) => return Err(e),
                Err(Failure::Unclassified(stderr)) => {
                    if mode_flag == "--write-auto-sub" {
                        return Err(FetchError::Transient(format!(
                            "yt-dlp failed for {}: {}",
                            video_id,
                            stderr.trim()
                        )));
                    }
                    log::debug!("Manual subtitles failed for {}, trying auto captions", video_id);
                }
            }

            if let Some(vtt_path) = find_vtt(temp_dir.path())? {
                let raw = tokio::fs::read_to_string(&vtt_path).await.map_err(|e| {
                    FetchError::Transient(format!("Failed to read {:?}: {}", vtt_path, e))
                })?;
                let text = clean_vtt(&raw);
                return Ok(if text.is_empty() {
                    SubtitleFetch::Absent
                } else {
                    SubtitleFetch::Text(text)
                });
            }
        }

        // Both runs succeeded without writing anything: the video has none.
        Ok(SubtitleFetch::Absent)
    }
}

#[async_trait]
impl SubtitleSource for YtDlpSubtitles {
    async fn fetch(&self, video_id: &str) -> Result<SubtitleFetch, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.try_fetch(video_id).await {
                Err(FetchError::RateLimited(msg)) if attempt < self.backoff.len() => {
                    let delay = self.backoff[attempt];
                    log::warn!(
                        "Subtitle fetch attempt {} for {} rate limited, retrying in {}s: {}",
                        attempt + 1,
                        video_id,
                        delay.as_secs(),
                        msg
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn classify_stderr(video_id: &str, stderr: &str) -> Failure {
    let lower = stderr.to_lowercase();
    if stderr.contains("429") {
        Failure::Error(FetchError::RateLimited(format!(
            "Rate limit hit for video {}",
            video_id
        )))
    } else if stderr.contains("Sign in to confirm") || lower.contains("not a bot") {
        Failure::Error(FetchError::BotCheck(format!(
            "YouTube anti-bot detection triggered for {}; cookies may be stale",
            video_id
        )))
    } else if lower.contains("not available on this app")
        || lower.contains("login required")
        || lower.contains("members-only")
    {
        Failure::Error(FetchError::Transient(format!(
            "Video {} needs a fresh logged-in session (cookies) or a newer yt-dlp",
            video_id
        )))
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
    {
        Failure::Absent
    } else {
        Failure::Unclassified(stderr.to_string())
    }
}

fn find_vtt(dir: &Path) -> Result<Option<PathBuf>, FetchError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FetchError::Transient(format!("Failed to list {:?}: {}", dir, e)))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "vtt"))
        .collect();
    files.sort();
    Ok(files.into_iter().next())
}

fn check_cookies_age(path: &Path) {
    let age_days = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map(|elapsed| elapsed.as_secs() / 86_400);

    match age_days {
        Some(days) if days > COOKIES_STALE_DAYS => log::warn!(
            "Cookies file is {} days old; refresh it for reliable subtitle downloads",
            days
        ),
        Some(days) => log::info!("Cookies file is {} days old", days),
        None => log::warn!("Could not check age of cookies file {:?}", path),
    }
}
