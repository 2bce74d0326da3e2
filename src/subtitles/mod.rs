pub mod vtt;
pub mod ytdlp;

use crate::error::FetchError;
use async_trait::async_trait;

pub use ytdlp::YtDlpSubtitles;

/// Result of a subtitle fetch that reached a conclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleFetch {
    Text(String),
    /// The video has no subtitles (or no longer exists). Terminal.
    Absent,
}

/// Obtains transcript text for a video.
///
/// Implementations own their retry and timeout policy; an `Err` means the
/// record should be tried again on a later pass.
#[async_trait]
pub trait SubtitleSource: Send + Sync {
    async fn fetch(&self, video_id: &str) -> Result<SubtitleFetch, FetchError>;
}
