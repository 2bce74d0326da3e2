//! WebVTT to plain transcript text.

use regex::Regex;
use std::sync::OnceLock;

fn timestamp_regex() -> &'static Regex {
    static TS: OnceLock<Regex> = OnceLock::new();
    TS.get_or_init(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2})").expect("valid timestamp regex"))
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid tag regex"))
}

/// Strip headers, cue numbers and inline tags; collapse the rolling
/// duplicates auto-captions produce; mark each new minute with `[HH:MM:SS]`.
pub fn clean_vtt(content: &str) -> String {
    let mut cleaned: Vec<String> = Vec::new();
    let mut prev_text: Option<String> = None;
    let mut last_minute: Option<u32> = None;

    for raw in content.lines() {
        let line = raw.trim();

        if line.is_empty()
            || line.starts_with("WEBVTT")
            || line.starts_with("Kind:")
            || line.starts_with("Language:")
        {
            continue;
        }

        if line.contains("-->") {
            if let Some(caps) = timestamp_regex().captures(line) {
                let minute: u32 = caps[2].parse().unwrap_or(0);
                if last_minute != Some(minute) {
                    cleaned.push(format!("[{}]", &caps[0]));
                    last_minute = Some(minute);
                }
            }
            continue;
        }

        if line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let text = tag_regex().replace_all(line, "").to_string();
        if !text.trim().is_empty() && prev_text.as_deref() != Some(text.as_str()) {
            cleaned.push(text.clone());
            prev_text = Some(text);
        }
    }

    cleaned.join("\n")
}
