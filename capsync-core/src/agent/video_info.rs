//! Video id and title extraction from page location and document title

use crate::types::{Platform, VideoContext};
use regex::Regex;
use std::sync::OnceLock;

fn youtube_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:youtube\.com/watch\?v=|/videos/|youtu\.be/|embed/|[?&]v=)([^&?#\n/]+)")
            .expect("valid youtube id regex")
    })
}

fn bilibili_bv_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/video/(BV[a-zA-Z0-9]+)").expect("valid bilibili bv regex"))
}

fn bilibili_av_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/video/[aA][vV](\d+)").expect("valid bilibili av regex"))
}

fn bilibili_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:BV[a-zA-Z0-9]{10}|av\d+)$").expect("valid bilibili id regex")
    })
}

fn notification_count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\(\d+\)\s+").expect("valid notification count regex"))
}

fn bilibili_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:_哔哩哔哩_bilibili|\s*_\s*哔哩哔哩|\s*-\s*bilibili)$")
            .expect("valid bilibili title regex")
    })
}

/// Which supported site a URL belongs to, if any
pub fn detect_platform(url: &str) -> Option<Platform> {
    let lower = url.to_ascii_lowercase();
    if lower.contains("bilibili.com") {
        Some(Platform::Bilibili)
    } else if lower.contains("youtube.com") || lower.contains("youtu.be") {
        Some(Platform::YouTube)
    } else {
        None
    }
}

/// Extract the platform and video id from a page URL
pub fn extract_video_id(url: &str) -> Option<(Platform, String)> {
    match detect_platform(url)? {
        Platform::YouTube => youtube_id_regex()
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| (Platform::YouTube, m.as_str().to_string())),
        Platform::Bilibili => {
            if let Some(bv) = bilibili_bv_regex().captures(url).and_then(|c| c.get(1)) {
                return Some((Platform::Bilibili, bv.as_str().to_string()));
            }
            bilibili_av_regex()
                .captures(url)
                .and_then(|c| c.get(1))
                .map(|m| (Platform::Bilibili, format!("av{}", m.as_str())))
        }
    }
}

/// Platform implied by the shape of a bare video id.
///
/// Only Bilibili ids are distinctive; anything else yields `None`.
pub fn platform_for_video_id(video_id: &str) -> Option<Platform> {
    bilibili_id_regex()
        .is_match(video_id)
        .then_some(Platform::Bilibili)
}

/// Strip site decorations from a document title
pub fn clean_title(platform: Platform, raw: &str) -> String {
    let trimmed = raw.trim();
    let cleaned = match platform {
        Platform::YouTube => {
            let without_suffix = trimmed.strip_suffix(" - YouTube").unwrap_or(trimmed);
            notification_count_regex()
                .replace(without_suffix, "")
                .into_owned()
        }
        Platform::Bilibili => bilibili_suffix_regex().replace(trimmed, "").into_owned(),
    };
    cleaned.trim().to_string()
}

/// Build a [`VideoContext`] from what the page currently shows
pub fn video_context_from(url: &str, raw_title: &str) -> Option<VideoContext> {
    let (platform, video_id) = extract_video_id(url)?;
    let title = clean_title(platform, raw_title);
    Some(VideoContext::new(platform, video_id, title))
}
