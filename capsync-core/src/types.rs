//! Core domain types for capsync
//!
//! These types are the data shared between execution contexts. Everything
//! here round-trips through the shared state store as JSON, so the serde
//! representation is the wire format other contexts read.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **VideoContext** | The video a tab is currently showing (id, title, url) |
//! | **CaptionSet** | Ordered, time-stamped transcript segments for one video |
//! | **CollectionJob** | Transient, panel-local record of an in-flight acquisition |
//! | **ChatMode** | `default` (per-video chat) or `accumulate` (cross-video session) |
//! | **Negative Cache** | Video ids known to have no captions |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================
// Video
// ============================================

/// Video hosting site a [`VideoContext`] was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Bilibili,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Bilibili => "bilibili",
        }
    }

    /// Host substring matching this platform's tab URLs
    pub fn host(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube.com",
            Platform::Bilibili => "bilibili.com",
        }
    }

    /// Canonical watch URL for a video id on this platform
    pub fn canonical_url(&self, video_id: &str) -> String {
        match self {
            Platform::YouTube => format!("https://www.youtube.com/watch?v={}", video_id),
            Platform::Bilibili => format!("https://www.bilibili.com/video/{}", video_id),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube" => Ok(Platform::YouTube),
            "bilibili" => Ok(Platform::Bilibili),
            _ => Err(format!("unknown platform: {}", s)),
        }
    }
}

/// The video a page agent last observed.
///
/// Stored under `currentVideoInfo`; the latest write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContext {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub platform: Platform,
    pub observed_at: DateTime<Utc>,
}

impl VideoContext {
    pub fn new(platform: Platform, video_id: impl Into<String>, title: impl Into<String>) -> Self {
        let video_id = video_id.into();
        Self {
            url: platform.canonical_url(&video_id),
            video_id,
            title: title.into(),
            platform,
            observed_at: Utc::now(),
        }
    }

    /// Title if known, otherwise the id
    pub fn display_name(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.video_id
        } else {
            &self.title
        }
    }
}

// ============================================
// Captions
// ============================================

/// One time-stamped caption line.
///
/// The backend answers with either `start`/`end` or `start_time`/`end_time`;
/// both are accepted and stored as `startTime`/`endTime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionSegment {
    #[serde(alias = "start", alias = "start_time")]
    pub start_time: f64,
    #[serde(alias = "end", alias = "end_time")]
    pub end_time: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "source_id")]
    pub source_id: Option<String>,
}

/// Ordered captions for a single video, stored under `currentSubtitles`.
///
/// Immutable once published; a re-collection replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionSet {
    pub video_id: String,
    pub segments: Vec<CaptionSegment>,
}

impl CaptionSet {
    /// Build a set, ordering segments by start time.
    pub fn new(video_id: impl Into<String>, mut segments: Vec<CaptionSegment>) -> Self {
        segments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        Self {
            video_id: video_id.into(),
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True when this set is the published captions for `video_id`
    pub fn matches(&self, video_id: &str) -> bool {
        self.video_id == video_id && !self.segments.is_empty()
    }

    /// Stable digest of the segment content, used to tell equivalent
    /// re-collections apart from real changes in the logs.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.video_id.as_bytes());
        for seg in &self.segments {
            hasher.update(seg.start_time.to_le_bytes());
            hasher.update(seg.end_time.to_le_bytes());
            hasher.update(seg.text.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Plain transcript text, one segment per line
    pub fn transcript(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================
// Collection jobs
// ============================================

/// Lifecycle of a [`CollectionJob`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Collecting,
    Collected,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Collecting => "collecting",
            JobStatus::Collected => "collected",
            JobStatus::Failed => "failed",
        }
    }
}

/// Panel-local acquisition record. Not authoritative: the store's matching
/// [`CaptionSet`] is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionJob {
    pub video_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
}

impl CollectionJob {
    pub fn start(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            status: JobStatus::Collecting,
            attempts: 0,
            started_at: Utc::now(),
        }
    }
}

// ============================================
// Chat
// ============================================

/// Chat session mode, persisted under `chatMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// History is scoped to the current video
    #[default]
    Default,
    /// History and the remote session span video changes
    Accumulate,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Default => "default",
            ChatMode::Accumulate => "accumulate",
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            ChatMode::Default => ChatMode::Accumulate,
            ChatMode::Accumulate => ChatMode::Default,
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a chat [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single chat history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, text: &str) -> CaptionSegment {
        CaptionSegment {
            start_time: start,
            end_time: start + 1.0,
            text: text.to_string(),
            source_id: None,
        }
    }

    #[test]
    fn test_caption_set_sorts_by_start() {
        let set = CaptionSet::new("abc", vec![seg(5.0, "b"), seg(1.0, "a"), seg(9.0, "c")]);
        let starts: Vec<f64> = set.segments.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![1.0, 5.0, 9.0]);
        assert_eq!(set.transcript(), "a\nb\nc");
    }

    #[test]
    fn test_segment_accepts_backend_shapes() {
        let a: CaptionSegment =
            serde_json::from_str(r#"{"start": 1.5, "end": 2.0, "text": "hi"}"#).unwrap();
        let b: CaptionSegment =
            serde_json::from_str(r#"{"start_time": 1.5, "end_time": 2.0, "text": "hi"}"#).unwrap();
        assert_eq!(a, b);

        let stored = serde_json::to_value(&a).unwrap();
        assert_eq!(stored["startTime"], 1.5);
        assert!(stored.get("sourceId").is_none());
    }

    #[test]
    fn test_content_hash_ignores_input_order() {
        let one = CaptionSet::new("abc", vec![seg(1.0, "a"), seg(2.0, "b")]);
        let two = CaptionSet::new("abc", vec![seg(2.0, "b"), seg(1.0, "a")]);
        assert_eq!(one.content_hash(), two.content_hash());

        let other = CaptionSet::new("xyz", vec![seg(1.0, "a"), seg(2.0, "b")]);
        assert_ne!(one.content_hash(), other.content_hash());
    }

    #[test]
    fn test_matches_requires_segments() {
        assert!(!CaptionSet::new("abc", vec![]).matches("abc"));
        assert!(CaptionSet::new("abc", vec![seg(0.0, "x")]).matches("abc"));
        assert!(!CaptionSet::new("abc", vec![seg(0.0, "x")]).matches("def"));
    }

    #[test]
    fn test_chat_mode_serde() {
        assert_eq!(
            serde_json::to_value(ChatMode::Accumulate).unwrap(),
            serde_json::json!("accumulate")
        );
        assert_eq!(ChatMode::Default.flipped(), ChatMode::Accumulate);
        assert_eq!(ChatMode::default(), ChatMode::Default);
    }

    #[test]
    fn test_video_context_display_name_falls_back_to_id() {
        let ctx = VideoContext::new(Platform::YouTube, "dQw4w9WgXcQ", "");
        assert_eq!(ctx.display_name(), "dQw4w9WgXcQ");
        assert_eq!(ctx.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }
}
