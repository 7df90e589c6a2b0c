//! Remote backend contract
//!
//! The panel and page agents talk to an opaque REST backend. Only the calls
//! the coordination layer needs are modelled, behind traits so tests can
//! substitute in-memory fakes:
//!
//! | Trait | Endpoints |
//! |-------|-----------|
//! | [`SessionBackend`] | `chat/session-status/`, `chat/session/end/`, `chat/export-notes/{id}/`, `chat/session/delete/`, `chat/session-videos/` |
//! | [`ChatBackend`] | `ai/chat-completion/`, `ai/chat-completion-default/` (streamed) |
//! | [`CaptionSource`](crate::agent::CaptionSource) | `auto-subtitles/?url=` |

pub mod client;
pub mod sse;

pub use client::BackendClient;
pub use sse::ChatChunk;

use crate::error::Result;
use crate::types::{CaptionSegment, ChatMode, Message, Role};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

/// Response of `GET chat/session-status/`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionStatus {
    #[serde(default)]
    pub has_active_session: bool,
    #[serde(default)]
    pub video_count: usize,
    #[serde(default)]
    pub video_ids: Vec<String>,
}

/// Response of `POST chat/session/end/`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EndedSession {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub videos_count: Option<u64>,
    #[serde(default)]
    pub messages_count: Option<u64>,
}

/// One video attached to an accumulate-mode session
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionVideo {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub added_at: Option<String>,
    #[serde(default)]
    pub is_current: bool,
}

/// Response of `GET chat/session-videos/`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionVideos {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_title: Option<String>,
    #[serde(default)]
    pub videos: Vec<SessionVideo>,
}

/// History entry as the completion endpoint expects it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Body of a chat completion request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
    pub subtitles: Vec<CaptionSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
}

/// Remote chat-session lifecycle
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn session_status(&self) -> Result<SessionStatus>;

    /// End the active session; the backend summarises it
    async fn end_session(&self) -> Result<EndedSession>;

    /// Fetch the notes of an ended session
    async fn export_notes(&self, session_id: &str) -> Result<serde_json::Value>;

    /// Drop the active session without keeping it
    async fn clear_session(&self) -> Result<()>;

    async fn session_videos(&self, current_video_id: Option<&str>) -> Result<SessionVideos>;
}

/// Streaming chat completion
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream a completion, calling `on_chunk` for every text chunk.
    ///
    /// Returns the concatenated reply.
    async fn chat_completion(
        &self,
        mode: ChatMode,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String>;
}

/// Session ids arrive as numbers or strings depending on the endpoint
fn de_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ended_session_accepts_numeric_id() {
        let ended: EndedSession = serde_json::from_value(json!({
            "status": "success",
            "summary": "notes",
            "session_id": 42,
            "duration": 3,
        }))
        .unwrap();
        assert_eq!(ended.session_id.as_deref(), Some("42"));
        assert_eq!(ended.summary.as_deref(), Some("notes"));
    }

    #[test]
    fn test_session_status_defaults() {
        let status: SessionStatus = serde_json::from_value(json!({})).unwrap();
        assert!(!status.has_active_session);
    }

    #[test]
    fn test_chat_request_wire_shape() {
        let request = ChatRequest {
            message: "hi".to_string(),
            history: vec![HistoryEntry::from(&Message::user("earlier"))],
            subtitles: vec![],
            video_id: Some("abc".to_string()),
            video_title: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["videoId"], "abc");
        assert_eq!(value["history"][0]["role"], "user");
        assert!(value.get("videoTitle").is_none());
    }
}
