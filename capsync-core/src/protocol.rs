//! Cross-context message protocol
//!
//! Messages arrive from other contexts as loose JSON. They are validated into
//! the closed [`Request`] union at the boundary; anything that does not parse
//! is rejected with [`Error::Protocol`] and answered with a failed
//! [`Response`], never propagated as an error across contexts.
//!
//! ```text
//!   {"action": "collectSubtitles", "videoId": "…"}  →  {"success": true, "result": {…}}
//!   {"action": "checkIfYouTube"}                    →  {"success": true, "isYouTube": …}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request routed between contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// Ask a page agent to extract and publish captions for a video
    CollectSubtitles {
        #[serde(rename = "videoId")]
        video_id: String,
    },
    /// Ask the coordinator whether the active tab is on a supported site
    CheckIfYouTube,
    /// Queue quoted caption text for the panel's input box
    SendSubtitleToSidePanel {
        #[serde(rename = "subtitleText", default)]
        subtitle_text: String,
    },
    /// Recognised but not served by this layer
    ExtractWebpageContent {
        #[serde(rename = "tabId", default)]
        tab_id: Option<u64>,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::CollectSubtitles { .. } => "collectSubtitles",
            Request::CheckIfYouTube => "checkIfYouTube",
            Request::SendSubtitleToSidePanel { .. } => "sendSubtitleToSidePanel",
            Request::ExtractWebpageContent { .. } => "extractWebpageContent",
        }
    }

    pub fn collect(video_id: impl Into<String>) -> Self {
        Request::CollectSubtitles {
            video_id: video_id.into(),
        }
    }
}

/// Validate a raw message into a [`Request`]
pub fn parse_request(raw: Value) -> Result<Request> {
    let action = raw
        .get("action")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol("message has no action".to_string()))?;

    serde_json::from_value(raw)
        .map_err(|e| Error::Protocol(format!("invalid {:?} message: {}", action, e)))
}

/// Reply to a [`Request`]. Every reply carries a success flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        default,
        rename = "isYouTube",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_you_tube: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok(result: Option<Value>) -> Self {
        Self {
            success: true,
            result,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn site_check(is_you_tube: bool, message: impl Into<String>) -> Self {
        Self {
            success: true,
            is_you_tube: Some(is_you_tube),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<&Error> for Response {
    fn from(err: &Error) -> Self {
        Response::failure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_collect_subtitles() {
        let req = parse_request(json!({"action": "collectSubtitles", "videoId": "abc"})).unwrap();
        assert_eq!(req, Request::collect("abc"));
        assert_eq!(req.action(), "collectSubtitles");
    }

    #[test]
    fn test_parse_check_if_youtube() {
        let req = parse_request(json!({"action": "checkIfYouTube"})).unwrap();
        assert_eq!(req, Request::CheckIfYouTube);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = parse_request(json!({"action": "translateEverything"})).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = parse_request(json!({"videoId": "abc"})).unwrap_err();
        assert!(err.to_string().contains("no action"));
    }

    #[test]
    fn test_collect_without_video_id_is_rejected() {
        assert!(parse_request(json!({"action": "collectSubtitles"})).is_err());
    }

    #[test]
    fn test_response_wire_shape() {
        let site = serde_json::to_value(Response::site_check(true, "ok")).unwrap();
        assert_eq!(site, json!({"success": true, "isYouTube": true, "message": "ok"}));

        let failed = serde_json::to_value(Response::failure("closed")).unwrap();
        assert_eq!(failed, json!({"success": false, "error": "closed"}));
    }
}
