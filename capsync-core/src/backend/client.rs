//! HTTP client for the remote backend
//!
//! Credentials are read from the shared store (`apiUrl`, `authToken`) on
//! every call, so a login in any context takes effect everywhere without
//! rebuilding the client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::agent::CaptionSource;
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::store::{StateStore, StoreKey};
use crate::types::{CaptionSegment, ChatMode, VideoContext};

use super::sse::{parse_line, ChatChunk, LineBuffer};
use super::{ChatBackend, ChatRequest, EndedSession, SessionBackend, SessionStatus, SessionVideos};

/// Response from GET auto-subtitles/
#[derive(Debug, serde::Deserialize)]
struct SubtitlesResponse {
    #[serde(default)]
    subtitles: Vec<CaptionSegment>,
}

/// HTTP client for the backend REST API
pub struct BackendClient {
    store: StateStore,
    http_client: reqwest::Client,
    auth_scheme: String,
    timeout: Duration,
}

impl BackendClient {
    /// Create a new backend client from configuration
    pub fn new(store: StateStore, config: &BackendConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // No client-wide timeout: it would cut off streamed completions.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            store,
            http_client,
            auth_scheme: config.auth_scheme.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Base URL and token from the store. Missing either is an auth failure.
    fn credentials(&self) -> Result<(String, String)> {
        let base_url = self
            .store
            .get_string(StoreKey::ApiUrl)?
            .ok_or_else(|| Error::Auth("apiUrl is not set".to_string()))?;
        let token = self
            .store
            .get_string(StoreKey::AuthToken)?
            .ok_or_else(|| Error::Auth("authToken is not set".to_string()))?;
        Ok((base_url.trim_end_matches('/').to_string(), token))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let (base_url, token) = self.credentials()?;
        let auth_value = HeaderValue::from_str(&format!("{} {}", self.auth_scheme, token))
            .map_err(|e| Error::Auth(format!("invalid authToken: {}", e)))?;

        Ok(self
            .http_client
            .request(method, format!("{}/{}", base_url, path))
            .header(AUTHORIZATION, auth_value))
    }

    /// Send a bounded request and decode a JSON body
    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Network(format!("failed to parse response: {}", e)))
    }

    /// Fetch captions for a video URL
    pub async fn fetch_auto_subtitles(&self, video_url: &str) -> Result<Vec<CaptionSegment>> {
        let path = format!("auto-subtitles/?url={}", urlencoding::encode(video_url));
        let body: SubtitlesResponse = self.send_json(self.request(Method::GET, &path)?).await?;
        Ok(body.subtitles)
    }
}

/// Map non-success statuses onto the error taxonomy
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    Err(status_error(status, &error_text))
}

fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("backend rejected credentials ({})", status))
        }
        StatusCode::NOT_FOUND => Error::NotFound(format!("backend returned 404: {}", body)),
        _ => Error::Network(format!("API error ({}): {}", status, body)),
    }
}

/// A missing session or export is a backend failure, not missing captions
fn session_error(e: Error) -> Error {
    match e {
        Error::NotFound(message) => Error::Backend(message),
        other => other,
    }
}

/// Some endpoints answer 200 with `{"status": "error", "message": …}`
fn application_error(body: &Value) -> Option<Error> {
    if body.get("status").and_then(Value::as_str) != Some("error") {
        return None;
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string();
    Some(Error::Backend(message))
}

#[async_trait]
impl SessionBackend for BackendClient {
    async fn session_status(&self) -> Result<SessionStatus> {
        self.send_json(self.request(Method::GET, "chat/session-status/")?)
            .await
    }

    async fn end_session(&self) -> Result<EndedSession> {
        let body: Value = self
            .send_json(self.request(Method::POST, "chat/session/end/")?.json(&json!({})))
            .await
            .map_err(session_error)?;
        if let Some(e) = application_error(&body) {
            return Err(e);
        }
        Ok(serde_json::from_value(body)?)
    }

    async fn export_notes(&self, session_id: &str) -> Result<Value> {
        let path = format!("chat/export-notes/{}/", urlencoding::encode(session_id));
        let body: Value = self
            .send_json(self.request(Method::GET, &path)?)
            .await
            .map_err(session_error)?;
        match application_error(&body) {
            Some(e) => Err(e),
            None => Ok(body),
        }
    }

    async fn clear_session(&self) -> Result<()> {
        let body: Value = self
            .send_json(self.request(Method::POST, "chat/session/delete/")?.json(&json!({})))
            .await?;
        match application_error(&body) {
            // Nothing to clear is fine.
            Some(Error::Backend(message)) => {
                tracing::debug!(message = %message, "No remote session to clear");
                Ok(())
            }
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn session_videos(&self, current_video_id: Option<&str>) -> Result<SessionVideos> {
        let path = match current_video_id {
            Some(id) => format!(
                "chat/session-videos/?current_video_id={}",
                urlencoding::encode(id)
            ),
            None => "chat/session-videos/".to_string(),
        };
        self.send_json(self.request(Method::GET, &path)?).await
    }
}

#[async_trait]
impl ChatBackend for BackendClient {
    async fn chat_completion(
        &self,
        mode: ChatMode,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String> {
        let path = match mode {
            ChatMode::Accumulate => "ai/chat-completion/",
            ChatMode::Default => "ai/chat-completion-default/",
        };

        let response = self
            .request(Method::POST, path)?
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;
        let response = check_status(response).await?;

        let mut reply = String::new();
        let mut lines = LineBuffer::new();
        let mut bytes_stream = response.bytes_stream();

        'stream: while let Some(chunk_result) = bytes_stream.next().await {
            let chunk =
                chunk_result.map_err(|e| Error::Network(format!("stream read failed: {}", e)))?;
            for line in lines.push(&chunk) {
                match parse_line(&line) {
                    Some(ChatChunk::Content(text)) => {
                        on_chunk(&text);
                        reply.push_str(&text);
                    }
                    Some(ChatChunk::Done) => break 'stream,
                    Some(ChatChunk::Error(message)) => return Err(Error::Network(message)),
                    None => {}
                }
            }
        }

        if let Some(rest) = lines.finish() {
            match parse_line(&rest) {
                Some(ChatChunk::Content(text)) => {
                    on_chunk(&text);
                    reply.push_str(&text);
                }
                Some(ChatChunk::Error(message)) => return Err(Error::Network(message)),
                _ => {}
            }
        }

        tracing::debug!(mode = %mode, chars = reply.len(), "Chat completion finished");
        Ok(reply)
    }
}

#[async_trait]
impl CaptionSource for BackendClient {
    async fn fetch_captions(&self, video: &VideoContext) -> Result<Vec<CaptionSegment>> {
        self.fetch_auto_subtitles(&video.url).await
    }
}
