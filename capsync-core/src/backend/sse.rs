//! Chat completion stream parsing
//!
//! The backend streams `data: {json}` lines. Each payload is one of:
//!
//! ```text
//!   {"content": "...", "done": false}          text chunk
//!   {"content": "",    "done": true}           end of stream
//!   {"done": true, "error": true}              stream failed (content already sent)
//!   {"error": "message"}                       stream failed
//! ```

use serde::Deserialize;

/// One decoded stream event
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    Content(String),
    Done,
    Error(String),
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Decode one line of the stream.
///
/// Returns `None` for blank lines, comments, non-`data` fields and empty
/// keep-alive chunks.
pub fn parse_line(line: &[u8]) -> Option<ChatChunk> {
    let line = std::str::from_utf8(line).ok()?.trim();
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return Some(ChatChunk::Done);
    }
    if payload.is_empty() {
        return None;
    }

    let raw: RawChunk = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable stream line");
            return None;
        }
    };

    match raw.error {
        Some(serde_json::Value::String(message)) => return Some(ChatChunk::Error(message)),
        Some(serde_json::Value::Bool(true)) => {
            return Some(ChatChunk::Error("chat stream reported an error".to_string()))
        }
        _ => {}
    }

    if raw.done {
        return Some(ChatChunk::Done);
    }

    raw.content
        .filter(|c| !c.is_empty())
        .map(ChatChunk::Content)
}

/// Splits a byte stream into lines across chunk boundaries
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every complete line, without terminators
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline_index) = self.buf.iter().position(|byte| *byte == b'\n') {
            let mut line = self.buf.drain(..=newline_index).collect::<Vec<_>>();
            if matches!(line.last(), Some(b'\n')) {
                line.pop();
            }
            if matches!(line.last(), Some(b'\r')) {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever is left after the stream ends
    pub fn finish(self) -> Option<Vec<u8>> {
        (!self.buf.is_empty()).then_some(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_and_done() {
        assert_eq!(
            parse_line(br#"data: {"content": "Hel", "done": false}"#),
            Some(ChatChunk::Content("Hel".to_string()))
        );
        assert_eq!(
            parse_line(br#"data: {"content": "", "done": true, "model": "x"}"#),
            Some(ChatChunk::Done)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_line(br#"data: {"error": "quota exceeded"}"#),
            Some(ChatChunk::Error("quota exceeded".to_string()))
        );
        assert!(matches!(
            parse_line(br#"data: {"content": "", "done": true, "error": true}"#),
            Some(ChatChunk::Error(_))
        ));
    }

    #[test]
    fn test_ignores_noise() {
        assert_eq!(parse_line(b""), None);
        assert_eq!(parse_line(b": keep-alive"), None);
        assert_eq!(parse_line(b"event: message"), None);
        assert_eq!(
            parse_line(br#"data: {"content": "", "done": false, "connected": true}"#),
            None
        );
        assert_eq!(parse_line(b"data: not json"), None);
    }

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"content\"").is_empty());
        let lines = buffer.push(b": \"a\"}\r\n\r\ndata: tail");
        assert_eq!(lines.len(), 2);
        assert_eq!(
            parse_line(&lines[0]),
            Some(ChatChunk::Content("a".to_string()))
        );
        assert!(lines[1].is_empty());
        assert_eq!(buffer.finish(), Some(b"data: tail".to_vec()));
    }
}
