use log::{ debug, warn };
use serde_json::Value;

use super::error::error_field;

/// Splits an upstream byte stream into complete lines.
///
/// Bytes after the last newline stay buffered until the next `push` or
/// `finish`, so a line (or a UTF-8 sequence) cut by a read boundary is only
/// handed out once it is whole.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let mut line = std::mem::take(&mut self.pending);
            line.extend_from_slice(&rest[..pos]);
            lines.push(line);
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Returns the unterminated tail once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let tail = std::mem::take(&mut self.pending);
        if tail.iter().all(u8::is_ascii_whitespace) { None } else { Some(tail) }
    }
}

/// The two payload layouts seen from local model servers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkShape {
    /// `{"message": {"content": ...}, "done": bool}`
    Native,
    /// `{"choices": [{"delta": {"content": ...}, "finish_reason": ...}]}`
    OpenAi,
}

impl ChunkShape {
    pub fn probe(value: &Value) -> Option<Self> {
        if value.get("choices").is_some() {
            Some(ChunkShape::OpenAi)
        } else if value.get("message").is_some() || value.get("done").is_some() {
            Some(ChunkShape::Native)
        } else {
            None
        }
    }

    pub fn delta(self, value: &Value) -> Option<&str> {
        let pointer = match self {
            ChunkShape::Native => "/message/content",
            ChunkShape::OpenAi => "/choices/0/delta/content",
        };
        value.pointer(pointer).and_then(Value::as_str)
    }

    pub fn is_done(self, value: &Value) -> bool {
        match self {
            ChunkShape::Native => value.get("done").and_then(Value::as_bool).unwrap_or(false),
            ChunkShape::OpenAi =>
                value
                    .pointer("/choices/0/finish_reason")
                    .map(|reason| !reason.is_null())
                    .unwrap_or(false),
        }
    }
}

/// What one upstream line means to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamUnit {
    Chunk {
        delta: Option<String>,
        done: bool,
    },
    Error(String),
    End,
}

/// Interprets one complete line. `None` means the line carries nothing the
/// relay understands and is dropped.
pub fn parse_line(raw: &[u8]) -> Option<StreamUnit> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text.trim(),
        Err(e) => {
            warn!("Dropping upstream line that is not UTF-8: {}", e);
            return None;
        }
    };
    if text.is_empty() || text.starts_with(':') {
        return None;
    }

    let payload = text.strip_prefix("data:").map(str::trim_start).unwrap_or(text);
    if payload == "[DONE]" {
        return Some(StreamUnit::End);
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping malformed upstream line ({}): {}", e, payload);
            return None;
        }
    };

    if let Some(message) = error_field(&value) {
        return Some(StreamUnit::Error(message));
    }

    match ChunkShape::probe(&value) {
        Some(shape) => {
            let delta = shape
                .delta(&value)
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            Some(StreamUnit::Chunk { delta, done: shape.is_done(&value) })
        }
        None => {
            debug!("Ignoring upstream line of unknown shape: {}", payload);
            None
        }
    }
}
