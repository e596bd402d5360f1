use serde::{ Serialize, Deserialize };

/// One downstream SSE payload.
///
/// Serialized untagged so the wire shape is `{"content": ...}` for a delta and
/// `{"error": ...}` for the terminal failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayEvent {
    Delta {
        content: String,
    },
    Error {
        error: String,
    },
}

impl RelayEvent {
    pub fn delta(content: impl Into<String>) -> Self {
        RelayEvent::Delta { content: content.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RelayEvent::Error { error: message.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RelayEvent::Error { .. })
    }

    pub fn to_json(&self) -> String {
        // Two string fields, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes() {
        assert_eq!(RelayEvent::delta("Hel").to_json(), r#"{"content":"Hel"}"#);
        assert_eq!(RelayEvent::error("boom").to_json(), r#"{"error":"boom"}"#);
    }

    #[test]
    fn deserializes_back_into_the_right_variant() {
        let delta: RelayEvent = serde_json::from_str(r#"{"content":"x"}"#).unwrap();
        assert!(!delta.is_error());
        let error: RelayEvent = serde_json::from_str(r#"{"error":"x"}"#).unwrap();
        assert!(error.is_error());
    }
}
