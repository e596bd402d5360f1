use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Every way a relay can fail. Each variant ends the stream with one
/// `RelayEvent::Error` built from `user_message`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("invalid chat request: {0}")]
    Validation(String),

    #[error("upstream unreachable at {url}: {detail}")]
    UpstreamUnavailable {
        url: String,
        detail: String,
    },

    #[error("upstream protocol error (status {status:?}): {message}")]
    UpstreamProtocol {
        status: Option<u16>,
        message: String,
    },

    #[error("model '{model}' not found upstream")]
    ModelNotFound {
        model: String,
    },

    #[error("conversation exceeds the model context: {0}")]
    ContextTooLong(String),

    #[error("upstream stream interrupted: {0}")]
    UpstreamInterrupted(String),
}

impl RelayError {
    /// Text shown to the end user in the terminal SSE event.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Validation(detail) =>
                format!("Invalid messages array provided: {}.", detail),
            RelayError::UpstreamUnavailable { url, .. } =>
                format!(
                    "Could not connect to the language model server at {}. Please ensure it is running and reachable.",
                    url
                ),
            RelayError::UpstreamProtocol { status: Some(status), message } =>
                format!("The language model server returned an error ({}): {}", status, message),
            RelayError::UpstreamProtocol { status: None, message } =>
                format!("The language model server returned an error: {}", message),
            RelayError::ModelNotFound { model } =>
                format!(
                    "The model '{}' was not found on the language model server. Pull it first (e.g. 'ollama pull {}').",
                    model,
                    model
                ),
            RelayError::ContextTooLong(_) =>
                "The conversation is too long for the model. Try starting a new topic.".to_string(),
            RelayError::UpstreamInterrupted(detail) =>
                format!("The response stream was interrupted: {}. Please try again.", detail),
        }
    }
}

/// Maps a failed upstream reply (status + body) onto the taxonomy.
pub fn classify_status(status: StatusCode, body: &str, model: &str) -> RelayError {
    let message = error_text(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            trimmed.chars().take(300).collect()
        }
    });

    if status == StatusCode::NOT_FOUND {
        return RelayError::ModelNotFound { model: model.to_string() };
    }
    classify_message(Some(status.as_u16()), &message, model)
}

/// Classifies an error string reported by upstream, either in a failed reply
/// or in an `error` unit inside an open stream.
pub fn classify_message(status: Option<u16>, message: &str, model: &str) -> RelayError {
    let lower = message.to_lowercase();
    if is_model_missing(&lower) {
        return RelayError::ModelNotFound { model: model.to_string() };
    }
    if
        lower.contains("context_length_exceeded") ||
        lower.contains("context length") ||
        lower.contains("context window")
    {
        return RelayError::ContextTooLong(message.to_string());
    }
    RelayError::UpstreamProtocol { status, message: message.to_string() }
}

fn is_model_missing(lower: &str) -> bool {
    lower.contains("model_not_found") ||
        (lower.contains("model") && (lower.contains("not found") || lower.contains("does not exist")))
}

/// Pulls the error text out of either known error body shape:
/// `{"error": "..."}` or `{"error": {"message": "...", "code": "..."}}`.
pub fn error_text(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    error_field(&value)
}

pub fn error_field(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            let message = obj.get("message").and_then(Value::as_str).unwrap_or_default();
            match obj.get("code").and_then(Value::as_str) {
                Some(code) if !message.contains(code) => Some(format!("{} ({})", message, code)),
                _ => Some(message.to_string()),
            }
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_status_names_the_model() {
        let err = classify_status(
            StatusCode::NOT_FOUND,
            r#"{"error":"model \"llama3\" not found, try pulling it first"}"#,
            "llama3"
        );
        assert_eq!(err, RelayError::ModelNotFound { model: "llama3".into() });
        assert!(err.user_message().contains("llama3"));
    }

    #[test]
    fn openai_style_error_codes_are_recognized() {
        let body =
            r#"{"error":{"message":"This model's maximum context length is 8192 tokens","code":"context_length_exceeded"}}"#;
        let err = classify_status(StatusCode::BAD_REQUEST, body, "m");
        assert!(matches!(err, RelayError::ContextTooLong(_)));

        let body = r#"{"error":{"message":"The model `gpt-x` does not exist","code":"model_not_found"}}"#;
        let err = classify_status(StatusCode::BAD_REQUEST, body, "gpt-x");
        assert_eq!(err, RelayError::ModelNotFound { model: "gpt-x".into() });
    }

    #[test]
    fn other_failures_keep_status_and_text() {
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "kaboom", "m");
        assert_eq!(err, RelayError::UpstreamProtocol {
            status: Some(500),
            message: "kaboom".into(),
        });

        let err = classify_status(StatusCode::BAD_GATEWAY, "", "m");
        assert!(err.user_message().contains("502"));
        assert!(err.user_message().contains("Bad Gateway"));
    }

    #[test]
    fn user_messages_are_distinct() {
        let unavailable = RelayError::UpstreamUnavailable {
            url: "http://localhost:11434".into(),
            detail: "connection refused".into(),
        };
        let missing = RelayError::ModelNotFound { model: "llama3".into() };
        assert_ne!(unavailable.user_message(), missing.user_message());
        assert!(unavailable.user_message().contains("Could not connect"));
        assert!(!missing.user_message().contains("Could not connect"));
    }
}
