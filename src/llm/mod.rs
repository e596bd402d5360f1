pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

/// Wire flavour spoken by the upstream model server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamApi {
    /// Native `/api/chat` endpoint, newline-delimited JSON replies.
    Ollama,
    /// OpenAI-compatible `/v1/chat/completions`, `data:` framed chunks.
    OpenAI,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseUpstreamApiError {
    message: String,
}

impl fmt::Display for ParseUpstreamApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseUpstreamApiError {}
impl FromStr for UpstreamApi {
    type Err = ParseUpstreamApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(UpstreamApi::Ollama),
            "openai" => Ok(UpstreamApi::OpenAI),
            _ =>
                Err(ParseUpstreamApiError {
                    message: format!("Invalid upstream API: '{}' (expected ollama or openai)", s),
                }),
        }
    }
}

impl fmt::Display for UpstreamApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamApi::Ollama => write!(f, "ollama"),
            UpstreamApi::OpenAI => write!(f, "openai"),
        }
    }
}

/// Sampling knobs forwarded upstream when set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.max_tokens.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api: UpstreamApi,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub options: GenerationOptions,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api: UpstreamApi::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: "llama3".to_string(),
            options: GenerationOptions::default(),
        }
    }
}
