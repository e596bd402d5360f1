pub mod ollama;
pub mod openai;

use log::{ debug, error };
use reqwest::{ Client as HttpClient, Response };
use std::error::Error as StdError;
use url::Url;

use self::ollama::OllamaChatRequest;
use self::openai::OpenAIChatRequest;
use super::{ GenerationOptions, LlmConfig, UpstreamApi };
use crate::models::chat::ChatTurn;
use crate::relay::error::{ classify_status, RelayError };

/// Largest error body read from a failed upstream reply.
const MAX_ERROR_BODY: usize = 16 * 1024;

/// Opens streaming chat calls against the configured model server.
#[derive(Debug, Clone)]
pub struct ChatUpstream {
    http: HttpClient,
    api: UpstreamApi,
    base_url: String,
    api_key: Option<String>,
    model: String,
    options: GenerationOptions,
}

impl ChatUpstream {
    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let parsed = Url::parse(&config.base_url).map_err(|e|
            format!("Invalid upstream base URL '{}': {}", config.base_url, e)
        )?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("Upstream base URL must be http(s): '{}'", config.base_url).into());
        }
        if config.model.trim().is_empty() {
            return Err("Upstream model name must not be empty".into());
        }

        Ok(Self {
            http: HttpClient::new(),
            api: config.api,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            options: config.options.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self) -> String {
        let route = match self.api {
            UpstreamApi::Ollama => ollama::CHAT_ROUTE,
            UpstreamApi::OpenAI => openai::CHAT_ROUTE,
        };
        format!("{}{}", self.base_url, route)
    }

    /// Sends the turns upstream and returns the response once a success
    /// status is in. The body has not been read yet.
    pub async fn open_stream(&self, turns: &[ChatTurn]) -> Result<Response, RelayError> {
        let url = self.endpoint();
        let mut req = self.http.post(&url);
        req = match self.api {
            UpstreamApi::Ollama => req.json(&OllamaChatRequest::new(&self.model, turns, &self.options)),
            UpstreamApi::OpenAI => req.json(&OpenAIChatRequest::new(&self.model, turns, &self.options)),
        };
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        debug!("Opening upstream stream: POST {} ({} turns)", url, turns.len());
        let response = req.send().await.map_err(|e| {
            error!("Upstream request to {} failed: {}", url, e);
            RelayError::UpstreamUnavailable {
                url: self.base_url.clone(),
                detail: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            error!("Upstream replied {} from {}: {}", status, url, body);
            return Err(classify_status(status, &body, &self.model));
        }
        Ok(response)
    }
}

async fn read_error_body(mut response: Response) -> String {
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        body.extend_from_slice(&chunk);
        if body.len() >= MAX_ERROR_BODY {
            body.truncate(MAX_ERROR_BODY);
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
