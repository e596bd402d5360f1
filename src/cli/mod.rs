use clap::Parser;
use std::time::Duration;

use crate::llm::{ GenerationOptions, LlmConfig, UpstreamApi };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Upstream Model Server Args ---
    /// Wire flavour of the upstream model server (ollama, openai)
    #[arg(long, env = "UPSTREAM_API", default_value = "ollama")]
    pub upstream_api: UpstreamApi,

    /// Base URL of the upstream model server (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "UPSTREAM_BASE_URL", default_value = "http://localhost:11434")]
    pub upstream_base_url: String,

    /// Bearer key sent upstream. Leave empty for local servers.
    #[arg(long, env = "UPSTREAM_API_KEY", default_value = "")]
    pub upstream_api_key: String,

    /// Model name for chat completion (e.g., llama3, mistral)
    #[arg(long, env = "CHAT_MODEL", default_value = "llama3")]
    pub chat_model: String,

    #[arg(long, env = "CHAT_TEMPERATURE")]
    pub temperature: Option<f32>,

    #[arg(long, env = "CHAT_TOP_P")]
    pub top_p: Option<f32>,

    /// Upper bound on generated tokens (num_predict for Ollama).
    #[arg(long, env = "CHAT_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    /// Total time allowed for one relay, connection included. 0 means no limit.
    #[arg(long, env = "RELAY_TIMEOUT_SECS", default_value = "0")]
    pub relay_timeout_secs: u64,

    /// Global /chat requests per second. 0 disables rate limiting.
    #[arg(long, env = "CHAT_RATE_LIMIT", default_value = "0")]
    pub chat_rate_limit: u32,

    // --- Store Args ---
    /// User and conversation store type (redis, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "memory")]
    pub store_type: String,

    /// Store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub store_host: String,

    /// Prefix for Redis keys.
    #[arg(long, env = "STORE_PREFIX", default_value = "chatrelay:")]
    pub store_prefix: String,

    // --- Security Args ---
    /// Shared secret guarding the transcript endpoints. When unset the endpoints are open.
    #[arg(long, env = "ACCESS_SECRET")]
    pub access_secret: Option<String>,

    /// PBKDF2 iterations used when hashing new passwords.
    #[arg(long, env = "PASSWORD_HASH_ROUNDS", default_value = "100000")]
    pub password_hash_rounds: u32,

    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3001")]
    pub server_addr: String,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api: self.upstream_api,
            base_url: self.upstream_base_url.clone(),
            api_key: Some(self.upstream_api_key.clone()).filter(|k| !k.trim().is_empty()),
            model: self.chat_model.clone(),
            options: GenerationOptions {
                temperature: self.temperature,
                top_p: self.top_p,
                max_tokens: self.max_tokens,
            },
        }
    }

    pub fn relay_timeout(&self) -> Option<Duration> {
        (self.relay_timeout_secs > 0).then(|| Duration::from_secs(self.relay_timeout_secs))
    }

    pub fn access_secret(&self) -> Option<&str> {
        self.access_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
