#![allow(dead_code)]

use axum::body::{ to_bytes, Body };
use axum::http::{ Request, Response };
use axum::Router;
use chat_relay::auth::{ AccessGate, PasswordHasher };
use chat_relay::history::Stores;
use chat_relay::llm::chat::ChatUpstream;
use chat_relay::llm::{ LlmConfig, UpstreamApi };
use chat_relay::relay::StreamRelay;
use chat_relay::server::{ build_router, AppState };
use serde_json::Value;
use std::time::Duration;

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    pub upstream_url: String,
    pub api: UpstreamApi,
    pub timeout: Option<Duration>,
    pub secret: Option<&'static str>,
    pub stores: Stores,
}

impl TestApp {
    pub fn new(upstream_url: &str) -> Self {
        Self {
            upstream_url: upstream_url.to_string(),
            api: UpstreamApi::Ollama,
            timeout: None,
            secret: None,
            stores: Stores::in_memory(),
        }
    }

    pub fn router(&self) -> Router {
        let upstream = ChatUpstream::from_config(
            &(LlmConfig {
                api: self.api,
                base_url: self.upstream_url.clone(),
                ..Default::default()
            })
        ).unwrap();
        let state = AppState::new(
            StreamRelay::new(upstream, self.timeout),
            self.stores.clone(),
            PasswordHasher::new(10),
            AccessGate::new(self.secret)
        );
        build_router(state)
    }
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_text(resp: Response<Body>) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response<Body>) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

/// Splits an SSE body into the JSON payloads of its `data:` events.
pub fn sse_payloads(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter(|event| !event.trim().is_empty())
        .map(|event| {
            let data = event.strip_prefix("data: ").unwrap();
            serde_json::from_str(data).unwrap()
        })
        .collect()
}
