use serde::Serialize;

use crate::llm::GenerationOptions;
use crate::models::chat::ChatTurn;

pub const CHAT_ROUTE: &str = "/api/chat";

#[derive(Serialize)]
pub struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl<'a> OllamaChatRequest<'a> {
    pub fn new(model: &'a str, messages: &'a [ChatTurn], options: &GenerationOptions) -> Self {
        let options = (!options.is_empty()).then(|| OllamaOptions {
            temperature: options.temperature,
            top_p: options.top_p,
            num_predict: options.max_tokens,
        });
        Self { model, messages, stream: true, options }
    }
}
