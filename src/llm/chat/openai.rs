use serde::Serialize;

use crate::llm::GenerationOptions;
use crate::models::chat::ChatTurn;

pub const CHAT_ROUTE: &str = "/v1/chat/completions";

#[derive(Serialize)]
pub struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> OpenAIChatRequest<'a> {
    pub fn new(model: &'a str, messages: &'a [ChatTurn], options: &GenerationOptions) -> Self {
        Self {
            model,
            messages,
            stream: true,
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
        }
    }
}
