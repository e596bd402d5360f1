use serde::{ Serialize, Deserialize };
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::relay::error::RelayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        write!(f, "{}", tag)
    }
}

/// One role-tagged message of the conversation, forwarded upstream as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Ordered conversation history sent by the client on `/chat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub turns: Vec<ChatTurn>,
    pub user_id: Option<String>,
}

impl ChatRequest {
    /// Parses and validates a raw `/chat` body. Every failure is a
    /// `RelayError::Validation`.
    pub fn from_body(body: &[u8]) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_slice(body).map_err(|e|
            RelayError::Validation(format!("request body is not valid JSON ({})", e))
        )?;

        let messages = match value.get("messages") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(RelayError::Validation("`messages` must be an array".into()));
            }
            None => {
                return Err(RelayError::Validation("`messages` is missing".into()));
            }
        };
        if messages.is_empty() {
            return Err(RelayError::Validation("`messages` must not be empty".into()));
        }

        let mut turns = Vec::with_capacity(messages.len());
        for (idx, item) in messages.iter().enumerate() {
            turns.push(parse_turn(idx, item)?);
        }

        let user_id = value
            .get("userID")
            .or_else(|| value.get("userId"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Ok(Self { turns, user_id })
    }
}

fn parse_turn(idx: usize, item: &Value) -> Result<ChatTurn, RelayError> {
    let role = item
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::Validation(format!("message {} has no role", idx)))?
        .parse::<Role>()
        .map_err(|e| RelayError::Validation(format!("message {}: {}", idx, e)))?;

    let content = match item.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => {
            return Err(RelayError::Validation(format!("message {} has no content", idx)));
        }
        Some(_) => {
            return Err(
                RelayError::Validation(format!("message {} content must be a string", idx))
            );
        }
    };

    Ok(ChatTurn { role, content })
}
