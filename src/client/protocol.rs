//! Chat-completion wire format and two-stage response decoding
//!
//! Stage one unwraps the provider envelope and takes the first choice's
//! message content. Stage two strips markdown fences from that content and
//! strict-parses the business JSON inside it.

use super::error::ClientError;
use crate::config::ClientConfig;
use crate::prompt::Prompt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

/// Request body sent to the endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    /// System message first, then the player's text unchanged
    pub fn new(prompt: &Prompt, config: &ClientConfig) -> Self {
        Self {
            model: config.model().to_string(),
            messages: vec![
                ChatMessage::system(prompt.system_message()),
                ChatMessage::user(prompt.user_input.clone()),
            ],
            temperature: config.temperature(),
            response_format: config.json_mode().then(ResponseFormat::json_object),
        }
    }
}

/// Provider envelope around the model output
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total_tokens: u64,
}

/// Decode the envelope of a 2xx body and return the first choice's content.
/// Missing content reads as empty text.
pub fn decode_envelope(raw_body: &str) -> Result<String, ClientError> {
    let envelope: Envelope =
        serde_json::from_str(raw_body).map_err(|source| ClientError::MalformedEnvelope {
            raw_body: raw_body.to_string(),
            source,
        })?;

    let first = envelope
        .choices
        .and_then(|choices| choices.into_iter().next())
        .ok_or(ClientError::EmptyResponse)?;

    tracing::debug!(
        id = envelope.id.as_deref().unwrap_or("-"),
        finish_reason = first.finish_reason.as_deref().unwrap_or("-"),
        total_tokens = envelope.usage.map(|u| u.total_tokens).unwrap_or(0),
        "Decoded envelope"
    );

    Ok(first.message.content.unwrap_or_default())
}

/// Strip surrounding whitespace and one layer of markdown code fence.
///
/// A leading ```` ```json ```` or ```` ``` ```` and a trailing ```` ``` ```` are
/// removed; everything between is kept as is.
pub fn sanitize_content(content: &str) -> &str {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    text = text.trim();
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Sanitize then strict-parse model content
pub fn decode_content<T: DeserializeOwned>(content: &str) -> Result<T, ClientError> {
    let cleaned = sanitize_content(content);
    serde_json::from_str(cleaned).map_err(|source| ClientError::InnerDecode {
        content: cleaned.to_string(),
        source,
    })
}

/// Both stages in one call
pub fn decode_response<T: DeserializeOwned>(raw_body: &str) -> Result<T, ClientError> {
    let content = decode_envelope(raw_body)?;
    decode_content(&content)
}
