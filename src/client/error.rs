//! Client error taxonomy

use thiserror::Error;

/// Shown to players in place of any client failure.
pub const USER_FACING_MESSAGE: &str = "judgment unavailable, try again";

/// Everything that can go wrong between composing a prompt and holding a
/// decoded result. Exactly one of these or a result comes back from a send.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Endpoint or credential missing; nothing was sent.
    #[error("client is not configured: {0}")]
    LocalConfig(String),

    /// The request never completed: connect, send or body read failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {status}")]
    Protocol { status: u16, raw_body: String },

    /// A 2xx body that is not a chat-completion envelope
    #[error("response is not a chat-completion envelope: {source}")]
    MalformedEnvelope {
        raw_body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("response contained no choices")]
    EmptyResponse,

    /// The model's content did not match the expected JSON schema
    #[error("model content is not the expected JSON: {source}")]
    InnerDecode {
        /// Content after fence stripping
        content: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// HTTP status, for `Protocol` errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The raw payload that failed to decode, if any
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            ClientError::Protocol { raw_body, .. }
            | ClientError::MalformedEnvelope { raw_body, .. } => Some(raw_body),
            ClientError::InnerDecode { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        USER_FACING_MESSAGE
    }
}
