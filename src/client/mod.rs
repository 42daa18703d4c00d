//! Chat-completion client
//!
//! One POST per judgment. No retries and no internal timeout; callers that
//! need to give up early use [`ProtocolClient::send_until_cancelled`].

mod error;
pub mod protocol;

pub use error::{ClientError, USER_FACING_MESSAGE};

use crate::config::ClientConfig;
use crate::model::{DiscoveryResult, RefereeResult};
use crate::prompt::Prompt;
use crate::trace::{redact_credential, ExchangeRecord, TraceSink};
use protocol::ChatRequest;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sends prompts to the configured endpoint and decodes the replies.
///
/// Cloning is cheap; clones share the connection pool and trace file.
#[derive(Debug, Clone, Default)]
pub struct ProtocolClient {
    http: reqwest::Client,
    trace: Option<Arc<TraceSink>>,
}

impl ProtocolClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured `reqwest::Client`
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http, trace: None }
    }

    /// Record every exchange to `sink`
    pub fn with_trace(mut self, sink: Arc<TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Ask the model to judge the player's statement
    pub async fn send(
        &self,
        prompt: &Prompt,
        config: &ClientConfig,
    ) -> Result<RefereeResult, ClientError> {
        self.exchange(prompt, config).await
    }

    /// Ask the model which topics the player's statement touched
    pub async fn discover(
        &self,
        prompt: &Prompt,
        config: &ClientConfig,
    ) -> Result<DiscoveryResult, ClientError> {
        self.exchange(prompt, config).await
    }

    /// [`send`](Self::send), abandoned when `cancel` fires first. Returns
    /// `None` on cancellation; the in-flight request is dropped.
    pub async fn send_until_cancelled(
        &self,
        prompt: &Prompt,
        config: &ClientConfig,
        cancel: &CancellationToken,
    ) -> Option<Result<RefereeResult, ClientError>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Request cancelled");
                None
            }
            result = self.send(prompt, config) => Some(result),
        }
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        prompt: &Prompt,
        config: &ClientConfig,
    ) -> Result<T, ClientError> {
        let endpoint = config
            .endpoint()
            .ok_or_else(|| ClientError::LocalConfig("endpoint is not set".to_string()))?;
        let api_key = config
            .api_key()
            .ok_or_else(|| ClientError::LocalConfig("api key is not set".to_string()))?;
        reqwest::Url::parse(endpoint).map_err(|e| {
            ClientError::LocalConfig(format!("endpoint '{}' is not a valid URL: {}", endpoint, e))
        })?;

        let body = ChatRequest::new(prompt, config);
        let raw = self.post(endpoint, api_key, &body, config.verbose()).await?;
        protocol::decode_response(&raw)
    }

    /// POST `body` and return the raw text of a 2xx response
    async fn post(
        &self,
        endpoint: &str,
        api_key: &str,
        body: &ChatRequest,
        verbose: bool,
    ) -> Result<String, ClientError> {
        let mut record = self.trace.as_ref().map(|_| {
            ExchangeRecord::new(
                endpoint,
                api_key,
                serde_json::to_value(body).unwrap_or_default(),
            )
        });

        if verbose {
            info!(
                endpoint,
                authorization = %format!("Bearer {}", redact_credential(api_key)),
                body = %serde_json::to_string(body).unwrap_or_default(),
                "Sending request"
            );
        } else {
            debug!(endpoint, model = %body.model, "Sending request");
        }

        let outcome = self.round_trip(endpoint, api_key, body).await;

        if let Some(record) = record.as_mut() {
            match &outcome {
                Ok((status, text)) => {
                    record.status = Some(*status);
                    record.response = Some(text.clone());
                }
                Err(e) => record.error = Some(e.to_string()),
            }
        }
        if let (Some(sink), Some(record)) = (self.trace.as_ref(), record.as_ref()) {
            if let Err(e) = sink.record(record) {
                warn!("Failed to write trace record: {}", e);
            }
        }

        let (status, text) = outcome?;
        if verbose {
            info!(status, body = %text, "Received response");
        } else {
            debug!(status, bytes = text.len(), "Received response");
        }

        if !(200..300).contains(&status) {
            return Err(ClientError::Protocol {
                status,
                raw_body: text,
            });
        }
        Ok(text)
    }

    async fn round_trip(
        &self,
        endpoint: &str,
        api_key: &str,
        body: &ChatRequest,
    ) -> Result<(u16, String), ClientError> {
        let response = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}
