//! Exchange tracing
//!
//! Writes one JSON line per request/response exchange. Credentials never
//! reach the file or the log in clear text; see [`redact_credential`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

const VISIBLE_PREFIX: usize = 5;

/// Show the first five characters of a credential followed by `***`.
/// Credentials that short are hidden entirely.
pub fn redact_credential(credential: &str) -> String {
    let credential = credential.trim();
    if credential.chars().count() <= VISIBLE_PREFIX {
        return "***".to_string();
    }
    let prefix: String = credential.chars().take(VISIBLE_PREFIX).collect();
    format!("{}***", prefix)
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to open trace file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write trace record: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to encode trace record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("trace file lock poisoned")]
    Poisoned,
}

/// One request/response exchange
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    /// Redacted authorization header value
    pub authorization: String,
    pub request: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExchangeRecord {
    pub fn new(endpoint: &str, credential: &str, request: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            endpoint: endpoint.to_string(),
            authorization: format!("Bearer {}", redact_credential(credential)),
            request,
            status: None,
            response: None,
            error: None,
        }
    }
}

/// Appends exchange records to `<dir>/<timestamp>.jsonl`
#[derive(Debug)]
pub struct TraceSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl TraceSink {
    /// Create the directory if needed and open a fresh trace file in it
    pub fn create(dir: &Path) -> Result<Self, TraceError> {
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{}.jsonl", timestamp));
        fs::create_dir_all(dir).map_err(|source| TraceError::Open {
            path: dir.to_path_buf(),
            source,
        })?;
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TraceError::Open {
                path: path.clone(),
                source,
            })?;
        tracing::info!("Tracing exchanges to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, record: &ExchangeRecord) -> Result<(), TraceError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().map_err(|_| TraceError::Poisoned)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
