//! Error types for the fetch, decode and probe stages

use std::fmt;
use thiserror::Error;

/// Step of link decoding that rejected the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Link does not start with a supported scheme
    Scheme,
    Base64,
    Json,
    Uri,
    MissingCredential,
    BadHost,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Scheme => write!(f, "scheme"),
            DecodeStage::Base64 => write!(f, "base64"),
            DecodeStage::Json => write!(f, "json"),
            DecodeStage::Uri => write!(f, "uri"),
            DecodeStage::MissingCredential => write!(f, "missing-credential"),
            DecodeStage::BadHost => write!(f, "bad-host"),
        }
    }
}

/// A candidate link that could not be turned into a config
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} error: {message}")]
pub struct DecodeError {
    pub stage: DecodeStage,
    pub message: String,
}

impl DecodeError {
    pub fn new(stage: DecodeStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Failure to retrieve or read a source
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("error unmarshaling JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// Short name of the failing step, for log fields
    pub fn stage(&self) -> &'static str {
        match self {
            FetchError::Transport { .. } => "transport",
            FetchError::Json { .. } => "json",
        }
    }
}

/// Why a liveness probe did not pass.
///
/// Callers only ever see pass/fail; this is kept for logging.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("cannot build dialer: {0}")]
    Dialer(#[source] reqwest::Error),
    #[error("cannot start socks relay: {0}")]
    Relay(#[source] std::io::Error),
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
    #[error("timed out")]
    Timeout,
}
