//! Error types for dexcache
//!
//! Structured errors for everything outside the cache fast path:
//! configuration, the upstream HTTP client, the API server and IO.
//! Cache tiers never surface these to callers; they normalize their own
//! failures into [`TierFault`](crate::cache::storage::TierFault).

use crate::cache::backend::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Upstream / HTTP Errors
    // =========================================================================
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("Request timeout after {timeout:?}: {url}")]
    Timeout { url: String, timeout: Duration },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            Error::Timeout { .. } => true,
            Error::Store(StoreError::Unavailable(_)) | Error::Store(StoreError::Http(_)) => true,
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
