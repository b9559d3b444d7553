//! mvreview Error Definitions
//!
//! Defines error types used throughout the project.

use std::path::PathBuf;

use thiserror::Error;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Violation directory unusable: {path}: {reason}")]
    ViolationDirUnusable { path: PathBuf, reason: String },

    // =========================================================================
    // Video Errors
    // =========================================================================
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Video processing failed for {path}: {reason}")]
    VideoProcessing { path: PathBuf, reason: String },

    #[error("Media tool error: {0}")]
    MediaTool(String),

    // =========================================================================
    // External Service Errors
    // =========================================================================
    #[error("{service} rate limited the request")]
    RateLimited {
        service: String,
        retry_after_ms: Option<u64>,
    },

    #[error("{service} request failed{}: {message}", status_suffix(.status))]
    ServiceRequestFailed {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{service} unavailable after {attempts} attempt(s): {message}")]
    ServiceUnavailable {
        service: String,
        attempts: u32,
        message: String,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse { service: String, message: String },

    // =========================================================================
    // Action Errors
    // =========================================================================
    #[error("Action failed for {path}: {reason}")]
    ActionFailed { path: PathBuf, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl CoreError {
    /// Creates a request failure for a named service
    pub fn request_failed(
        service: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        CoreError::ServiceRequestFailed {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    /// Creates an invalid response error for a named service
    pub fn invalid_response(service: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is transient and worth retrying.
    ///
    /// Rate limits, timeouts, network failures and 5xx responses are transient;
    /// 4xx responses and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::RateLimited { .. } | CoreError::Timeout(_) => true,
            CoreError::ServiceRequestFailed { status, .. } => match status {
                None => true,
                Some(code) => *code == 408 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Server-requested delay before the next attempt, if any
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            CoreError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
