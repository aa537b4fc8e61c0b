use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::client::transport::TransportError;
use crate::security::truncate_body;

/// Step of the authenticate-then-upload cycle an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Input,
    LoginPage,
    LoginSubmit,
    SessionCheck,
    Upload,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Input => "input",
            Step::LoginPage => "login_page",
            Step::LoginSubmit => "login_submit",
            Step::SessionCheck => "session_check",
            Step::Upload => "upload",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Protocol,
    Authentication,
    Validation,
    Io,
    Json,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::Io => "io",
            ErrorKind::Json => "json",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error during {step}: {message}")]
    Network {
        step: Step,
        status: Option<u16>,
        message: String,
        body: Option<String>,
    },

    #[error("Protocol error during {step}: {message}")]
    Protocol { step: Step, message: String },

    #[error("Authentication failed during {step}: server rejected the username or password")]
    Authentication { step: Step },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn protocol(step: Step, message: impl Into<String>) -> Self {
        Self::Protocol {
            step,
            message: message.into(),
        }
    }

    pub fn authentication(step: Step) -> Self {
        Self::Authentication { step }
    }

    /// Transport-level failure: DNS, TLS, refused connection, timeout.
    pub fn transport(step: Step, error: TransportError) -> Self {
        Self::Network {
            step,
            status: None,
            message: error.to_string(),
            body: None,
        }
    }

    /// Unexpected HTTP status. The body is kept, truncated, for diagnostics.
    pub fn http_status(step: Step, status: u16, body: &str) -> Self {
        let body = truncate_body(body);
        Self::Network {
            step,
            status: Some(status),
            message: format!("unexpected HTTP status {}", status),
            body: (!body.is_empty()).then_some(body),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Network { .. } => ErrorKind::Network,
            AppError::Protocol { .. } => ErrorKind::Protocol,
            AppError::Authentication { .. } => ErrorKind::Authentication,
            AppError::Validation { .. } => ErrorKind::Validation,
            AppError::Io(_) => ErrorKind::Io,
            AppError::Json(_) => ErrorKind::Json,
            AppError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn step(&self) -> Option<Step> {
        match self {
            AppError::Network { step, .. }
            | AppError::Protocol { step, .. }
            | AppError::Authentication { step } => Some(*step),
            AppError::Validation { .. } => Some(Step::Input),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Network { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a fresh cycle stands a chance of succeeding. Only consulted by
    /// the batch runner; the protocol core never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network { status, .. } => {
                matches!(status, None | Some(408 | 429 | 500 | 502 | 503 | 504))
            }
            _ => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::Authentication { .. } | AppError::Validation { .. } | AppError::Config(_)
        )
    }
}
