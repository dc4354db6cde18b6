//! Command error types for the terminal front end
//!
//! Provides structured errors that serialize to `{"code": "...", "message": "..."}`.

use serde::Serialize;

use scout_core::chat::DUPLICATE_MESSAGE;
use scout_core::SessionError;

/// Errors returned by CLI commands
///
/// Each variant serializes with a snake_case `code` field for scripted use.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CommandError {
    // Validation errors
    InvalidUrl { message: String },

    // Not found errors
    ConversationNotFound { message: String },

    // Job and chat outcomes
    JobFailed { message: String, job_id: String },
    DuplicateRequest { message: String },
    ChatFailed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },

    // Operation errors
    StorageError { message: String },
    ExternalError { message: String },
    InternalError { message: String },
}

impl CommandError {
    pub fn invalid_url(url: &str) -> Self {
        Self::InvalidUrl {
            message: format!("Not an http(s) URL: {}", url),
        }
    }

    pub fn conversation_not_found() -> Self {
        Self::ConversationNotFound {
            message: "Conversation not found".to_string(),
        }
    }

    pub fn job_failed(job_id: impl Into<String>, error: Option<&str>) -> Self {
        let job_id = job_id.into();
        Self::JobFailed {
            message: format!("Job {} failed: {}", job_id, error.unwrap_or("unknown error")),
            job_id,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::ExternalError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl { message } => write!(f, "{}", message),
            Self::ConversationNotFound { message } => write!(f, "{}", message),
            Self::JobFailed { message, .. } => write!(f, "{}", message),
            Self::DuplicateRequest { message } => write!(f, "{}", message),
            Self::ChatFailed {
                message,
                trace_id: Some(trace_id),
            } => write!(f, "{} (trace {})", message, trace_id),
            Self::ChatFailed { message, .. } => write!(f, "{}", message),
            Self::StorageError { message } => write!(f, "{}", message),
            Self::ExternalError { message } => write!(f, "{}", message),
            Self::InternalError { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CommandError {}

// Errors from scout-core application flow keep their context chain
impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        Self::external(format!("{:#}", err))
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<SessionError> for CommandError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Duplicate => Self::DuplicateRequest {
                message: DUPLICATE_MESSAGE.to_string(),
            },
            SessionError::Failed { message, trace_id } => Self::ChatFailed { message, trace_id },
        }
    }
}

/// Result type alias for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Extension trait for converting Results to CommandResult
pub trait ResultExt<T> {
    fn storage_err(self) -> CommandResult<T>;
    fn internal_err(self) -> CommandResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn storage_err(self) -> CommandResult<T> {
        self.map_err(|e| CommandError::storage(e.to_string()))
    }

    fn internal_err(self) -> CommandResult<T> {
        self.map_err(|e| CommandError::internal(e.to_string()))
    }
}
