//! Error taxonomy for backend calls.

use thiserror::Error;

/// Errors returned by [`Backend`](super::Backend) calls.
///
/// The variants map onto the recovery policy of the callers: transport
/// failures trigger fallbacks, `Duplicate` is surfaced to the user and never
/// retried, everything else is logged.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Connection failed, the body errored mid-stream, or the stream closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend rejected the request because an identical one is in flight (HTTP 409).
    #[error("duplicate request rejected: {message}")]
    Duplicate { message: String },

    /// Any other non-success status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Build an error from a non-success HTTP status and its body.
    ///
    /// JSON bodies of the form `{"error": "..."}`, `{"message": "..."}` or
    /// `{"detail": "..."}` are unwrapped; anything else is used verbatim.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_error_message(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            }
        });

        if status == 409 {
            Self::Duplicate { message }
        } else {
            Self::Status { status, message }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message", "detail"].iter().find_map(|key| {
        match value.get(*key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(inner) => inner
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        }
    })
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result alias for backend calls.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_duplicate() {
        let err = ApiError::from_status(409, r#"{"error": "stream already active"}"#);
        assert!(err.is_duplicate());
        assert_eq!(
            err.to_string(),
            "duplicate request rejected: stream already active"
        );
    }

    #[test]
    fn test_status_message_extraction() {
        let err = ApiError::from_status(500, r#"{"error": {"message": "boom"}}"#);
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = ApiError::from_status(502, "");
        assert_eq!(err.to_string(), "backend returned 502: HTTP 502");

        let err = ApiError::from_status(503, "upstream down\n");
        assert_eq!(err.to_string(), "backend returned 503: upstream down");
    }
}
