//! Error types shared across all connectors.

use thiserror::Error;

/// Main error type for connector operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level HTTP failure (connection refused, DNS, timeout).
    #[error("Connection error: {0}")]
    Http(String),

    /// Authentication or authorization failure (401/403).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The connector has no verified configuration yet.
    #[error("{0}")]
    NotConfigured(String),

    /// Target resource does not exist (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream rate limit (429). Carries the `Retry-After` value in seconds
    /// when the server sent one.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    /// Guardrail rejection for overly broad log/metric queries.
    #[error("{0}")]
    QueryTooBroad(String),

    /// Mutating operation attempted while the session is read-only.
    #[error("Read-only mode enabled")]
    ReadOnly,

    /// Malformed or incomplete tool arguments.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Destructive operation attempted without explicit confirmation.
    #[error("{0}")]
    ConfirmationRequired(String),

    /// API returned a non-success status not covered by a specific variant.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Local subprocess failed (git, docker, cypress, playwright).
    #[error("Subprocess error: {0}")]
    Subprocess(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (bad env var, missing field).
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map an HTTP status code to the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimited {
                message,
                retry_after: None,
            },
            _ => Self::Api { status, message },
        }
    }

    /// Construct a rate-limit error carrying the `Retry-After` seconds.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Stable machine-readable code for structured error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "CONNECTION_FAILED",
            Self::Auth(_) => "AUTH_FAILED",
            Self::NotConfigured(_) => "NOT_CONFIGURED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::QueryTooBroad(_) => "QUERY_TOO_BROAD",
            Self::ReadOnly => "READ_ONLY_MODE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            Self::Api { .. } => "API_ERROR",
            Self::Subprocess(_) => "SUBPROCESS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "INVALID_CONFIG",
        }
    }

    /// The HTTP status associated with this error, when one exists.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Auth(_) => Some(401),
            Self::NotFound(_) => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Api { status, .. } => Some(*status),
            Self::NotConfigured(_)
            | Self::QueryTooBroad(_)
            | Self::InvalidRequest(_)
            | Self::ConfirmationRequired(_) => Some(400),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_auth() {
        assert!(matches!(Error::from_status(401, "denied"), Error::Auth(_)));
        assert!(matches!(Error::from_status(403, "denied"), Error::Auth(_)));
        assert_eq!(Error::from_status(401, "denied").code(), "AUTH_FAILED");
    }

    #[test]
    fn test_from_status_not_found() {
        let err = Error::from_status(404, "missing");
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_from_status_rate_limited() {
        let err = Error::from_status(429, "slow down");
        match &err {
            Error::RateLimited { retry_after, .. } => assert!(retry_after.is_none()),
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(err.http_status(), Some(429));
    }

    #[test]
    fn test_from_status_generic() {
        let err = Error::from_status(502, "bad gateway");
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limited_retry_after() {
        let err = Error::rate_limited("throttled", Some(7));
        match err {
            Error::RateLimited { retry_after, .. } => assert_eq!(retry_after, Some(7)),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_codes_stable() {
        assert_eq!(Error::ReadOnly.code(), "READ_ONLY_MODE");
        assert_eq!(
            Error::QueryTooBroad("range".to_string()).code(),
            "QUERY_TOO_BROAD"
        );
        assert_eq!(
            Error::NotConfigured("call configure first".to_string()).code(),
            "NOT_CONFIGURED"
        );
    }
}
