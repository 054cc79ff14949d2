use serde::Serialize;
use thiserror::Error;

/// The closed set of failure categories every call site reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidConfiguration,
    RateLimitExceeded,
    NetworkError,
    UpstreamApiError,
    ValidationError,
    SourceProviderError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidConfiguration => "InvalidConfiguration",
            ErrorKind::RateLimitExceeded => "RateLimitExceeded",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::UpstreamApiError => "UpstreamApiError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::SourceProviderError => "SourceProviderError",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    #[error("Rate limit exceeded for '{key}', retry after {retry_after_ms} ms")]
    RateLimitExceeded { key: String, retry_after_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    /// The call was still in flight when its wall-clock budget ran out.
    #[error("{operation} did not respond within {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Upstream API error ({status}): {message}")]
    UpstreamApi { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Source provider error ({status}): {message}")]
    SourceProvider { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn upstream(message: impl Into<String>) -> Self {
        Error::UpstreamApi {
            status: 502,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Error::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Error::Network(_) | Error::Timeout { .. } => ErrorKind::NetworkError,
            Error::UpstreamApi { .. } => ErrorKind::UpstreamApiError,
            Error::Validation(_) => ErrorKind::ValidationError,
            Error::SourceProvider { .. } => ErrorKind::SourceProviderError,
        }
    }

    /// HTTP-like status used for uniform presentation.
    pub fn status(&self) -> u16 {
        match self {
            Error::InvalidConfiguration(_) => 500,
            Error::RateLimitExceeded { .. } => 429,
            Error::Network(_) => 503,
            Error::Timeout { .. } => 504,
            Error::UpstreamApi { status, .. } => *status,
            Error::Validation(_) => 400,
            Error::SourceProvider { status, .. } => *status,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimitExceeded { .. } | Error::Network(_) | Error::Timeout { .. } => true,
            Error::UpstreamApi { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::RateLimitExceeded { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        ErrorClassifier::from_transport(&err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(format!("Unexpected data shape: {}", err))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::UpstreamApi {
            status: 500,
            message: format!("Record store failure: {}", err),
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Error::InvalidConfiguration(format!("Invalid header value: {}", err))
    }
}

const TRANSPORT_MARKERS: &[&str] = &[
    "network",
    "connection",
    "connect error",
    "fetch failed",
    "failed to fetch",
    "dns",
    "timed out",
    "timeout",
    "unreachable",
    "reset by peer",
    "broken pipe",
];

/// Normalizes arbitrary failures into the [`Error`] taxonomy.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(err: anyhow::Error) -> Error {
        let err = match err.downcast::<Error>() {
            Ok(tagged) => return tagged,
            Err(other) => other,
        };
        let err = match err.downcast::<reqwest::Error>() {
            Ok(transport) => return Self::from_transport(&transport),
            Err(other) => other,
        };
        let err = match err.downcast::<serde_json::Error>() {
            Ok(shape) => return shape.into(),
            Err(other) => other,
        };

        Self::classify_message(&format!("{:#}", err))
    }

    pub fn classify_message(message: &str) -> Error {
        let lower = message.to_lowercase();
        if TRANSPORT_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return Error::Network(message.to_string());
        }
        Error::upstream(message)
    }

    pub fn from_transport(err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            return Error::Timeout {
                operation: err
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|| "request".to_string()),
                after_ms: 0,
            };
        }
        if err.is_connect() || err.is_request() {
            return Error::Network(err.to_string());
        }
        if err.is_decode() || err.is_body() {
            return Error::upstream(format!("Malformed reply: {}", err));
        }
        match err.status() {
            Some(status) => Error::UpstreamApi {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::classify_message(&err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_errors_pass_through() {
        let original = Error::RateLimitExceeded {
            key: "chat".to_string(),
            retry_after_ms: 1200,
        };
        let classified = ErrorClassifier::classify(anyhow::Error::new(original.clone()));
        assert_eq!(classified, original);
        assert_eq!(classified.status(), 429);
        assert_eq!(classified.retry_after_ms(), Some(1200));
    }

    #[test]
    fn test_transport_messages_become_network_errors() {
        let err = ErrorClassifier::classify(anyhow::anyhow!("TypeError: Failed to fetch"));
        assert_eq!(err.kind(), ErrorKind::NetworkError);

        let err = ErrorClassifier::classify_message("Connection reset by peer");
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unknown_failures_default_to_upstream() {
        let err = ErrorClassifier::classify(anyhow::anyhow!("model returned something odd"));
        assert_eq!(err.kind(), ErrorKind::UpstreamApiError);
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn test_json_failures_are_validation_errors() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = ErrorClassifier::classify(parse_err.into());
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_timeout_is_distinct_but_network_kind() {
        let err = Error::Timeout {
            operation: "analysis".to_string(),
            after_ms: 500,
        };
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(err.status(), 504);
        assert!(!Error::Network("down".to_string()).is_timeout());
    }
}
