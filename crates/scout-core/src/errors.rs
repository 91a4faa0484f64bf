//! Error types for the realtime transport.
//!
//! Transport failures never reach event subscribers. The client absorbs them
//! and turns them into a scheduled reconnect, so these types exist mainly to
//! carry enough context into the log line that records each failure.

use thiserror::Error;

/// Failure while opening or reading the event stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or the connection dropped.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered the handshake with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated preview).
        body: String,
    },

    /// The endpoint URL could not be parsed.
    #[error("invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Reading the body failed mid-stream.
    #[error("stream read error: {0}")]
    Read(String),

    /// The server closed the stream.
    #[error("stream closed by server")]
    Closed,
}

impl TransportError {
    /// Whether waiting and trying again could plausibly succeed.
    ///
    /// An unparseable endpoint will fail the same way on every attempt.
    /// Client errors other than timeouts and rate limits point at a bad
    /// credential or URL rather than a flaky network.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl(_) => false,
            Self::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::Http(_) | Self::Read(_) | Self::Closed => true,
        }
    }

    /// Short category label used as a structured log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Status { .. } => "status",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Read(_) => "read",
            Self::Closed => "closed",
        }
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_display() {
        let err = TransportError::Status {
            status: 401,
            body: "unauthorized".into(),
        };
        assert_eq!(err.to_string(), "unexpected status 401: unauthorized");
    }

    #[test]
    fn closed_display() {
        assert_eq!(TransportError::Closed.to_string(), "stream closed by server");
    }

    #[test]
    fn invalid_url_from_conversion() {
        let parse_err = url::Url::parse("not a url").unwrap_err();
        let err: TransportError = parse_err.into();
        assert_matches!(err, TransportError::InvalidUrl(_));
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        for status in [500, 502, 503, 408, 429] {
            let err = TransportError::Status {
                status,
                body: String::new(),
            };
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400, 401, 403, 404] {
            let err = TransportError::Status {
                status,
                body: String::new(),
            };
            assert!(!err.is_retryable(), "status {status} should not be retryable");
        }
    }

    #[test]
    fn read_and_closed_are_retryable() {
        assert!(TransportError::Read("reset".into()).is_retryable());
        assert!(TransportError::Closed.is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(TransportError::Closed.category(), "closed");
        assert_eq!(TransportError::Read(String::new()).category(), "read");
        let status = TransportError::Status {
            status: 500,
            body: String::new(),
        };
        assert_eq!(status.category(), "status");
    }
}
