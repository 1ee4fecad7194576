use thiserror::Error;

/// Application-wide error types for reportd.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Transient transport failure (connect refused/timeout, reset, TLS
    /// handshake). Retried silently by the HTTP client.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Terminal HTTP failure for a single call.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Browser/CDP operation failed.
    #[error("Browser error: {0}")]
    Browser(String),

    /// Login did not complete within the retry ceiling.
    #[error("Login timed out for account {account}")]
    LoginTimeout { account: String },

    /// The target page's inline script no longer matches the baseline.
    #[error("Target page script changed")]
    PageDrift,

    /// The portal rejected a form submission.
    #[error("Submission rejected for account {account}: {body}")]
    SubmitRejected { account: String, body: String },

    /// HTML/document content did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem operation failed (baseline file, config).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cooperative shutdown was requested. Never retried, never logged
    /// as a failure.
    #[error("Operation cancelled")]
    Cancelled,
}

impl ReportError {
    /// Returns true if this error is transient and worth retrying silently.
    pub fn is_transient(&self) -> bool {
        match self {
            ReportError::Network(_) | ReportError::Timeout(_) => true,
            ReportError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error must stop the whole process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReportError::PageDrift)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReportError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ReportError::Network("reset".into()).is_transient());
        assert!(ReportError::Timeout(5).is_transient());
        assert!(ReportError::Http("connect refused".into()).is_transient());
        assert!(!ReportError::Http("404 not found".into()).is_transient());
        assert!(!ReportError::PageDrift.is_transient());
        assert!(!ReportError::Cancelled.is_transient());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ReportError::PageDrift.is_fatal());
        assert!(
            !ReportError::SubmitRejected {
                account: "a".into(),
                body: "{}".into(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_cancellation_is_neither_transient_nor_fatal() {
        let err = ReportError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
    }
}
