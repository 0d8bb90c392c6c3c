//! Per-attempt and control-session error types.

use thiserror::Error;

/// Why a single credential attempt produced no verdict.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The CSRF source page did not contain the configured field
    #[error("CSRF field '{field}' not found in HTML body (status {status})")]
    CsrfMissing { field: String, status: u16 },

    /// Target answered with a status listed as throttling
    #[error("throttled by target (status {0})")]
    Throttled(u16),

    /// Fail keyword absent but the status is outside 200-399
    #[error("non-success status code (200-399): {0}")]
    InvalidStatus(u16),

    /// Network failure while sending or reading
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The request could not be built from the configuration
    #[error("invalid request: {0}")]
    Request(String),
}

impl AttemptError {
    /// HTTP status tied to the error, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::CsrfMissing { status, .. } => Some(*status),
            Self::Throttled(s) | Self::InvalidStatus(s) => Some(*s),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Request(_) => None,
        }
    }

    /// Throttling and transient network failures may be resubmitted.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Throttled(_) => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }
}

/// Failure while talking to the anonymity-network control port.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unable to connect to control port {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control port rejected {step}: {reply}")]
    Rejected { step: &'static str, reply: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AttemptError::Throttled(429).is_retryable());
        assert!(!AttemptError::InvalidStatus(500).is_retryable());
        assert!(!AttemptError::CsrfMissing { field: "t".into(), status: 200 }.is_retryable());
        assert!(!AttemptError::Request("bad".into()).is_retryable());
    }

    #[test]
    fn test_status_reporting() {
        assert_eq!(AttemptError::Throttled(429).status(), Some(429));
        assert_eq!(AttemptError::CsrfMissing { field: "t".into(), status: 403 }.status(), Some(403));
        assert_eq!(AttemptError::Request("bad".into()).status(), None);
    }

    #[test]
    fn test_invalid_status_message() {
        assert_eq!(
            AttemptError::InvalidStatus(503).to_string(),
            "non-success status code (200-399): 503"
        );
    }
}
