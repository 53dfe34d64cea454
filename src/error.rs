//! Error types shared by the sync components.
//!
//! Components return [`SyncError`] so callers can tell transient failures
//! (worth retrying, or worth stopping a fetch early for) from fatal ones.
//! The binaries wrap these in `anyhow` with context.

use thiserror::Error;

/// Last.fm error codes that indicate a temporary condition on their side.
///
/// 8 = operation failed, 11 = service offline, 16 = temporarily unavailable,
/// 29 = rate limit exceeded.
pub const TRANSIENT_API_CODES: [u32; 4] = [8, 11, 16, 29];

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("HTTP {status} from Last.fm")]
    Http { status: u16 },

    #[error("Last.fm API error {code}: {message}")]
    Api { code: u32, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Response(#[from] serde_json::Error),

    #[error("library error: {0}")]
    Library(String),

    #[error("query error: {0}")]
    Query(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Http { status } => *status >= 500 || *status == 429,
            SyncError::Api { code, .. } => TRANSIENT_API_CODES.contains(code),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_http_statuses() {
        assert!(SyncError::Http { status: 503 }.is_transient());
        assert!(SyncError::Http { status: 429 }.is_transient());
        assert!(!SyncError::Http { status: 403 }.is_transient());
    }

    #[test]
    fn test_transient_api_codes() {
        let rate_limited = SyncError::Api {
            code: 29,
            message: "Rate Limit Exceeded".to_string(),
        };
        assert!(rate_limited.is_transient());

        let bad_key = SyncError::Api {
            code: 10,
            message: "Invalid API key".to_string(),
        };
        assert!(!bad_key.is_transient());
    }

    #[test]
    fn test_config_errors_are_fatal() {
        assert!(!SyncError::Config("missing".to_string()).is_transient());
        assert!(!SyncError::Library("bad xml".to_string()).is_transient());
    }
}
