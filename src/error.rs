use std::time::Duration;

/// Errors produced by the data synchronization path.
///
/// The type is `Clone` because a single deduplicated upstream call can have
/// many waiters, and each of them observes the same settled outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    // NetworkError
    #[error("network error: {reason}")]
    Network { reason: String },
    #[error("request timed out after {millis}ms")]
    Timeout { millis: u64 },

    // UpstreamError
    #[error("upstream http {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("rate limited by upstream, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    // ParseError
    #[error("malformed response body: {reason}")]
    Parse { reason: String },

    /// Control-flow signal, not a failure.
    #[error("no cached entry for {key}")]
    CacheMiss { key: String },

    #[error("durable storage error: {reason}")]
    Storage { reason: String },
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn network(reason: impl ToString) -> Self {
        Self::Network { reason: reason.to_string() }
    }

    pub fn parse(reason: impl ToString) -> Self {
        Self::Parse { reason: reason.to_string() }
    }

    pub fn storage(reason: impl ToString) -> Self {
        Self::Storage { reason: reason.to_string() }
    }

    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Retry hint for rate-limited responses.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Network and upstream failures are worth retrying later; parse errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(error)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        Self::storage(error)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout { millis: 0 };
        }
        if error.is_decode() {
            return Self::parse(error);
        }
        if let Some(status) = error.status() {
            return Self::Upstream { status: status.as_u16(), body: error.to_string() };
        }
        Self::network(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_carries_retry_hint() {
        let err = SyncError::RateLimited { retry_after: Duration::from_secs(7) };
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_classification() {
        assert!(SyncError::CacheMiss { key: "k".into() }.is_cache_miss());
        assert!(!SyncError::parse("bad json").is_transient());
        assert!(SyncError::Upstream { status: 502, body: String::new() }.is_transient());
        assert!(!SyncError::Upstream { status: 404, body: String::new() }.is_transient());
        assert_eq!(SyncError::network("reset").retry_after(), None);
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let err: SyncError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, SyncError::Parse { .. }));
    }
}
