//! Error taxonomy for collection passes.

/// Failure of a single lookup call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Timeout, connection reset, malformed body. Treated as zero results.
    #[error("transient lookup failure: {cause}")]
    Transient { cause: String },

    /// Unrecoverable rejection (e.g. unknown partition). Aborts the partition.
    #[error("permanent lookup failure: {cause}")]
    Permanent { cause: String },
}

impl LookupError {
    pub fn transient(cause: impl Into<String>) -> Self {
        LookupError::Transient {
            cause: cause.into(),
        }
    }

    pub fn permanent(cause: impl Into<String>) -> Self {
        LookupError::Permanent {
            cause: cause.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LookupError::Transient { .. })
    }

    pub fn cause(&self) -> &str {
        match self {
            LookupError::Transient { cause } | LookupError::Permanent { cause } => cause,
        }
    }
}

/// Catalog store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal conditions that abort a whole pass.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Empty target name or malformed partition list. Raised before any query.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_accessors() {
        let t = LookupError::transient("timed out");
        assert!(t.is_transient());
        assert_eq!(t.cause(), "timed out");
        assert_eq!(t.to_string(), "transient lookup failure: timed out");

        let p = LookupError::permanent("HTTP 404");
        assert!(!p.is_transient());
        assert_eq!(p.cause(), "HTTP 404");
    }
}
