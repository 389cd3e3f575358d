//! Error taxonomy for the harvester.

use std::path::PathBuf;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Network failure, 5xx or an unexpected status. The current unit is skipped.
    #[error("Transient fetch failure for {endpoint}: {reason}")]
    Transient { endpoint: String, reason: String },

    /// 404 from the source: the resource is gone.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Insufficient data: expected {expected} threads, selected {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Text generation failed: {0}")]
    Generation(String),
}

impl HarvestError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn transient(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transient {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = HarvestError::InsufficientData {
            expected: 12,
            actual: 7,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient data: expected 12 threads, selected 7"
        );
    }

    #[test]
    fn test_not_found_predicate() {
        assert!(HarvestError::NotFound("/thread/1.json".into()).is_not_found());
        assert!(!HarvestError::transient("/catalog.json", "503").is_not_found());
    }
}
