//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::CacheInfo;

// == Load Failure ==
/// A failure reported by the value source, kept as a cached value.
///
/// Cloning is cheap: every caller that hits the cached failure shares the
/// same underlying error.
#[derive(Clone)]
pub struct LoadFailure {
    inner: Arc<anyhow::Error>,
}

impl LoadFailure {
    /// Wraps an error returned by the value source.
    pub fn new(error: anyhow::Error) -> Self {
        Self {
            inner: Arc::new(error),
        }
    }

    /// The original error.
    pub fn error(&self) -> &anyhow::Error {
        &self.inner
    }

    /// True if both handles point at the same recorded failure.
    pub fn same_failure(&self, other: &LoadFailure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoadFailure").field(&self.inner).finish()
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for LoadFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + Send + Sync + 'static) = (*self.inner).as_ref();
        Some(cause)
    }
}

// == Integrity Violation ==
/// Result of a failed integrity check: which invariants broke and the
/// counter state at the time of the check.
#[derive(Debug, Clone)]
pub struct IntegrityViolation {
    /// Descriptions of every failing check
    pub failing: Vec<String>,
    /// Counter snapshot taken under the structure lock
    pub info: CacheInfo,
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failing check(s): [{}]; {}",
            self.failing.len(),
            self.failing.join("; "),
            self.info
        )
    }
}

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation attempted after close
    #[error("Cache closed: {name}")]
    Closed { name: String },

    /// The cache was used in a way its configuration does not support
    #[error("Usage error: {0}")]
    Usage(String),

    /// Invalid configuration rejected at build time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A bounded retry loop ran out of attempts, most likely a deadlock
    #[error("Lock spins exceeded in cache '{name}' after {spins} attempts")]
    LockSpinsExceeded { name: String, spins: u32 },

    /// A cached load failure, re-thrown to the caller
    #[error("{message}")]
    Propagated {
        message: String,
        #[source]
        cause: LoadFailure,
    },

    /// Internal data structures are inconsistent
    #[error("Integrity check failed: {0}")]
    Integrity(Box<IntegrityViolation>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// The original load failure, if this error carries one.
    pub fn load_failure(&self) -> Option<&LoadFailure> {
        match self {
            CacheError::Propagated { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_load_failure_exposes_source() {
        let failure = LoadFailure::new(anyhow::anyhow!("backend down"));
        assert_eq!(failure.to_string(), "backend down");
        assert!(failure.source().is_some());
    }

    #[test]
    fn test_propagated_error_keeps_cause() {
        let failure = LoadFailure::new(anyhow::anyhow!("boom"));
        let err = CacheError::Propagated {
            message: "(expiry=none) boom".to_string(),
            cause: failure.clone(),
        };
        assert_eq!(err.to_string(), "(expiry=none) boom");
        assert!(err.load_failure().unwrap().same_failure(&failure));
        assert_eq!(err.source().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_closed_error_message() {
        let err = CacheError::Closed {
            name: "users".to_string(),
        };
        assert_eq!(err.to_string(), "Cache closed: users");
    }
}
