//! Unified error taxonomy for the correlation core.

/// Core error type covering every failure mode of the correlation path.
///
/// The taxonomy matters more than the messages: callers branch on the
/// variant to decide whether to fail open (dedup, lookups), skip a rule
/// (evaluation), retry (conflict), or reject input (parse).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed CEL predicate. Rejected at rule-creation time, never at
    /// evaluation time.
    #[error("CEL parse error: {0}")]
    Parse(String),

    /// Predicate referenced missing or mistyped data at run time. The
    /// offending rule is skipped for that alert; other rules still run.
    #[error("CEL evaluation error: {0}")]
    Evaluation(String),

    /// Hashing or last-hash lookup failure. The caller treats the alert as
    /// non-duplicate (fail open), never drops it.
    #[error("Deduplication error: {0}")]
    Deduplication(String),

    /// Running-number or concurrent-update race. Retried with backoff, then
    /// surfaced.
    #[error("Persistence conflict: {0}")]
    Conflict(String),

    /// Topology or maintenance-window data unavailable. Fail open: no
    /// suppression / no correlation this cycle.
    #[error("Lookup failure: {0}")]
    Lookup(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Check if this error represents a retryable persistence conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if this error must be treated as fail-open by the caller.
    pub fn is_fail_open(&self) -> bool {
        matches!(self, Self::Deduplication(_) | Self::Lookup(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CoreError::Parse("unexpected token `&&&`".to_string());
        assert_eq!(err.to_string(), "CEL parse error: unexpected token `&&&`");
    }

    #[test]
    fn conflict_predicate() {
        assert!(CoreError::Conflict("running_number".to_string()).is_conflict());
        assert!(!CoreError::Evaluation("x".to_string()).is_conflict());
    }

    #[test]
    fn fail_open_predicate() {
        assert!(CoreError::Deduplication("hash".to_string()).is_fail_open());
        assert!(CoreError::Lookup("topology".to_string()).is_fail_open());
        assert!(!CoreError::Parse("x".to_string()).is_fail_open());
    }

    #[test]
    fn from_sqlx() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::Database(_)));
    }
}
