use casework_model::ModelError;
use casework_storage::StorageError;

/// Errors surfaced by commands and queries.
///
/// Every variant aborts the enclosing unit of work; nothing is half-committed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Null or invalid input to a command or query filter. The message is
    /// exactly what callers see, e.g. `involvedUser is null`.
    #[error("{0}")]
    IllegalArgument(String),

    /// The requested operation is not allowed in the current state.
    #[error("{0}")]
    IllegalState(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A task handler reported an unrecoverable failure.
    #[error("plan item {plan_item_instance_id} ({definition_id}) failed: {message}")]
    WorkFailed {
        plan_item_instance_id: String,
        definition_id: String,
        message: String,
    },

    /// The agenda did not reach a fixpoint within the configured bound,
    /// usually because of a sentry cycle.
    #[error("no progress in case instance {case_instance_id} after {operations} agenda operations")]
    NoProgress {
        case_instance_id: String,
        operations: usize,
    },

    /// An if-part, repetition or completion condition could not be evaluated.
    #[error("expression error: {0}")]
    Expression(String),

    #[error(transparent)]
    Definition(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub(crate) fn illegal_argument(message: impl Into<String>) -> Self {
        EngineError::IllegalArgument(message.into())
    }

    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        EngineError::IllegalState(message.into())
    }

    /// True for an optimistic-locking conflict the caller may retry.
    pub fn is_concurrent_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::Storage(StorageError::ConcurrentConflict { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_messages_are_verbatim() {
        let e = EngineError::illegal_argument("involvedUser is null");
        assert_eq!(e.to_string(), "involvedUser is null");
    }

    #[test]
    fn conflict_detection() {
        let e = EngineError::from(StorageError::ConcurrentConflict {
            case_instance_id: "c".to_string(),
            expected_version: 3,
        });
        assert!(e.is_concurrent_conflict());
        assert!(!EngineError::illegal_state("x").is_concurrent_conflict());
    }
}
