/// All errors that can be returned by a CaseStorage implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another unit of work
    /// committed a newer version of the case instance.
    #[error("concurrent conflict on case instance {case_instance_id}: expected version {expected_version}")]
    ConcurrentConflict {
        case_instance_id: String,
        expected_version: i64,
    },

    /// No runtime case instance with this id.
    #[error("case instance not found: {case_instance_id}")]
    CaseInstanceNotFound { case_instance_id: String },

    /// A case instance with this id already exists.
    #[error("case instance already exists: {case_instance_id}")]
    CaseInstanceAlreadyExists { case_instance_id: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
