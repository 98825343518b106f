/// Errors raised while parsing, validating or looking up case definitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A required field is missing or has the wrong JSON type.
    #[error("{context}: missing or invalid '{field}' field")]
    MissingField { context: String, field: String },

    /// A field is present but its value is not acceptable.
    #[error("{context}: invalid '{field}': {message}")]
    InvalidField {
        context: String,
        field: String,
        message: String,
    },

    /// Two plan items or two sentries share an id.
    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    /// A plan item, sentry or on-part references an id that does not exist.
    #[error("'{owner}' references unknown {kind} '{reference}'")]
    UnknownReference {
        owner: String,
        kind: &'static str,
        reference: String,
    },

    /// A plan item's parent is not a stage.
    #[error("parent '{parent}' of plan item '{item}' is not a stage")]
    ParentNotAStage { item: String, parent: String },

    /// Following parent links from a plan item never reaches the root.
    #[error("plan item '{0}' is not reachable from the plan model root")]
    Unreachable(String),

    /// The same sentry is used as entry and exit criterion of one item.
    #[error("sentry '{sentry}' is both entry and exit criterion of '{item}'")]
    ConflictingCriteria { item: String, sentry: String },

    /// No deployed definition matches the lookup.
    #[error("case definition not found: {0}")]
    DefinitionNotFound(String),
}
