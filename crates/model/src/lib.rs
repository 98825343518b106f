//! casework-model: case plan model definitions.
//!
//! A case definition is an immutable tree of plan item definitions
//! (stages, tasks, milestones, event listeners) plus the sentries that
//! gate their entry and exit. Definitions arrive as JSON from the
//! deployment collaborator; [`CaseDefinition::from_json`] parses and
//! validates them, and [`DefinitionRepository`] hands them out to the
//! engine by id or by key.

pub mod deserialize;
pub mod error;
pub mod repository;
pub mod types;
mod validate;

pub use error::ModelError;
pub use repository::DefinitionRepository;
pub use types::*;
