//! casework-engine: runs case instances of deployed case definitions.
//!
//! Each [`Command`] executes as one unit of work: the case's runtime state
//! is loaded into an in-memory working set, the command is applied, and
//! an agenda of follow-up operations (sentry evaluation, activation,
//! repetition, task handlers, stage completion) is drained until nothing
//! changes. Runtime changes and the historic mirror are then written in
//! one storage snapshot.
//!
//! Historic case instances can be queried by the users and groups ever
//! involved in them, see [`HistoricCaseInstanceQuery`].

pub mod capability;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod expression;
pub mod handler;
pub mod history;
pub mod identity;
pub mod sentry;
pub mod state;

mod agenda;
mod context;
mod operation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandOutcome};
pub use config::{AgendaOrder, ConfigError, EngineConfig, HistoryLevel};
pub use error::EngineError;
pub use event::CaseEvent;
pub use executor::CommandExecutor;
pub use handler::{
    HandlerError, HandlerOutcome, HandlerRegistry, HandlerResult, TaskHandler, TaskInvocation,
};
pub use history::{HistoricCaseInstanceQuery, HistoricPlanItemInstanceQuery, HistoryPropagator};
pub use state::PlanItemState;
