//! Historic records: propagation from unit-of-work events, and queries.

mod propagator;
mod query;

pub use propagator::HistoryPropagator;
pub use query::{HistoricCaseInstanceQuery, HistoricPlanItemInstanceQuery};
