pub mod conformance;
mod error;
mod filter;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use filter::{
    CaseInstanceOrder, HistoricCaseInstanceFilter, HistoricPlanItemInstanceFilter, SortDirection,
};
pub use memory::{InMemoryCaseStorage, InMemorySnapshot};
pub use record::{
    CaseInstanceRecord, CaseState, HistoricCaseInstanceRecord, HistoricIdentityLinkRecord,
    HistoricPlanItemInstanceRecord, IdentityLinkRecord, LinkScope, PlanItemInstanceRecord,
    PrincipalKind, TransitionRecord,
};
pub use traits::CaseStorage;
