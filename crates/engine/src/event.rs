//! Domain events produced by one unit of work, in the order they happened.
//!
//! The history propagator consumes them after the agenda reaches its
//! fixpoint; callers receive them in the command outcome.

use casework_model::Transition;
use casework_storage::{CaseState, IdentityLinkRecord};
use serde::Serialize;

use crate::state::PlanItemState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseEvent {
    CaseStarted {
        case_instance_id: String,
        case_definition_id: String,
        case_definition_key: String,
        business_key: Option<String>,
        tenant_id: Option<String>,
        started_by: Option<String>,
        started_at: String,
    },
    CaseStateChanged {
        case_instance_id: String,
        state: CaseState,
        at: String,
    },
    /// Variables changed without a state change.
    CaseUpdated {
        case_instance_id: String,
        at: String,
    },
    CaseEnded {
        case_instance_id: String,
        state: CaseState,
        ended_at: String,
    },
    PlanItemCreated {
        case_instance_id: String,
        plan_item_instance_id: String,
        definition_id: String,
        stage_instance_id: Option<String>,
        kind: String,
        name: Option<String>,
        repetition: u32,
        state: PlanItemState,
        at: String,
    },
    PlanItemTransitioned {
        case_instance_id: String,
        plan_item_instance_id: String,
        definition_id: String,
        transition: Transition,
        from: PlanItemState,
        to: PlanItemState,
        at: String,
    },
    IdentityLinkAdded {
        link: IdentityLinkRecord,
    },
    IdentityLinkRemoved {
        link: IdentityLinkRecord,
    },
}

impl CaseEvent {
    pub fn case_instance_id(&self) -> &str {
        match self {
            CaseEvent::CaseStarted {
                case_instance_id, ..
            }
            | CaseEvent::CaseStateChanged {
                case_instance_id, ..
            }
            | CaseEvent::CaseUpdated {
                case_instance_id, ..
            }
            | CaseEvent::CaseEnded {
                case_instance_id, ..
            }
            | CaseEvent::PlanItemCreated {
                case_instance_id, ..
            }
            | CaseEvent::PlanItemTransitioned {
                case_instance_id, ..
            } => case_instance_id,
            CaseEvent::IdentityLinkAdded { link } | CaseEvent::IdentityLinkRemoved { link } => {
                &link.case_instance_id
            }
        }
    }
}
