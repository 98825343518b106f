//! Externally triggered operations, one unit of work each.

use casework_storage::{CaseState, PrincipalKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::event::CaseEvent;

/// A command against the engine.
///
/// Commands deserialize from JSON tagged by `type`:
///
/// ```json
/// { "type": "complete_plan_item", "case_instance_id": "..", "plan_item_instance_id": ".." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start a case from a deployed definition, by id or by latest key.
    StartCase {
        #[serde(default)]
        case_definition_id: Option<String>,
        #[serde(default)]
        case_definition_key: Option<String>,
        #[serde(default)]
        tenant_id: Option<String>,
        #[serde(default)]
        business_key: Option<String>,
        #[serde(default)]
        started_by: Option<String>,
        #[serde(default)]
        variables: Map<String, Value>,
    },
    /// Manually start an enabled plan item.
    StartPlanItem {
        case_instance_id: String,
        plan_item_instance_id: String,
    },
    /// Report an active human task (or waiting task) done.
    CompletePlanItem {
        case_instance_id: String,
        plan_item_instance_id: String,
        #[serde(default)]
        variables: Map<String, Value>,
    },
    /// Fire an event listener, or resume a task whose handler is waiting.
    TriggerPlanItem {
        case_instance_id: String,
        plan_item_instance_id: String,
    },
    CompleteStage {
        case_instance_id: String,
        plan_item_instance_id: String,
    },
    TerminatePlanItem {
        case_instance_id: String,
        plan_item_instance_id: String,
    },
    SuspendPlanItem {
        case_instance_id: String,
        plan_item_instance_id: String,
    },
    ResumePlanItem {
        case_instance_id: String,
        plan_item_instance_id: String,
    },
    /// Record a permanent failure reported by an external worker.
    FailPlanItem {
        case_instance_id: String,
        plan_item_instance_id: String,
    },
    TerminateCase {
        case_instance_id: String,
    },
    SuspendCase {
        case_instance_id: String,
    },
    ResumeCase {
        case_instance_id: String,
    },
    SetVariables {
        case_instance_id: String,
        variables: Map<String, Value>,
    },
    /// Link a user or group to the case, or to a human task when
    /// `plan_item_instance_id` is set.
    AddIdentityLink {
        case_instance_id: String,
        #[serde(default)]
        plan_item_instance_id: Option<String>,
        principal_kind: PrincipalKind,
        principal_id: Option<String>,
        link_type: String,
    },
    RemoveIdentityLink {
        case_instance_id: String,
        #[serde(default)]
        plan_item_instance_id: Option<String>,
        principal_kind: PrincipalKind,
        principal_id: Option<String>,
        link_type: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartCase { .. } => "start_case",
            Command::StartPlanItem { .. } => "start_plan_item",
            Command::CompletePlanItem { .. } => "complete_plan_item",
            Command::TriggerPlanItem { .. } => "trigger_plan_item",
            Command::CompleteStage { .. } => "complete_stage",
            Command::TerminatePlanItem { .. } => "terminate_plan_item",
            Command::SuspendPlanItem { .. } => "suspend_plan_item",
            Command::ResumePlanItem { .. } => "resume_plan_item",
            Command::FailPlanItem { .. } => "fail_plan_item",
            Command::TerminateCase { .. } => "terminate_case",
            Command::SuspendCase { .. } => "suspend_case",
            Command::ResumeCase { .. } => "resume_case",
            Command::SetVariables { .. } => "set_variables",
            Command::AddIdentityLink { .. } => "add_identity_link",
            Command::RemoveIdentityLink { .. } => "remove_identity_link",
        }
    }

    /// Target case instance; `None` for `StartCase`.
    pub fn case_instance_id(&self) -> Option<&str> {
        match self {
            Command::StartCase { .. } => None,
            Command::StartPlanItem {
                case_instance_id, ..
            }
            | Command::CompletePlanItem {
                case_instance_id, ..
            }
            | Command::TriggerPlanItem {
                case_instance_id, ..
            }
            | Command::CompleteStage {
                case_instance_id, ..
            }
            | Command::TerminatePlanItem {
                case_instance_id, ..
            }
            | Command::SuspendPlanItem {
                case_instance_id, ..
            }
            | Command::ResumePlanItem {
                case_instance_id, ..
            }
            | Command::FailPlanItem {
                case_instance_id, ..
            }
            | Command::TerminateCase { case_instance_id }
            | Command::SuspendCase { case_instance_id }
            | Command::ResumeCase { case_instance_id }
            | Command::SetVariables {
                case_instance_id, ..
            }
            | Command::AddIdentityLink {
                case_instance_id, ..
            }
            | Command::RemoveIdentityLink {
                case_instance_id, ..
            } => Some(case_instance_id),
        }
    }

    /// Whether a suspended case accepts this command.
    pub fn allowed_while_suspended(&self) -> bool {
        matches!(
            self,
            Command::ResumeCase { .. }
                | Command::TerminateCase { .. }
                | Command::SetVariables { .. }
                | Command::AddIdentityLink { .. }
                | Command::RemoveIdentityLink { .. }
        )
    }

    /// Argument checks that need no case state.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Command::StartCase {
                case_definition_id: None,
                case_definition_key: None,
                ..
            } => Err(EngineError::illegal_argument(
                "caseDefinitionId and caseDefinitionKey are null",
            )),
            Command::AddIdentityLink {
                principal_kind,
                principal_id,
                ..
            }
            | Command::RemoveIdentityLink {
                principal_kind,
                principal_id,
                ..
            } => crate::identity::require_principal(*principal_kind, principal_id.as_deref())
                .map(|_| ()),
            _ => Ok(()),
        }
    }
}

/// Result of a committed command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub case_instance_id: String,
    pub case_state: CaseState,
    /// Events of the unit of work, in the order they happened.
    pub events: Vec<CaseEvent>,
}
