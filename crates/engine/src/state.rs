//! Plan item instance states and the transition table.

use std::fmt;

use casework_model::Transition;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemState {
    Available,
    Enabled,
    Active,
    Suspended,
    Completed,
    Terminated,
    Failed,
    WaitingForRepetition,
}

impl PlanItemState {
    pub const ALL: [PlanItemState; 8] = [
        PlanItemState::Available,
        PlanItemState::Enabled,
        PlanItemState::Active,
        PlanItemState::Suspended,
        PlanItemState::Completed,
        PlanItemState::Terminated,
        PlanItemState::Failed,
        PlanItemState::WaitingForRepetition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanItemState::Available => "available",
            PlanItemState::Enabled => "enabled",
            PlanItemState::Active => "active",
            PlanItemState::Suspended => "suspended",
            PlanItemState::Completed => "completed",
            PlanItemState::Terminated => "terminated",
            PlanItemState::Failed => "failed",
            PlanItemState::WaitingForRepetition => "waiting_for_repetition",
        }
    }

    pub fn parse(s: &str) -> Option<PlanItemState> {
        PlanItemState::ALL.into_iter().find(|st| st.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanItemState::Completed | PlanItemState::Terminated | PlanItemState::Failed
        )
    }
}

impl fmt::Display for PlanItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target state of `transition` from `from`.
///
/// `suspended_from` is the state a suspended item returns to on resume.
/// `create` is not in the table: new instances start in `Available` or
/// `WaitingForRepetition` depending on why they were created.
pub fn next_state(
    transition: Transition,
    from: PlanItemState,
    suspended_from: Option<PlanItemState>,
) -> Result<PlanItemState, EngineError> {
    use PlanItemState::*;

    let to = match (transition, from) {
        (Transition::Enable, Available) => Some(Enabled),
        (Transition::Start, Enabled) => Some(Active),
        (Transition::Complete, Active) => Some(Completed),
        (Transition::Occur, Active) => Some(Completed),
        (Transition::Fault, Active) => Some(Failed),
        (Transition::Suspend, Active | Enabled) => Some(Suspended),
        (Transition::Resume, Suspended) => suspended_from,
        (Transition::Repeat, WaitingForRepetition) => Some(Available),
        (Transition::Terminate | Transition::Exit, s) if !s.is_terminal() => Some(Terminated),
        _ => None,
    };

    to.ok_or_else(|| {
        EngineError::illegal_state(format!(
            "transition '{}' is not allowed in state '{}'",
            transition, from
        ))
    })
}
