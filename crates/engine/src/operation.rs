//! Applying a command to the loaded working set, before the agenda runs.

use casework_model::{PlanItemKind, Transition};
use casework_storage::{CaseState, LinkScope, PrincipalKind};
use tracing::info;

use crate::capability::{Capabilities, CompletionMode};
use crate::command::Command;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::event::CaseEvent;
use crate::identity::{require_principal, STARTER};
use crate::state::PlanItemState;

impl ExecutionContext<'_> {
    pub(crate) fn apply(&mut self, command: &Command) -> Result<(), EngineError> {
        if self.case.state == CaseState::Suspended && !command.allowed_while_suspended() {
            return Err(EngineError::illegal_state(format!(
                "case instance {} is suspended",
                self.case.id
            )));
        }

        match command {
            Command::StartCase { started_by, .. } => self.start_case(started_by.as_deref()),

            Command::StartPlanItem {
                plan_item_instance_id,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                self.transition(idx, Transition::Start)
            }

            Command::CompletePlanItem {
                plan_item_instance_id,
                variables,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                let def = self.plan_item_definition(idx)?;
                match Capabilities::of(&def.kind).completion {
                    CompletionMode::Caller | CompletionMode::Handler => {}
                    _ => {
                        return Err(EngineError::illegal_state(format!(
                            "a {} cannot be completed by a caller",
                            def.kind.name()
                        )))
                    }
                }
                self.merge_variables(variables);
                self.transition(idx, Transition::Complete)
            }

            Command::TriggerPlanItem {
                plan_item_instance_id,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                let def = self.plan_item_definition(idx)?;
                let transition = match Capabilities::of(&def.kind).completion {
                    CompletionMode::Trigger => Transition::Occur,
                    CompletionMode::Handler => Transition::Complete,
                    _ => {
                        return Err(EngineError::illegal_state(format!(
                            "a {} cannot be triggered",
                            def.kind.name()
                        )))
                    }
                };
                self.transition(idx, transition)
            }

            Command::CompleteStage {
                plan_item_instance_id,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                let def = self.plan_item_definition(idx)?;
                if !matches!(def.kind, PlanItemKind::Stage { .. }) {
                    return Err(EngineError::illegal_state(format!(
                        "plan item instance {} is not a stage",
                        plan_item_instance_id
                    )));
                }
                if self.items[idx].state != PlanItemState::Active
                    || !self.stage_can_complete(idx, true)?
                {
                    return Err(EngineError::illegal_state(format!(
                        "stage {} cannot complete: it is not active or has unfinished required children",
                        plan_item_instance_id
                    )));
                }
                self.complete_stage(idx)
            }

            Command::TerminatePlanItem {
                plan_item_instance_id,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                self.terminate_cascade(idx, Transition::Terminate)
            }

            Command::SuspendPlanItem {
                plan_item_instance_id,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                self.ensure_not_root(idx)?;
                let def = self.plan_item_definition(idx)?;
                if !Capabilities::of(&def.kind).suspendable {
                    return Err(EngineError::illegal_state(format!(
                        "a {} cannot be suspended",
                        def.kind.name()
                    )));
                }
                self.transition(idx, Transition::Suspend)
            }

            Command::ResumePlanItem {
                plan_item_instance_id,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                self.ensure_not_root(idx)?;
                self.transition(idx, Transition::Resume)
            }

            Command::FailPlanItem {
                plan_item_instance_id,
                ..
            } => {
                let idx = self.live_item(plan_item_instance_id)?;
                self.ensure_not_root(idx)?;
                self.transition(idx, Transition::Fault)
            }

            Command::TerminateCase { .. } => {
                let root = self.root_index()?;
                self.terminate_cascade(root, Transition::Terminate)
            }

            Command::SuspendCase { .. } => {
                let root = self.root_index()?;
                self.transition(root, Transition::Suspend)?;
                self.set_case_state(CaseState::Suspended);
                Ok(())
            }

            Command::ResumeCase { .. } => {
                if self.case.state != CaseState::Suspended {
                    return Err(EngineError::illegal_state(format!(
                        "case instance {} is not suspended",
                        self.case.id
                    )));
                }
                let root = self.root_index()?;
                self.set_case_state(CaseState::Active);
                self.transition(root, Transition::Resume)
            }

            Command::SetVariables { variables, .. } => {
                self.merge_variables(variables);
                Ok(())
            }

            Command::AddIdentityLink {
                plan_item_instance_id,
                principal_kind,
                principal_id,
                link_type,
                ..
            } => {
                let principal_id = require_principal(*principal_kind, principal_id.as_deref())?;
                match plan_item_instance_id {
                    Some(task_id) => {
                        let idx = self.index_of(task_id)?;
                        self.add_task_link(idx, *principal_kind, principal_id, link_type)?;
                    }
                    None => {
                        self.add_case_link(*principal_kind, principal_id, link_type);
                    }
                }
                Ok(())
            }

            Command::RemoveIdentityLink {
                plan_item_instance_id,
                principal_kind,
                principal_id,
                link_type,
                ..
            } => {
                let principal_id = require_principal(*principal_kind, principal_id.as_deref())?;
                let (scope, scope_id) = match plan_item_instance_id {
                    Some(task_id) => {
                        let idx = self.index_of(task_id)?;
                        (LinkScope::Task, self.items[idx].id.clone())
                    }
                    None => (LinkScope::Case, self.case.id.clone()),
                };
                self.remove_link(scope, &scope_id, *principal_kind, principal_id, link_type);
                Ok(())
            }
        }
    }

    fn start_case(&mut self, started_by: Option<&str>) -> Result<(), EngineError> {
        let case = &self.case;
        self.events.push(CaseEvent::CaseStarted {
            case_instance_id: case.id.clone(),
            case_definition_id: case.case_definition_id.clone(),
            case_definition_key: case.case_definition_key.clone(),
            business_key: case.business_key.clone(),
            tenant_id: case.tenant_id.clone(),
            started_by: case.started_by.clone(),
            started_at: case.started_at.clone(),
        });
        info!(
            case_instance_id = %case.id,
            case_definition_id = %case.case_definition_id,
            business_key = case.business_key.as_deref().unwrap_or(""),
            "case instance started"
        );

        if let Some(user) = started_by {
            self.add_case_link(PrincipalKind::User, user, STARTER);
        }

        let definition = self.definition;
        self.create_instance(
            &definition.plan_model,
            None,
            PlanItemState::Available,
            1,
            None,
        );
        Ok(())
    }

    /// Index of a plan item instance whose enclosing stages are active.
    fn live_item(&self, plan_item_instance_id: &str) -> Result<usize, EngineError> {
        let idx = self.index_of(plan_item_instance_id)?;
        self.ensure_unblocked(idx)?;
        Ok(idx)
    }

    fn ensure_not_root(&self, idx: usize) -> Result<(), EngineError> {
        if self.root == Some(idx) {
            return Err(EngineError::illegal_state(
                "the plan model is controlled through case commands",
            ));
        }
        Ok(())
    }
}
