//! The fixpoint loop.
//!
//! Every applied transition schedules follow-up operations; the loop drains
//! them until nothing is left. Operations drain in phases: pending criteria
//! are settled before any item starts automatically, and every automatic
//! start happens before a handler runs or a milestone occurs. Within a
//! phase the configured order applies. Stage completion checks wait until
//! the agenda is empty so that a stage never completes while a sibling it
//! contains is still about to be enabled. The number of operations per
//! unit of work is bounded; running past the bound means the sentry graph
//! does not converge and the unit of work fails.

use casework_model::{ModelError, PlanItemKind, SentryDefinition, Transition};
use casework_storage::{CaseState, PrincipalKind};
use tracing::{debug, warn};

use crate::capability::Capabilities;
use crate::config::AgendaOrder;
use crate::context::{AgendaOp, ExecutionContext};
use crate::error::EngineError;
use crate::expression::evaluate_condition;
use crate::handler::{HandlerOutcome, TaskInvocation};
use crate::identity::{ASSIGNEE, CANDIDATE};
use crate::sentry;
use crate::state::PlanItemState;

impl<'a> ExecutionContext<'a> {
    /// Drain the agenda to a fixpoint.
    pub(crate) fn run_agenda(&mut self) -> Result<(), EngineError> {
        while let Some(op) = self.next_op() {
            self.operations += 1;
            if self.operations > self.services.config.max_agenda_operations {
                warn!(
                    case_instance_id = %self.case.id,
                    operations = self.operations,
                    "agenda did not reach a fixpoint"
                );
                return Err(EngineError::NoProgress {
                    case_instance_id: self.case.id.clone(),
                    operations: self.services.config.max_agenda_operations,
                });
            }
            self.perform(op)?;
        }
        debug!(
            case_instance_id = %self.case.id,
            operations = self.operations,
            "agenda drained"
        );
        Ok(())
    }

    fn next_op(&mut self) -> Option<Op> {
        let order = self.services.config.agenda_order;
        let op = self
            .agenda
            .iter_mut()
            .find(|queue| !queue.is_empty())
            .and_then(|queue| match order {
                AgendaOrder::Fifo => queue.pop_front(),
                AgendaOrder::Lifo => queue.pop_back(),
            });
        match op {
            Some(op) => Some(Op::Agenda(op)),
            None => self.completion_checks.pop_first().map(Op::CheckStage),
        }
    }

    fn perform(&mut self, op: Op) -> Result<(), EngineError> {
        match op {
            Op::Agenda(AgendaOp::EvaluateCriteria(idx)) => self.evaluate_criteria(idx),
            Op::Agenda(AgendaOp::EvaluateRepetition(idx)) => self.evaluate_repetition(idx),
            Op::Agenda(AgendaOp::Activate(idx)) => self.activate(idx),
            Op::Agenda(AgendaOp::RunHandler(idx)) => self.run_handler(idx),
            Op::Agenda(AgendaOp::Occur(idx)) => {
                if self.items[idx].state == PlanItemState::Active && !self.is_blocked(idx) {
                    self.transition(idx, Transition::Occur)?;
                }
                Ok(())
            }
            Op::CheckStage(idx) => self.check_stage_completion(idx),
        }
    }

    // ── Criteria ────────────────────────────────────────────────────────

    fn evaluate_criteria(&mut self, idx: usize) -> Result<(), EngineError> {
        let item = &self.items[idx];
        if item.state.is_terminal() || self.is_blocked(idx) {
            return Ok(());
        }
        let reset_seq = item.reset_seq;
        let state = item.state;
        let def = self.plan_item_definition(idx)?;

        for sentry_id in &def.exit_criteria {
            let s = self.sentry(&def.id, sentry_id)?;
            if sentry::evaluate(s, reset_seq, &*self)? {
                debug!(
                    case_instance_id = %self.case.id,
                    plan_item = %def.id,
                    sentry = %sentry_id,
                    "exit criterion satisfied"
                );
                return self.terminate_cascade(idx, Transition::Exit);
            }
        }

        if state != PlanItemState::Available {
            return Ok(());
        }
        for sentry_id in &def.entry_criteria {
            let s = self.sentry(&def.id, sentry_id)?;
            if !sentry::evaluate(s, reset_seq, &*self)? {
                return Ok(());
            }
        }
        self.transition(idx, Transition::Enable)
    }

    fn sentry(&self, owner: &str, sentry_id: &str) -> Result<&'a SentryDefinition, EngineError> {
        let definition = self.definition;
        definition.sentry(sentry_id).ok_or_else(|| {
            EngineError::Definition(ModelError::UnknownReference {
                owner: owner.to_string(),
                kind: "sentry",
                reference: sentry_id.to_string(),
            })
        })
    }

    fn evaluate_repetition(&mut self, idx: usize) -> Result<(), EngineError> {
        if self.items[idx].state != PlanItemState::WaitingForRepetition || self.is_blocked(idx) {
            return Ok(());
        }
        let def = self.plan_item_definition(idx)?;
        let holds = match def.repetition.as_ref().and_then(|r| r.condition.as_ref()) {
            Some(condition) => evaluate_condition(condition, &self.case.variables)?,
            None => true,
        };
        if holds {
            self.transition(idx, Transition::Repeat)?;
        }
        Ok(())
    }

    // ── Activation and work ─────────────────────────────────────────────

    fn activate(&mut self, idx: usize) -> Result<(), EngineError> {
        if self.items[idx].state != PlanItemState::Enabled || self.is_blocked(idx) {
            return Ok(());
        }
        let def = self.plan_item_definition(idx)?;
        if Capabilities::starts_automatically(def, self.root == Some(idx)) {
            self.transition(idx, Transition::Start)?;
        }
        Ok(())
    }

    fn run_handler(&mut self, idx: usize) -> Result<(), EngineError> {
        if self.items[idx].state != PlanItemState::Active || self.is_blocked(idx) {
            return Ok(());
        }
        let def = self.plan_item_definition(idx)?;
        let name = match &def.kind {
            PlanItemKind::Task { handler } => handler.clone(),
            _ => return Ok(()),
        };
        let Some(name) = name else {
            return self.transition(idx, Transition::Complete);
        };
        let handler = self
            .services
            .handlers
            .get(&name)
            .ok_or_else(|| EngineError::NotFound {
                kind: "task handler",
                id: name.clone(),
            })?;

        let item = &self.items[idx];
        let invocation = TaskInvocation {
            case_instance_id: self.case.id.clone(),
            plan_item_instance_id: item.id.clone(),
            definition_id: item.definition_id.clone(),
            repetition: item.repetition,
            variables: self.case.variables.clone(),
        };
        match handler.execute(&invocation) {
            Ok(HandlerOutcome::Complete { output }) => {
                self.merge_variables(&output);
                self.transition(idx, Transition::Complete)
            }
            Ok(HandlerOutcome::Wait) => {
                debug!(
                    case_instance_id = %self.case.id,
                    plan_item = %def.id,
                    handler = %name,
                    "task waits for trigger"
                );
                Ok(())
            }
            Err(e) => {
                self.transition(idx, Transition::Fault)?;
                warn!(
                    case_instance_id = %self.case.id,
                    plan_item = %def.id,
                    handler = %name,
                    error = %e,
                    "task handler failed"
                );
                Err(EngineError::WorkFailed {
                    plan_item_instance_id: invocation.plan_item_instance_id,
                    definition_id: invocation.definition_id,
                    message: e.message,
                })
            }
        }
    }

    // ── Transition follow-ups ───────────────────────────────────────────

    pub(crate) fn after_transition(
        &mut self,
        idx: usize,
        transition: Transition,
        to: PlanItemState,
        seq: i64,
    ) -> Result<(), EngineError> {
        let def = self.plan_item_definition(idx)?;
        match transition {
            Transition::Enable => self.enqueue(AgendaOp::Activate(idx)),
            Transition::Start => match &def.kind {
                PlanItemKind::Stage { .. } => {
                    let definition = self.definition;
                    for child in definition.children_of(&def.id) {
                        self.create_instance(
                            child,
                            Some(idx),
                            PlanItemState::Available,
                            1,
                            Some(seq),
                        );
                    }
                    self.completion_checks.insert(idx);
                }
                PlanItemKind::HumanTask {
                    assignee,
                    candidate_groups,
                } => {
                    if let Some(user) = assignee {
                        self.add_task_link(idx, PrincipalKind::User, user, ASSIGNEE)?;
                    }
                    for group in candidate_groups {
                        self.add_task_link(idx, PrincipalKind::Group, group, CANDIDATE)?;
                    }
                }
                PlanItemKind::Task { .. } => self.enqueue(AgendaOp::RunHandler(idx)),
                PlanItemKind::Milestone => self.enqueue(AgendaOp::Occur(idx)),
                PlanItemKind::EventListener => {}
            },
            Transition::Resume => {
                if Capabilities::of(&def.kind).has_children {
                    self.wake_subtree(idx);
                }
                if to == PlanItemState::Enabled {
                    self.enqueue(AgendaOp::Activate(idx));
                }
            }
            Transition::Repeat => {
                self.items[idx].reset_seq = seq;
                self.enqueue(AgendaOp::EvaluateCriteria(idx));
            }
            Transition::Complete | Transition::Occur => self.spawn_successor(idx)?,
            _ => {}
        }

        if to.is_terminal() {
            if Capabilities::of(&def.kind).has_identity_links {
                self.remove_task_links(idx);
            }
            if self.root == Some(idx) {
                let state = match to {
                    PlanItemState::Completed => CaseState::Completed,
                    _ => CaseState::Terminated,
                };
                self.set_case_state(state);
            }
        }
        Ok(())
    }

    /// Re-schedule everything below a stage that just became active again.
    fn wake_subtree(&mut self, idx: usize) {
        for i in self.descendants(idx) {
            match self.items[i].state {
                PlanItemState::Available => self.enqueue(AgendaOp::EvaluateCriteria(i)),
                PlanItemState::Enabled => {
                    self.enqueue(AgendaOp::EvaluateCriteria(i));
                    self.enqueue(AgendaOp::Activate(i));
                }
                PlanItemState::WaitingForRepetition => {
                    self.enqueue(AgendaOp::EvaluateCriteria(i));
                    self.enqueue(AgendaOp::EvaluateRepetition(i));
                }
                PlanItemState::Active => {
                    self.enqueue(AgendaOp::EvaluateCriteria(i));
                    if self.items[i].kind == "stage" {
                        self.completion_checks.insert(i);
                    }
                }
                PlanItemState::Suspended => self.enqueue(AgendaOp::EvaluateCriteria(i)),
                _ => {}
            }
        }
        self.completion_checks.insert(idx);
    }

    /// Queue the next instance of a repeatable item that just finished.
    fn spawn_successor(&mut self, idx: usize) -> Result<(), EngineError> {
        let def = self.plan_item_definition(idx)?;
        let Some(rule) = &def.repetition else {
            return Ok(());
        };
        let Some(parent) = self.items[idx].parent else {
            return Ok(());
        };
        if self.items[parent].state != PlanItemState::Active {
            return Ok(());
        }
        let count = self
            .instances_of(&def.id)
            .iter()
            .filter(|&&i| self.items[i].parent == Some(parent))
            .count();
        if rule
            .max_instance_count
            .is_some_and(|max| count >= max as usize)
        {
            debug!(
                case_instance_id = %self.case.id,
                plan_item = %def.id,
                count,
                "repetition limit reached"
            );
            return Ok(());
        }
        let repetition = self.items[idx].repetition + 1;
        let next = self.create_instance(
            def,
            Some(parent),
            PlanItemState::WaitingForRepetition,
            repetition,
            None,
        );
        self.enqueue(AgendaOp::EvaluateRepetition(next));
        Ok(())
    }

    // ── Termination ─────────────────────────────────────────────────────

    /// Terminate `idx` and its live descendants, children first.
    ///
    /// `transition` is applied to `idx` itself (`exit` or `terminate`);
    /// descendants always get `terminate`.
    pub(crate) fn terminate_cascade(
        &mut self,
        idx: usize,
        transition: Transition,
    ) -> Result<(), EngineError> {
        let mut stack = vec![(idx, false)];
        while let Some((i, expanded)) = stack.pop() {
            if self.items[i].state.is_terminal() {
                continue;
            }
            if expanded {
                let t = if i == idx {
                    transition
                } else {
                    Transition::Terminate
                };
                self.transition(i, t)?;
            } else {
                stack.push((i, true));
                for child in self.children(i) {
                    if !self.items[child].state.is_terminal() {
                        stack.push((child, false));
                    }
                }
            }
        }
        Ok(())
    }

    // ── Stage completion ────────────────────────────────────────────────

    fn check_stage_completion(&mut self, idx: usize) -> Result<(), EngineError> {
        if self.items[idx].state != PlanItemState::Active || self.is_blocked(idx) {
            return Ok(());
        }
        let def = self.plan_item_definition(idx)?;
        let auto_complete = match def.kind {
            PlanItemKind::Stage { auto_complete } => auto_complete,
            _ => return Ok(()),
        };
        if self.stage_can_complete(idx, auto_complete)? {
            self.complete_stage(idx)?;
        }
        Ok(())
    }

    /// Whether the children of the active stage at `idx` allow it to
    /// complete.
    ///
    /// Active or suspended children always block. With `auto_complete`,
    /// children that have not started yet block only when they are the
    /// first instance of a required item; without it, every child has to
    /// be finished. Successors waiting for repetition never block.
    pub(crate) fn stage_can_complete(
        &self,
        idx: usize,
        auto_complete: bool,
    ) -> Result<bool, EngineError> {
        for child in self.children(idx) {
            let item = &self.items[child];
            match item.state {
                PlanItemState::Active | PlanItemState::Suspended => return Ok(false),
                PlanItemState::Available | PlanItemState::Enabled => {
                    if !auto_complete {
                        return Ok(false);
                    }
                    let child_def = self.plan_item_definition(child)?;
                    if child_def.required && item.repetition == 1 {
                        return Ok(false);
                    }
                }
                PlanItemState::WaitingForRepetition
                | PlanItemState::Completed
                | PlanItemState::Terminated
                | PlanItemState::Failed => {}
            }
        }
        let def = self.plan_item_definition(idx)?;
        match &def.completion_condition {
            Some(condition) => evaluate_condition(condition, &self.case.variables),
            None => Ok(true),
        }
    }

    /// Terminate what is left inside the stage, then complete it.
    pub(crate) fn complete_stage(&mut self, idx: usize) -> Result<(), EngineError> {
        for child in self.children(idx) {
            if !self.items[child].state.is_terminal() {
                self.terminate_cascade(child, Transition::Terminate)?;
            }
        }
        self.transition(idx, Transition::Complete)
    }
}

/// Agenda operations plus the deferred stage checks.
#[derive(Debug, Clone, Copy)]
enum Op {
    Agenda(AgendaOp),
    CheckStage(usize),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use casework_model::CaseDefinition;
    use casework_storage::CaseInstanceRecord;
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::context::{LoadedCase, Services};
    use crate::handler::HandlerRegistry;

    fn case_record() -> CaseInstanceRecord {
        CaseInstanceRecord {
            id: "case-1".to_string(),
            case_definition_id: "c:1".to_string(),
            case_definition_key: "c".to_string(),
            business_key: None,
            tenant_id: None,
            state: CaseState::Active,
            version: 1,
            variables: json!({}),
            started_by: None,
            started_at: "2025-01-01T00:00:00.000Z".to_string(),
            last_updated_at: "2025-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn run(
        definition: &CaseDefinition,
        config: &EngineConfig,
    ) -> Result<HashMap<String, PlanItemState>, EngineError> {
        let clock = ManualClock::new(datetime!(2025-01-01 00:00 UTC));
        let handlers = HandlerRegistry::new();
        let services = Services {
            config,
            clock: &clock,
            handlers: &handlers,
        };
        let loaded = LoadedCase {
            case: case_record(),
            is_new: true,
            plan_items: vec![],
            transitions: vec![],
            links: vec![],
        };
        let mut ctx = ExecutionContext::new(definition, loaded, services)?;
        ctx.create_instance(&definition.plan_model, None, PlanItemState::Available, 1, None);
        ctx.run_agenda()?;
        Ok(ctx
            .items
            .iter()
            .map(|i| (format!("{}#{}", i.definition_id, i.repetition), i.state))
            .collect())
    }

    fn chain() -> CaseDefinition {
        CaseDefinition::from_json(&json!({
            "key": "c",
            "plan_model": { "id": "root", "auto_complete": true },
            "plan_items": [
                { "id": "a", "kind": "task", "required": true },
                { "id": "b", "kind": "task", "required": true, "entry_criteria": ["afterA"] },
                { "id": "m", "kind": "milestone", "entry_criteria": ["afterB"] }
            ],
            "sentries": [
                { "id": "afterA", "on_parts": [{ "source": "a", "transition": "complete" }] },
                { "id": "afterB", "on_parts": [{ "source": "b", "transition": "complete" }] }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn chain_runs_to_completion() {
        let states = run(&chain(), &EngineConfig::default()).unwrap();
        assert_eq!(states["a#1"], PlanItemState::Completed);
        assert_eq!(states["b#1"], PlanItemState::Completed);
        assert_eq!(states["m#1"], PlanItemState::Completed);
        assert_eq!(states["root#1"], PlanItemState::Completed);
    }

    #[test]
    fn fifo_and_lifo_agree() {
        let fifo = run(&chain(), &EngineConfig::default()).unwrap();
        let lifo = run(
            &chain(),
            &EngineConfig {
                agenda_order: AgendaOrder::Lifo,
                ..EngineConfig::default()
            },
        )
        .unwrap();
        assert_eq!(fifo, lifo);
    }

    /// One completion satisfies several sentries in the same pass: an exit
    /// racing an entry, and a stage whose exit fires once its children run.
    /// `order` lists the plan items in declaration order.
    fn fan_out(order: &[&str]) -> CaseDefinition {
        let items = json!({
            "a": { "id": "a", "kind": "task" },
            "b": { "id": "b", "kind": "task", "entry_criteria": ["afterA"] },
            "c": { "id": "c", "kind": "human_task", "entry_criteria": ["afterA"], "exit_criteria": ["afterB"] },
            "m": { "id": "m", "kind": "milestone", "entry_criteria": ["afterA"] },
            "s": { "id": "s", "kind": "stage", "entry_criteria": ["afterA"], "exit_criteria": ["reachedM"] },
            "inner": { "id": "inner", "kind": "human_task", "parent": "s" },
            "late": { "id": "late", "kind": "human_task", "entry_criteria": ["cStarted"] }
        });
        let plan_items: Vec<_> = order.iter().map(|id| items[*id].clone()).collect();
        CaseDefinition::from_json(&json!({
            "key": "c",
            "plan_model": { "id": "root" },
            "plan_items": plan_items,
            "sentries": [
                { "id": "afterA", "on_parts": [{ "source": "a", "transition": "complete" }] },
                { "id": "afterB", "on_parts": [{ "source": "b", "transition": "complete" }] },
                { "id": "reachedM", "on_parts": [{ "source": "m", "transition": "occur" }] },
                { "id": "cStarted", "on_parts": [{ "source": "c", "transition": "start" }] }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn fan_out_drains_to_the_same_states_in_any_order() {
        let lifo = EngineConfig {
            agenda_order: AgendaOrder::Lifo,
            ..EngineConfig::default()
        };
        let orders: [&[&str]; 2] = [
            &["a", "b", "c", "m", "s", "inner", "late"],
            &["a", "c", "b", "s", "inner", "m", "late"],
        ];
        let mut outcomes = Vec::new();
        for order in orders {
            outcomes.push(run(&fan_out(order), &EngineConfig::default()).unwrap());
            outcomes.push(run(&fan_out(order), &lifo).unwrap());
        }
        for other in &outcomes[1..] {
            assert_eq!(&outcomes[0], other);
        }

        let states = &outcomes[0];
        assert_eq!(states["b#1"], PlanItemState::Completed);
        assert_eq!(states["c#1"], PlanItemState::Terminated);
        assert_eq!(states["m#1"], PlanItemState::Completed);
        assert_eq!(states["s#1"], PlanItemState::Terminated);
        assert_eq!(states["inner#1"], PlanItemState::Terminated);
        assert_eq!(states["late#1"], PlanItemState::Active);
        assert_eq!(states["root#1"], PlanItemState::Active);
    }

    #[test]
    fn unbounded_repetition_hits_operation_limit() {
        let def = CaseDefinition::from_json(&json!({
            "key": "c",
            "plan_model": { "id": "root" },
            "plan_items": [
                { "id": "loop", "kind": "task", "repetition": {} }
            ]
        }))
        .unwrap();
        let config = EngineConfig {
            max_agenda_operations: 200,
            ..EngineConfig::default()
        };
        let err = run(&def, &config).unwrap_err();
        assert!(matches!(err, EngineError::NoProgress { operations: 200, .. }));
    }

    #[test]
    fn exit_terminates_children_first() {
        let def = CaseDefinition::from_json(&json!({
            "key": "c",
            "plan_model": { "id": "root" },
            "plan_items": [
                { "id": "gate", "kind": "milestone" },
                { "id": "stage", "kind": "stage", "exit_criteria": ["gateReached"] },
                { "id": "inner", "kind": "human_task", "parent": "stage" }
            ],
            "sentries": [
                { "id": "gateReached", "on_parts": [{ "source": "gate", "transition": "occur" }] }
            ]
        }))
        .unwrap();
        let states = run(&def, &EngineConfig::default()).unwrap();
        assert_eq!(states["gate#1"], PlanItemState::Completed);
        assert_eq!(states["stage#1"], PlanItemState::Terminated);
        assert_eq!(states["inner#1"], PlanItemState::Terminated);
        assert_eq!(states["root#1"], PlanItemState::Completed);
    }
}
