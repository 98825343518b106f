//! Working set of one case instance for the duration of one unit of work.
//!
//! Plan item instances live in an arena (`Vec`) addressed by index; ids and
//! definition ids map to indices. Agenda operations carry indices, so the
//! fixpoint loop never chases references through the tree.

use std::collections::{BTreeSet, HashMap, VecDeque};

use casework_model::{CaseDefinition, ModelError, PlanItemDefinition, Transition};
use casework_storage::{
    CaseInstanceRecord, CaseState, IdentityLinkRecord, PlanItemInstanceRecord, TransitionRecord,
};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::capability::Capabilities;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::CaseEvent;
use crate::handler::HandlerRegistry;
use crate::sentry::CaseView;
use crate::state::{next_state, PlanItemState};

/// Collaborators a unit of work borrows from the executor.
#[derive(Clone, Copy)]
pub(crate) struct Services<'a> {
    pub config: &'a EngineConfig,
    pub clock: &'a dyn Clock,
    pub handlers: &'a HandlerRegistry,
}

#[derive(Debug, Clone)]
pub(crate) struct PlanItemInstance {
    pub id: String,
    pub definition_id: String,
    pub stage_instance_id: Option<String>,
    /// Arena index of the parent stage instance.
    pub parent: Option<usize>,
    pub kind: String,
    pub name: Option<String>,
    pub state: PlanItemState,
    pub suspended_from: Option<PlanItemState>,
    pub repetition: u32,
    pub created_seq: i64,
    /// On-part transitions at or before this sequence number are ignored.
    pub reset_seq: i64,
    pub created_at: String,
    pub last_transition_at: String,
    pub ended_at: Option<String>,
    pub dirty: bool,
}

impl PlanItemInstance {
    fn from_record(record: PlanItemInstanceRecord) -> Result<Self, EngineError> {
        let state = parse_state(&record.id, &record.state)?;
        let suspended_from = record
            .suspended_from
            .as_deref()
            .map(|s| parse_state(&record.id, s))
            .transpose()?;
        Ok(Self {
            id: record.id,
            definition_id: record.definition_id,
            stage_instance_id: record.stage_instance_id,
            parent: None,
            kind: record.kind,
            name: record.name,
            state,
            suspended_from,
            repetition: record.repetition,
            created_seq: record.created_seq,
            reset_seq: record.reset_seq,
            created_at: record.created_at,
            last_transition_at: record.last_transition_at,
            ended_at: record.ended_at,
            dirty: false,
        })
    }

    fn to_record(&self, case_instance_id: &str) -> PlanItemInstanceRecord {
        PlanItemInstanceRecord {
            id: self.id.clone(),
            case_instance_id: case_instance_id.to_string(),
            definition_id: self.definition_id.clone(),
            stage_instance_id: self.stage_instance_id.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            state: self.state.as_str().to_string(),
            suspended_from: self.suspended_from.map(|s| s.as_str().to_string()),
            repetition: self.repetition,
            created_seq: self.created_seq,
            reset_seq: self.reset_seq,
            created_at: self.created_at.clone(),
            last_transition_at: self.last_transition_at.clone(),
            ended_at: self.ended_at.clone(),
        }
    }
}

fn parse_state(id: &str, state: &str) -> Result<PlanItemState, EngineError> {
    PlanItemState::parse(state).ok_or_else(|| {
        EngineError::illegal_state(format!(
            "plan item instance {} has unknown state '{}'",
            id, state
        ))
    })
}

/// One step of the fixpoint loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AgendaOp {
    EvaluateCriteria(usize),
    EvaluateRepetition(usize),
    Activate(usize),
    RunHandler(usize),
    Occur(usize),
}

/// Number of agenda phases.
pub(crate) const PHASES: usize = 3;

impl AgendaOp {
    /// Lower phases drain first: criteria, then automatic starts, then work
    /// that completes items.
    pub(crate) fn phase(self) -> usize {
        match self {
            AgendaOp::EvaluateCriteria(_) | AgendaOp::EvaluateRepetition(_) => 0,
            AgendaOp::Activate(_) => 1,
            AgendaOp::RunHandler(_) | AgendaOp::Occur(_) => 2,
        }
    }
}

/// Everything a committed unit of work writes.
#[derive(Debug)]
pub(crate) struct Changes {
    pub case: CaseInstanceRecord,
    pub base_version: i64,
    pub is_new: bool,
    pub plan_items: Vec<PlanItemInstanceRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub added_links: Vec<IdentityLinkRecord>,
    pub removed_links: Vec<IdentityLinkRecord>,
    pub events: Vec<CaseEvent>,
}

/// Runtime state loaded for a command.
#[derive(Debug)]
pub(crate) struct LoadedCase {
    pub case: CaseInstanceRecord,
    pub is_new: bool,
    pub plan_items: Vec<PlanItemInstanceRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub links: Vec<IdentityLinkRecord>,
}

pub(crate) struct ExecutionContext<'a> {
    pub definition: &'a CaseDefinition,
    pub case: CaseInstanceRecord,
    base_version: i64,
    is_new: bool,

    pub items: Vec<PlanItemInstance>,
    by_id: HashMap<String, usize>,
    by_definition: HashMap<String, Vec<usize>>,
    pub root: Option<usize>,

    transitions: Vec<TransitionRecord>,
    persisted_transitions: usize,
    latest: HashMap<(String, Transition), i64>,
    last_seq: i64,

    pub links: Vec<IdentityLinkRecord>,
    pub added_links: Vec<IdentityLinkRecord>,
    pub removed_links: Vec<IdentityLinkRecord>,

    /// One queue per phase, see `AgendaOp::phase`.
    pub agenda: [VecDeque<AgendaOp>; PHASES],
    /// Stage completion checks run only once the agenda is drained.
    pub completion_checks: BTreeSet<usize>,
    pub operations: usize,

    pub events: Vec<CaseEvent>,
    pub services: Services<'a>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        definition: &'a CaseDefinition,
        loaded: LoadedCase,
        services: Services<'a>,
    ) -> Result<Self, EngineError> {
        let LoadedCase {
            case,
            is_new,
            mut plan_items,
            transitions,
            links,
        } = loaded;

        plan_items.sort_by_key(|p| p.created_seq);
        let mut items = plan_items
            .into_iter()
            .map(PlanItemInstance::from_record)
            .collect::<Result<Vec<_>, _>>()?;

        let by_id: HashMap<String, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();
        let mut by_definition: HashMap<String, Vec<usize>> = HashMap::new();
        let mut root = None;
        for (i, item) in items.iter_mut().enumerate() {
            item.parent = item
                .stage_instance_id
                .as_ref()
                .and_then(|sid| by_id.get(sid).copied());
            if item.stage_instance_id.is_none() {
                root = Some(i);
            }
            by_definition
                .entry(item.definition_id.clone())
                .or_default()
                .push(i);
        }

        let mut latest = HashMap::new();
        let mut last_seq = 0;
        for t in &transitions {
            if let Some(transition) = Transition::parse(&t.transition) {
                let seq = latest.entry((t.definition_id.clone(), transition)).or_insert(t.seq);
                *seq = (*seq).max(t.seq);
            }
            last_seq = last_seq.max(t.seq);
        }

        Ok(Self {
            definition,
            base_version: case.version,
            case,
            is_new,
            items,
            by_id,
            by_definition,
            root,
            persisted_transitions: transitions.len(),
            transitions,
            latest,
            last_seq,
            links,
            added_links: Vec::new(),
            removed_links: Vec::new(),
            agenda: Default::default(),
            completion_checks: BTreeSet::new(),
            operations: 0,
            events: Vec::new(),
            services,
        })
    }

    pub fn into_changes(mut self) -> Changes {
        self.case.last_updated_at = self.now();
        let case_instance_id = self.case.id.clone();
        let plan_items = self
            .items
            .iter()
            .filter(|i| i.dirty)
            .map(|i| i.to_record(&case_instance_id))
            .collect();
        let transitions = self.transitions.split_off(self.persisted_transitions);
        Changes {
            case: self.case,
            base_version: self.base_version,
            is_new: self.is_new,
            plan_items,
            transitions,
            added_links: self.added_links,
            removed_links: self.removed_links,
            events: self.events,
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────────

    pub fn now(&self) -> String {
        self.services.clock.now()
    }

    pub fn case_instance_id(&self) -> &str {
        &self.case.id
    }

    pub fn index_of(&self, plan_item_instance_id: &str) -> Result<usize, EngineError> {
        self.by_id
            .get(plan_item_instance_id)
            .copied()
            .ok_or_else(|| EngineError::NotFound {
                kind: "plan item instance",
                id: plan_item_instance_id.to_string(),
            })
    }

    pub fn root_index(&self) -> Result<usize, EngineError> {
        self.root.ok_or_else(|| {
            EngineError::illegal_state(format!(
                "case instance {} has no plan model instance",
                self.case.id
            ))
        })
    }

    /// Definition of the plan item behind the instance at `idx`.
    pub fn plan_item_definition(&self, idx: usize) -> Result<&'a PlanItemDefinition, EngineError> {
        let definition = self.definition;
        let id = &self.items[idx].definition_id;
        definition.plan_item(id).ok_or_else(|| {
            EngineError::Definition(ModelError::UnknownReference {
                owner: self.items[idx].id.clone(),
                kind: "plan item",
                reference: id.clone(),
            })
        })
    }

    pub fn instances_of(&self, definition_id: &str) -> &[usize] {
        self.by_definition
            .get(definition_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn children(&self, idx: usize) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.parent == Some(idx))
            .map(|(i, _)| i)
            .collect()
    }

    /// Every instance below `idx` in the stage tree, parents before children.
    pub fn descendants(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = self.children(idx);
        stack.reverse();
        while let Some(i) = stack.pop() {
            out.push(i);
            let mut children = self.children(i);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// True while any enclosing stage instance is not active.
    pub fn is_blocked(&self, idx: usize) -> bool {
        let mut current = self.items[idx].parent;
        while let Some(p) = current {
            if self.items[p].state != PlanItemState::Active {
                return true;
            }
            current = self.items[p].parent;
        }
        false
    }

    pub fn ensure_unblocked(&self, idx: usize) -> Result<(), EngineError> {
        if self.is_blocked(idx) {
            return Err(EngineError::illegal_state(format!(
                "plan item instance {} belongs to a stage that is not active",
                self.items[idx].id
            )));
        }
        Ok(())
    }

    // ── Mutations ───────────────────────────────────────────────────────

    pub fn enqueue(&mut self, op: AgendaOp) {
        self.agenda[op.phase()].push_back(op);
    }

    /// Create a plan item instance in `state` (`Available` or
    /// `WaitingForRepetition`) and record its `create` transition.
    pub fn create_instance(
        &mut self,
        definition: &PlanItemDefinition,
        parent: Option<usize>,
        state: PlanItemState,
        repetition: u32,
        reset_seq: Option<i64>,
    ) -> usize {
        let at = self.now();
        let idx = self.items.len();
        let id = uuid::Uuid::new_v4().to_string();
        let stage_instance_id = parent.map(|p| self.items[p].id.clone());
        self.items.push(PlanItemInstance {
            id: id.clone(),
            definition_id: definition.id.clone(),
            stage_instance_id,
            parent,
            kind: definition.kind.name().to_string(),
            name: definition.name.clone(),
            state,
            suspended_from: None,
            repetition,
            created_seq: 0,
            reset_seq: 0,
            created_at: at.clone(),
            last_transition_at: at.clone(),
            ended_at: None,
            dirty: true,
        });
        self.by_id.insert(id.clone(), idx);
        self.by_definition
            .entry(definition.id.clone())
            .or_default()
            .push(idx);
        if parent.is_none() {
            self.root = Some(idx);
        }

        let item = &self.items[idx];
        self.events.push(CaseEvent::PlanItemCreated {
            case_instance_id: self.case.id.clone(),
            plan_item_instance_id: id,
            definition_id: definition.id.clone(),
            stage_instance_id: item.stage_instance_id.clone(),
            kind: item.kind.clone(),
            name: item.name.clone(),
            repetition,
            state,
            at: at.clone(),
        });

        let seq = self.record_transition(idx, Transition::Create, None, state, &at);
        let item = &mut self.items[idx];
        item.created_seq = seq;
        item.reset_seq = reset_seq.unwrap_or(seq);
        debug!(
            case_instance_id = %self.case.id,
            plan_item = %definition.id,
            repetition,
            state = %state,
            "created plan item instance"
        );

        if state == PlanItemState::Available {
            self.enqueue(AgendaOp::EvaluateCriteria(idx));
        }
        idx
    }

    /// Apply `transition` to the instance at `idx` and schedule its
    /// consequences.
    pub fn transition(&mut self, idx: usize, transition: Transition) -> Result<(), EngineError> {
        let from = self.items[idx].state;
        let to = next_state(transition, from, self.items[idx].suspended_from)
            .map_err(|e| match e {
                EngineError::IllegalState(message) => EngineError::IllegalState(format!(
                    "plan item instance {} ({}): {}",
                    self.items[idx].id, self.items[idx].definition_id, message
                )),
                other => other,
            })?;
        let at = self.now();

        let item = &mut self.items[idx];
        match transition {
            Transition::Suspend => item.suspended_from = Some(from),
            Transition::Resume => item.suspended_from = None,
            _ => {}
        }
        item.state = to;
        item.last_transition_at = at.clone();
        if to.is_terminal() {
            item.ended_at = Some(at.clone());
        }
        item.dirty = true;

        let seq = self.record_transition(idx, transition, Some(from), to, &at);
        let item = &self.items[idx];
        self.events.push(CaseEvent::PlanItemTransitioned {
            case_instance_id: self.case.id.clone(),
            plan_item_instance_id: item.id.clone(),
            definition_id: item.definition_id.clone(),
            transition,
            from,
            to,
            at,
        });
        debug!(
            case_instance_id = %self.case.id,
            plan_item = %item.definition_id,
            plan_item_instance_id = %item.id,
            %transition,
            %from,
            %to,
            seq,
            "applied transition"
        );

        self.after_transition(idx, transition, to, seq)
    }

    /// Append to the transition history and wake every item whose sentries
    /// listen to this definition, plus the enclosing stage.
    fn record_transition(
        &mut self,
        idx: usize,
        transition: Transition,
        from: Option<PlanItemState>,
        to: PlanItemState,
        at: &str,
    ) -> i64 {
        self.last_seq += 1;
        let seq = self.last_seq;
        let item = &self.items[idx];
        self.transitions.push(TransitionRecord {
            case_instance_id: self.case.id.clone(),
            seq,
            plan_item_instance_id: item.id.clone(),
            definition_id: item.definition_id.clone(),
            transition: transition.as_str().to_string(),
            from_state: from.map(|s| s.as_str().to_string()),
            to_state: to.as_str().to_string(),
            occurred_at: at.to_string(),
        });
        self.latest
            .insert((item.definition_id.clone(), transition), seq);

        let definition = self.definition;
        let source = item.definition_id.clone();
        let parent = item.parent;
        for dependent in definition.dependents_of(&source) {
            let live: Vec<usize> = self
                .instances_of(&dependent.id)
                .iter()
                .copied()
                .filter(|&i| !self.items[i].state.is_terminal())
                .collect();
            for i in live {
                self.enqueue(AgendaOp::EvaluateCriteria(i));
            }
        }
        if let Some(p) = parent {
            self.completion_checks.insert(p);
        }
        seq
    }

    /// Merge `values` into the case variables and re-evaluate everything
    /// that depends on data.
    pub fn merge_variables(&mut self, values: &Map<String, Value>) {
        if values.is_empty() {
            return;
        }
        if !self.case.variables.is_object() {
            self.case.variables = Value::Object(Map::new());
        }
        if let Value::Object(vars) = &mut self.case.variables {
            for (k, v) in values {
                vars.insert(k.clone(), v.clone());
            }
        }
        let at = self.now();
        self.events.push(CaseEvent::CaseUpdated {
            case_instance_id: self.case.id.clone(),
            at,
        });
        debug!(case_instance_id = %self.case.id, count = values.len(), "merged case variables");

        let definition = self.definition;
        for dependent in definition.data_dependents() {
            let live: Vec<usize> = self
                .instances_of(&dependent.id)
                .iter()
                .copied()
                .filter(|&i| !self.items[i].state.is_terminal())
                .collect();
            for i in live {
                self.enqueue(AgendaOp::EvaluateCriteria(i));
                if Capabilities::of(&dependent.kind).has_children {
                    self.completion_checks.insert(i);
                }
            }
        }
        let waiting: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.state == PlanItemState::WaitingForRepetition)
            .map(|(i, _)| i)
            .collect();
        for i in waiting {
            self.enqueue(AgendaOp::EvaluateRepetition(i));
        }
    }

    pub fn set_case_state(&mut self, state: CaseState) {
        if self.case.state == state {
            return;
        }
        self.case.state = state;
        let at = self.now();
        if state.is_ended() {
            self.events.push(CaseEvent::CaseEnded {
                case_instance_id: self.case.id.clone(),
                state,
                ended_at: at,
            });
            info!(case_instance_id = %self.case.id, %state, "case instance ended");
        } else {
            self.events.push(CaseEvent::CaseStateChanged {
                case_instance_id: self.case.id.clone(),
                state,
                at,
            });
        }
    }
}

impl CaseView for ExecutionContext<'_> {
    fn last_transition_seq(&self, definition_id: &str, transition: Transition) -> Option<i64> {
        self.latest
            .get(&(definition_id.to_string(), transition))
            .copied()
    }

    fn variables(&self) -> &Value {
        &self.case.variables
    }
}
