//! Typed structs for case plan model definitions.
//!
//! Definitions are immutable once parsed. Plan items reference their
//! parent stage and their sentries by id; the engine resolves those ids
//! through the lookup helpers on [`CaseDefinition`].

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Transitions ─────────────────────────────────────────────────────

/// A named plan item transition ("standard event").
///
/// On-parts reference transitions by these names, and the runtime
/// transition history records them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Create,
    Enable,
    Start,
    Complete,
    Occur,
    Terminate,
    Exit,
    Fault,
    Suspend,
    Resume,
    Repeat,
}

impl Transition {
    pub const ALL: [Transition; 11] = [
        Transition::Create,
        Transition::Enable,
        Transition::Start,
        Transition::Complete,
        Transition::Occur,
        Transition::Terminate,
        Transition::Exit,
        Transition::Fault,
        Transition::Suspend,
        Transition::Resume,
        Transition::Repeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Create => "create",
            Transition::Enable => "enable",
            Transition::Start => "start",
            Transition::Complete => "complete",
            Transition::Occur => "occur",
            Transition::Terminate => "terminate",
            Transition::Exit => "exit",
            Transition::Fault => "fault",
            Transition::Suspend => "suspend",
            Transition::Resume => "resume",
            Transition::Repeat => "repeat",
        }
    }

    pub fn parse(name: &str) -> Option<Transition> {
        Transition::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Expressions ─────────────────────────────────────────────────────

/// Comparison operator inside an [`Expression::Compare`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn parse(op: &str) -> Option<CompareOp> {
        match op {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }
}

/// Boolean data condition over case variables.
///
/// Used for sentry if-parts, repetition conditions and stage completion
/// conditions. Variable references accept dotted paths into JSON objects
/// (`"order.total"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Reference to a case variable.
    Var(String),
    /// Literal JSON value.
    Literal(serde_json::Value),
    /// True when the variable is present and not null.
    Exists(String),
    Compare {
        left: Box<Expression>,
        op: CompareOp,
        right: Box<Expression>,
    },
    And {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },
}

// ── Plan items ──────────────────────────────────────────────────────

/// Kind-specific data of a plan item definition.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanItemKind {
    Stage {
        /// Complete as soon as all required children are done.
        auto_complete: bool,
    },
    HumanTask {
        assignee: Option<String>,
        candidate_groups: Vec<String>,
    },
    /// Automatic task executed by a registered handler.
    Task { handler: Option<String> },
    Milestone,
    EventListener,
}

impl PlanItemKind {
    pub fn name(&self) -> &'static str {
        match self {
            PlanItemKind::Stage { .. } => "stage",
            PlanItemKind::HumanTask { .. } => "human_task",
            PlanItemKind::Task { .. } => "task",
            PlanItemKind::Milestone => "milestone",
            PlanItemKind::EventListener => "event_listener",
        }
    }

    pub fn is_stage(&self) -> bool {
        matches!(self, PlanItemKind::Stage { .. })
    }
}

/// Repetition rule of a repeatable plan item.
#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionRule {
    /// Repeat only while this condition holds. None = always.
    pub condition: Option<Expression>,
    /// Upper bound on instances created for one parent stage instance.
    pub max_instance_count: Option<u32>,
}

/// A plan item definition: one node in the plan model tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItemDefinition {
    pub id: String,
    pub name: Option<String>,
    pub kind: PlanItemKind,
    /// Parent stage id. None only for the root plan model.
    pub parent: Option<String>,
    /// Sentry ids; all must be satisfied to enable the item.
    pub entry_criteria: Vec<String>,
    /// Sentry ids; any satisfied sentry exits the item.
    pub exit_criteria: Vec<String>,
    /// Required items must finish before their stage can auto-complete.
    pub required: bool,
    /// Enabled items wait for an explicit start instead of activating.
    pub manual_activation: bool,
    pub repetition: Option<RepetitionRule>,
    /// Extra data condition a stage must satisfy to complete.
    pub completion_condition: Option<Expression>,
}

impl PlanItemDefinition {
    pub fn is_repeatable(&self) -> bool {
        self.repetition.is_some()
    }

    pub fn is_stage(&self) -> bool {
        self.kind.is_stage()
    }
}

// ── Sentries ────────────────────────────────────────────────────────

/// On-part: satisfied once the source plan item goes through `transition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnPart {
    pub source: String,
    pub transition: Transition,
}

/// Sentry: conjunction of on-parts plus an optional if-part.
#[derive(Debug, Clone, PartialEq)]
pub struct SentryDefinition {
    pub id: String,
    pub name: Option<String>,
    pub on_parts: Vec<OnPart>,
    pub if_part: Option<Expression>,
}

impl SentryDefinition {
    /// A sentry without any part can never fire.
    pub fn has_parts(&self) -> bool {
        !self.on_parts.is_empty() || self.if_part.is_some()
    }

    pub fn listens_to(&self, source: &str) -> bool {
        self.on_parts.iter().any(|p| p.source == source)
    }
}

// ── Case definition ─────────────────────────────────────────────────

/// An immutable, validated case definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseDefinition {
    /// Deployment-unique id (`key:version`, tenant-prefixed when scoped).
    pub id: String,
    pub key: String,
    pub name: Option<String>,
    pub version: u32,
    pub tenant_id: Option<String>,
    /// Root stage of the plan model.
    pub plan_model: PlanItemDefinition,
    /// All plan items below the root, in declaration order.
    pub plan_items: Vec<PlanItemDefinition>,
    pub sentries: Vec<SentryDefinition>,
}

impl CaseDefinition {
    /// Build the deployment id for a key/version/tenant triple.
    pub fn make_id(key: &str, version: u32, tenant_id: Option<&str>) -> String {
        match tenant_id {
            Some(tenant) => format!("{}:{}:{}", tenant, key, version),
            None => format!("{}:{}", key, version),
        }
    }

    /// Iterate the root followed by every nested plan item.
    pub fn all_plan_items(&self) -> impl Iterator<Item = &PlanItemDefinition> {
        std::iter::once(&self.plan_model).chain(self.plan_items.iter())
    }

    pub fn plan_item(&self, id: &str) -> Option<&PlanItemDefinition> {
        self.all_plan_items().find(|p| p.id == id)
    }

    pub fn sentry(&self, id: &str) -> Option<&SentryDefinition> {
        self.sentries.iter().find(|s| s.id == id)
    }

    /// Direct children of a stage, in declaration order.
    pub fn children_of<'a>(
        &'a self,
        stage_id: &'a str,
    ) -> impl Iterator<Item = &'a PlanItemDefinition> + 'a {
        self.plan_items
            .iter()
            .filter(move |p| p.parent.as_deref() == Some(stage_id))
    }

    /// Plan items owning an entry or exit sentry with an on-part on `source`.
    pub fn dependents_of(&self, source: &str) -> Vec<&PlanItemDefinition> {
        self.all_plan_items()
            .filter(|item| {
                item.entry_criteria
                    .iter()
                    .chain(item.exit_criteria.iter())
                    .filter_map(|sid| self.sentry(sid))
                    .any(|s| s.listens_to(source))
            })
            .collect()
    }

    /// Plan items whose criteria include a sentry with an if-part.
    ///
    /// These have to be re-evaluated whenever case variables change.
    pub fn data_dependents(&self) -> Vec<&PlanItemDefinition> {
        self.all_plan_items()
            .filter(|item| {
                item.entry_criteria
                    .iter()
                    .chain(item.exit_criteria.iter())
                    .filter_map(|sid| self.sentry(sid))
                    .any(|s| s.if_part.is_some())
                    || item.completion_condition.is_some()
            })
            .collect()
    }
}
