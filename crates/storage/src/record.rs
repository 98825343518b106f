use std::fmt;

use serde::{Deserialize, Serialize};

// ── Shared vocabulary ────────────────────────────────────────────────────────

/// Lifecycle state of a case instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Active,
    Suspended,
    Completed,
    Terminated,
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::Active => "active",
            CaseState::Suspended => "suspended",
            CaseState::Completed => "completed",
            CaseState::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<CaseState> {
        match s {
            "active" => Some(CaseState::Active),
            "suspended" => Some(CaseState::Suspended),
            "completed" => Some(CaseState::Completed),
            "terminated" => Some(CaseState::Terminated),
            _ => None,
        }
    }

    /// Completed and terminated cases have ended; their runtime records are gone.
    pub fn is_ended(&self) -> bool {
        matches!(self, CaseState::Completed | CaseState::Terminated)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an identity link names a user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Group,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Group => "group",
        }
    }
}

/// What an identity link is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkScope {
    /// The case instance itself; `scope_id` is the case instance id.
    Case,
    /// A plan item instance (human task); `scope_id` is its id.
    Task,
}

// ── Runtime records ──────────────────────────────────────────────────────────

/// A case instance as stored in the runtime tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInstanceRecord {
    pub id: String,
    pub case_definition_id: String,
    pub case_definition_key: String,
    pub business_key: Option<String>,
    pub tenant_id: Option<String>,
    pub state: CaseState,
    /// OCC version, incremented by every committed unit of work.
    pub version: i64,
    /// Case variables as a JSON object.
    pub variables: serde_json::Value,
    pub started_by: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub started_at: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub last_updated_at: String,
}

/// A plan item instance bound to one plan item definition of a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItemInstanceRecord {
    pub id: String,
    pub case_instance_id: String,
    pub definition_id: String,
    /// Owning stage instance. None for the plan model root.
    pub stage_instance_id: Option<String>,
    /// Plan item kind name (`stage`, `human_task`, `task`, ...).
    pub kind: String,
    pub name: Option<String>,
    pub state: String,
    /// State to return to on resume while suspended.
    pub suspended_from: Option<String>,
    /// Repetition counter, starting at 1.
    pub repetition: u32,
    /// Sequence number of the instance's `create` transition.
    pub created_seq: i64,
    /// Transition sequence number after which on-parts count for this instance.
    pub reset_seq: i64,
    pub created_at: String,
    pub last_transition_at: String,
    pub ended_at: Option<String>,
}

/// One applied plan item transition, in case-wide sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub case_instance_id: String,
    /// Case-wide sequence number, strictly increasing from 1.
    pub seq: i64,
    pub plan_item_instance_id: String,
    pub definition_id: String,
    pub transition: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub occurred_at: String,
}

/// A live identity link. Unique per (scope id, principal kind, principal id, link type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityLinkRecord {
    pub id: String,
    pub case_instance_id: String,
    pub scope: LinkScope,
    pub scope_id: String,
    pub principal_kind: PrincipalKind,
    pub principal_id: String,
    pub link_type: String,
    pub created_at: String,
}

impl IdentityLinkRecord {
    pub fn same_key(&self, other: &IdentityLinkRecord) -> bool {
        self.scope_id == other.scope_id
            && self.principal_kind == other.principal_kind
            && self.principal_id == other.principal_id
            && self.link_type == other.link_type
    }
}

// ── Historic records ─────────────────────────────────────────────────────────

/// Mirror of a case instance. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricCaseInstanceRecord {
    pub id: String,
    pub case_definition_id: String,
    pub case_definition_key: String,
    pub business_key: Option<String>,
    pub tenant_id: Option<String>,
    pub state: CaseState,
    pub started_by: Option<String>,
    pub started_at: String,
    pub last_updated_at: String,
    /// Set once the case completed or terminated.
    pub ended_at: Option<String>,
}

impl HistoricCaseInstanceRecord {
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Mirror of a plan item instance with per-transition timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricPlanItemInstanceRecord {
    pub id: String,
    pub case_instance_id: String,
    pub definition_id: String,
    pub stage_instance_id: Option<String>,
    pub kind: String,
    pub name: Option<String>,
    pub state: String,
    pub repetition: u32,
    pub created_at: String,
    pub last_transition_at: String,
    pub enabled_at: Option<String>,
    pub activated_at: Option<String>,
    pub completed_at: Option<String>,
    pub occurred_at: Option<String>,
    pub terminated_at: Option<String>,
    pub exited_at: Option<String>,
    pub failed_at: Option<String>,
    pub ended_at: Option<String>,
}

/// Mirror of an identity link. Survives removal of the live link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricIdentityLinkRecord {
    pub id: String,
    pub case_instance_id: String,
    pub scope: LinkScope,
    pub scope_id: String,
    pub principal_kind: PrincipalKind,
    pub principal_id: String,
    pub link_type: String,
    pub created_at: String,
}

impl HistoricIdentityLinkRecord {
    /// Idempotency key: (scope id, principal kind, principal id, link type).
    pub fn same_key(&self, other: &HistoricIdentityLinkRecord) -> bool {
        self.scope_id == other.scope_id
            && self.principal_kind == other.principal_kind
            && self.principal_id == other.principal_id
            && self.link_type == other.link_type
    }
}

impl From<&IdentityLinkRecord> for HistoricIdentityLinkRecord {
    fn from(link: &IdentityLinkRecord) -> Self {
        Self {
            id: link.id.clone(),
            case_instance_id: link.case_instance_id.clone(),
            scope: link.scope,
            scope_id: link.scope_id.clone(),
            principal_kind: link.principal_kind,
            principal_id: link.principal_id.clone(),
            link_type: link.link_type.clone(),
            created_at: link.created_at.clone(),
        }
    }
}
