//! Record constructors with sensible defaults.

use crate::record::{
    CaseInstanceRecord, CaseState, HistoricCaseInstanceRecord, HistoricPlanItemInstanceRecord,
    IdentityLinkRecord, LinkScope, PlanItemInstanceRecord, PrincipalKind, TransitionRecord,
};

pub(crate) fn case_instance(id: &str) -> CaseInstanceRecord {
    CaseInstanceRecord {
        id: id.to_string(),
        case_definition_id: "claim:1".to_string(),
        case_definition_key: "claim".to_string(),
        business_key: None,
        tenant_id: None,
        state: CaseState::Active,
        version: 0,
        variables: serde_json::json!({}),
        started_by: None,
        started_at: "2025-01-01T00:00:00Z".to_string(),
        last_updated_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

pub(crate) fn plan_item(id: &str, case_id: &str) -> PlanItemInstanceRecord {
    PlanItemInstanceRecord {
        id: id.to_string(),
        case_instance_id: case_id.to_string(),
        definition_id: "review".to_string(),
        stage_instance_id: None,
        kind: "human_task".to_string(),
        name: None,
        state: "active".to_string(),
        suspended_from: None,
        repetition: 1,
        created_seq: 1,
        reset_seq: 0,
        created_at: "2025-01-01T00:00:00Z".to_string(),
        last_transition_at: "2025-01-01T00:00:00Z".to_string(),
        ended_at: None,
    }
}

pub(crate) fn transition(case_id: &str, seq: i64, plan_item_id: &str) -> TransitionRecord {
    TransitionRecord {
        case_instance_id: case_id.to_string(),
        seq,
        plan_item_instance_id: plan_item_id.to_string(),
        definition_id: "review".to_string(),
        transition: "create".to_string(),
        from_state: None,
        to_state: "available".to_string(),
        occurred_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

pub(crate) fn user_link(id: &str, case_id: &str, user: &str) -> IdentityLinkRecord {
    IdentityLinkRecord {
        id: id.to_string(),
        case_instance_id: case_id.to_string(),
        scope: LinkScope::Case,
        scope_id: case_id.to_string(),
        principal_kind: PrincipalKind::User,
        principal_id: user.to_string(),
        link_type: "participant".to_string(),
        created_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

pub(crate) fn group_link(id: &str, case_id: &str, group: &str) -> IdentityLinkRecord {
    IdentityLinkRecord {
        principal_kind: PrincipalKind::Group,
        principal_id: group.to_string(),
        ..user_link(id, case_id, group)
    }
}

pub(crate) fn historic_case(id: &str) -> HistoricCaseInstanceRecord {
    let c = case_instance(id);
    HistoricCaseInstanceRecord {
        id: c.id,
        case_definition_id: c.case_definition_id,
        case_definition_key: c.case_definition_key,
        business_key: c.business_key,
        tenant_id: c.tenant_id,
        state: c.state,
        started_by: c.started_by,
        started_at: c.started_at,
        last_updated_at: c.last_updated_at,
        ended_at: None,
    }
}

pub(crate) fn historic_plan_item(id: &str, case_id: &str) -> HistoricPlanItemInstanceRecord {
    let p = plan_item(id, case_id);
    HistoricPlanItemInstanceRecord {
        id: p.id,
        case_instance_id: p.case_instance_id,
        definition_id: p.definition_id,
        stage_instance_id: p.stage_instance_id,
        kind: p.kind,
        name: p.name,
        state: p.state,
        repetition: p.repetition,
        created_at: p.created_at.clone(),
        last_transition_at: p.last_transition_at,
        enabled_at: None,
        activated_at: Some(p.created_at),
        completed_at: None,
        occurred_at: None,
        terminated_at: None,
        exited_at: None,
        failed_at: None,
        ended_at: None,
    }
}
