//! Entry and exit criteria, stage completion and repetition.

mod common;

use casework_engine::{Command, EngineError, PlanItemState};
use serde_json::{json, Map};

use common::harness;

#[tokio::test]
async fn exit_criterion_terminates_stage_and_children() {
    let definition = json!({
        "key": "intake",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "intake", "kind": "stage", "exit_criteria": ["cancelled"] },
            { "id": "collect", "kind": "human_task", "parent": "intake" },
            { "id": "cancel", "kind": "event_listener" }
        ],
        "sentries": [
            { "id": "cancelled", "on_parts": [{ "source": "cancel", "transition": "occur" }] }
        ]
    });
    let h = harness(&[definition]);
    let case_id = h.start("intake", None).await;
    assert_eq!(h.state_of(&case_id, "collect").await, PlanItemState::Active);
    assert_eq!(h.state_of(&case_id, "cancel").await, PlanItemState::Active);

    let cancel = h.item(&case_id, "cancel").await;
    h.executor
        .execute(Command::TriggerPlanItem {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: cancel.id,
        })
        .await
        .unwrap();

    let items = h
        .executor
        .historic_plan_item_instance_query()
        .case_instance_id(&case_id)
        .list()
        .await
        .unwrap();
    let intake = items.iter().find(|i| i.definition_id == "intake").unwrap();
    let collect = items.iter().find(|i| i.definition_id == "collect").unwrap();
    assert_eq!(intake.state, "terminated");
    assert!(intake.exited_at.is_some());
    assert_eq!(collect.state, "terminated");
    assert!(collect.terminated_at.is_some());
    assert!(collect.ended_at <= intake.ended_at);
}

#[tokio::test]
async fn entry_needs_every_on_part() {
    let definition = json!({
        "key": "pair",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "a", "kind": "human_task" },
            { "id": "b", "kind": "human_task" },
            { "id": "both", "kind": "milestone", "entry_criteria": ["bothDone"] }
        ],
        "sentries": [
            { "id": "bothDone", "on_parts": [
                { "source": "a", "transition": "complete" },
                { "source": "b", "transition": "complete" }
            ] }
        ]
    });
    let h = harness(&[definition]);
    let case_id = h.start("pair", None).await;

    h.complete(&case_id, "a", json!({})).await;
    assert_eq!(h.state_of(&case_id, "both").await, PlanItemState::Available);

    h.complete(&case_id, "b", json!({})).await;
    let both = h
        .executor
        .historic_plan_item_instance_query()
        .case_instance_id(&case_id)
        .definition_id("both")
        .state(PlanItemState::Completed)
        .count()
        .await
        .unwrap();
    assert_eq!(both, 1);
}

#[tokio::test]
async fn auto_complete_stage_skips_optional_children() {
    let definition = json!({
        "key": "audit",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "review", "kind": "stage", "auto_complete": true },
            { "id": "primary", "kind": "human_task", "parent": "review", "required": true },
            { "id": "optional", "kind": "human_task", "parent": "review", "manual_activation": true },
            { "id": "wrapUp", "kind": "human_task", "entry_criteria": ["reviewDone"] }
        ],
        "sentries": [
            { "id": "reviewDone", "on_parts": [{ "source": "review", "transition": "complete" }] }
        ]
    });
    let h = harness(&[definition]);
    let case_id = h.start("audit", None).await;
    assert_eq!(h.state_of(&case_id, "optional").await, PlanItemState::Enabled);

    h.complete(&case_id, "primary", json!({})).await;
    assert_eq!(h.state_of(&case_id, "review").await, PlanItemState::Completed);
    assert_eq!(h.state_of(&case_id, "optional").await, PlanItemState::Terminated);
    assert_eq!(h.state_of(&case_id, "wrapUp").await, PlanItemState::Active);
}

#[tokio::test]
async fn complete_stage_respects_required_children() {
    let definition = json!({
        "key": "work",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "work", "kind": "stage" },
            { "id": "must", "kind": "human_task", "parent": "work", "required": true, "manual_activation": true },
            { "id": "may", "kind": "human_task", "parent": "work", "manual_activation": true },
            { "id": "hold", "kind": "human_task" }
        ]
    });
    let h = harness(&[definition]);
    let case_id = h.start("work", None).await;
    let work = h.item(&case_id, "work").await;

    let err = h
        .executor
        .execute(Command::CompleteStage {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: work.id.clone(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));

    let must = h.item(&case_id, "must").await;
    h.executor
        .execute(Command::StartPlanItem {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: must.id,
        })
        .await
        .unwrap();
    h.complete(&case_id, "must", json!({})).await;

    // Without auto-complete the optional child still holds the stage open.
    assert_eq!(h.state_of(&case_id, "work").await, PlanItemState::Active);

    h.executor
        .execute(Command::CompleteStage {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: work.id,
        })
        .await
        .unwrap();
    assert_eq!(h.state_of(&case_id, "work").await, PlanItemState::Completed);
    assert_eq!(h.state_of(&case_id, "may").await, PlanItemState::Terminated);
}

#[tokio::test]
async fn repetition_condition_waits_for_data() {
    let definition = json!({
        "key": "retry",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "attempt", "kind": "human_task", "repetition": {
                "condition": { "op": "=", "left": { "var": "again" }, "right": { "literal": true } }
            } },
            { "id": "hold", "kind": "human_task", "manual_activation": true }
        ]
    });
    let h = harness(&[definition]);
    let case_id = h.start("retry", None).await;

    h.complete(&case_id, "attempt", json!({ "again": false })).await;
    let next = h.item(&case_id, "attempt").await;
    assert_eq!(next.repetition, 2);
    assert_eq!(next.state, "waiting_for_repetition");

    let mut variables = Map::new();
    variables.insert("again".to_string(), json!(true));
    h.executor
        .execute(Command::SetVariables {
            case_instance_id: case_id.clone(),
            variables,
        })
        .await
        .unwrap();
    let next = h.item(&case_id, "attempt").await;
    assert_eq!(next.repetition, 2);
    assert_eq!(next.state, "active");
}

#[tokio::test]
async fn repeated_milestone_fires_once_per_source_completion() {
    let definition = json!({
        "key": "echo",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "ping", "kind": "human_task", "repetition": true },
            { "id": "echo", "kind": "milestone", "repetition": true, "entry_criteria": ["pinged"] }
        ],
        "sentries": [
            { "id": "pinged", "on_parts": [{ "source": "ping", "transition": "complete" }] }
        ]
    });
    let h = harness(&[definition]);
    let case_id = h.start("echo", None).await;

    h.complete(&case_id, "ping", json!({})).await;
    h.complete(&case_id, "ping", json!({})).await;

    let echoes = h
        .executor
        .historic_plan_item_instance_query()
        .case_instance_id(&case_id)
        .definition_id("echo")
        .state(PlanItemState::Completed)
        .count()
        .await
        .unwrap();
    assert_eq!(echoes, 2);

    let armed = h.item(&case_id, "echo").await;
    assert_eq!(armed.repetition, 3);
    assert_eq!(armed.state, "available");
}

#[tokio::test]
async fn resumed_stage_catches_up_on_data_changes() {
    let definition = json!({
        "key": "gated",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "work", "kind": "stage" },
            { "id": "ready", "kind": "milestone", "parent": "work", "entry_criteria": ["flagged"] },
            { "id": "hold", "kind": "human_task" }
        ],
        "sentries": [
            { "id": "flagged",
              "if_part": { "op": "=", "left": { "var": "flag" }, "right": { "literal": true } } }
        ]
    });
    let h = harness(&[definition]);
    let case_id = h.start("gated", None).await;
    let work = h.item(&case_id, "work").await;

    h.executor
        .execute(Command::SuspendPlanItem {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: work.id.clone(),
        })
        .await
        .unwrap();
    let mut variables = Map::new();
    variables.insert("flag".to_string(), json!(true));
    h.executor
        .execute(Command::SetVariables {
            case_instance_id: case_id.clone(),
            variables,
        })
        .await
        .unwrap();
    assert_eq!(h.state_of(&case_id, "ready").await, PlanItemState::Available);

    h.executor
        .execute(Command::ResumePlanItem {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: work.id,
        })
        .await
        .unwrap();
    assert_eq!(h.state_of(&case_id, "ready").await, PlanItemState::Completed);
    assert_eq!(h.state_of(&case_id, "work").await, PlanItemState::Completed);
    assert_eq!(h.state_of(&case_id, "hold").await, PlanItemState::Active);
}
