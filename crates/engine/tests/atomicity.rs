//! Failed units of work leave neither runtime nor historic traces.

mod common;

use casework_engine::{
    Command, EngineConfig, EngineError, HandlerError, HandlerRegistry, HandlerResult,
    TaskInvocation,
};
use casework_storage::PrincipalKind;
use serde_json::{json, Map, Value};

use common::{harness, harness_with};

fn failing() -> Value {
    json!({
        "key": "failing",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "review", "kind": "human_task", "assignee": "kermit" },
            { "id": "charge", "kind": "task", "handler": "charge", "entry_criteria": ["reviewed"] }
        ],
        "sentries": [
            { "id": "reviewed", "on_parts": [{ "source": "review", "transition": "complete" }] }
        ]
    })
}

fn handlers() -> HandlerRegistry {
    HandlerRegistry::new().with("charge", |_: &TaskInvocation| -> HandlerResult {
        Err(HandlerError::new("card declined"))
    })
}

#[tokio::test]
async fn handler_failure_rolls_back_the_whole_command() {
    let h = harness_with(&[failing()], handlers(), EngineConfig::default());
    let case_id = h.start("failing", None).await;
    let review = h.item(&case_id, "review").await;
    let version = h.executor.case_instance(&case_id).await.unwrap().version;
    let history_before = h
        .executor
        .historic_plan_item_instance_query()
        .case_instance_id(&case_id)
        .list()
        .await
        .unwrap();

    let err = h
        .executor
        .execute(Command::CompletePlanItem {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: review.id.clone(),
            variables: Map::new(),
        })
        .await
        .unwrap_err();
    match err {
        EngineError::WorkFailed {
            definition_id,
            message,
            ..
        } => {
            assert_eq!(definition_id, "charge");
            assert_eq!(message, "card declined");
        }
        other => panic!("unexpected error: {other}"),
    }

    // The review is still active and nothing was written.
    let review_after = h.item(&case_id, "review").await;
    assert_eq!(review_after.state, "active");
    assert_eq!(
        h.executor.case_instance(&case_id).await.unwrap().version,
        version
    );
    let history_after = h
        .executor
        .historic_plan_item_instance_query()
        .case_instance_id(&case_id)
        .list()
        .await
        .unwrap();
    assert_eq!(history_before, history_after);
}

#[tokio::test]
async fn failed_start_leaves_no_history() {
    let definition = json!({
        "key": "eager",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "charge", "kind": "task", "handler": "charge" }
        ]
    });
    let h = harness_with(&[definition], handlers(), EngineConfig::default());

    let err = h
        .executor
        .execute(Command::StartCase {
            case_definition_id: None,
            case_definition_key: Some("eager".to_string()),
            tenant_id: None,
            business_key: None,
            started_by: Some("kermit".to_string()),
            variables: Map::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WorkFailed { .. }));

    let query = h.executor.historic_case_instance_query();
    assert_eq!(query.count().await.unwrap(), 0);
    let involved = query.involved_user(Some("kermit")).unwrap();
    assert_eq!(involved.count().await.unwrap(), 0);
}

#[tokio::test]
async fn sentry_cycle_fails_with_no_progress() {
    let definition = json!({
        "key": "spin",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "spin", "kind": "task", "repetition": true }
        ]
    });
    let config = EngineConfig {
        max_agenda_operations: 100,
        ..EngineConfig::default()
    };
    let h = harness_with(&[definition], HandlerRegistry::new(), config);

    let err = h
        .executor
        .execute(Command::StartCase {
            case_definition_id: None,
            case_definition_key: Some("spin".to_string()),
            tenant_id: None,
            business_key: None,
            started_by: None,
            variables: Map::new(),
        })
        .await
        .unwrap_err();
    match err {
        EngineError::NoProgress { operations, .. } => assert_eq!(operations, 100),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        h.executor
            .historic_case_instance_query()
            .count()
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn bad_condition_aborts_with_expression_error() {
    let definition = json!({
        "key": "limits",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "hold", "kind": "human_task" },
            { "id": "small", "kind": "milestone", "entry_criteria": ["isSmall"] }
        ],
        "sentries": [
            { "id": "isSmall",
              "if_part": { "op": "<", "left": { "var": "amount" }, "right": { "literal": 10 } } }
        ]
    });
    let h = harness(&[definition]);
    let mut variables = Map::new();
    variables.insert("amount".to_string(), json!(50));
    let case_id = h.start_with("limits", None, variables).await;

    let mut variables = Map::new();
    variables.insert("amount".to_string(), json!("lots"));
    let err = h
        .executor
        .execute(Command::SetVariables {
            case_instance_id: case_id.clone(),
            variables,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Expression(_)));

    let case = h.executor.case_instance(&case_id).await.unwrap();
    assert_eq!(case.variables["amount"], json!(50));
}

#[tokio::test]
async fn rejected_command_keeps_links_untouched() {
    let h = harness_with(&[failing()], handlers(), EngineConfig::default());
    let case_id = h.start("failing", None).await;
    let review = h.item(&case_id, "review").await;
    let links_before = h.executor.identity_links(&case_id).await.unwrap();

    // Completing the review would drop its task links; the handler failure
    // must bring them back.
    let _ = h
        .executor
        .execute(Command::CompletePlanItem {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: review.id,
            variables: Map::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(
        h.executor.identity_links(&case_id).await.unwrap(),
        links_before
    );

    let err = h
        .executor
        .execute(Command::AddIdentityLink {
            case_instance_id: case_id.clone(),
            plan_item_instance_id: Some("no-such-task".to_string()),
            principal_kind: PrincipalKind::Group,
            principal_id: Some("admins".to_string()),
            link_type: "candidate".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
    let q = h
        .executor
        .historic_case_instance_query()
        .involved_groups(Some(["admins"]))
        .unwrap();
    assert_eq!(q.count().await.unwrap(), 0);
}
