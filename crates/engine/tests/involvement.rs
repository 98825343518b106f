//! Historic case instance queries by involved users and groups.

mod common;

use casework_engine::{Command, EngineError};
use casework_storage::{LinkScope, PrincipalKind};
use serde_json::{json, Value};

use common::harness;

fn ticket() -> Value {
    json!({
        "key": "ticket",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "handle", "kind": "human_task" }
        ]
    })
}

fn triage() -> Value {
    json!({
        "key": "triage",
        "plan_model": { "id": "root" },
        "plan_items": [
            { "id": "assess", "kind": "human_task", "assignee": "fozzie", "candidate_groups": ["nurses"] },
            { "id": "followUp", "kind": "human_task", "manual_activation": true }
        ]
    })
}

#[tokio::test]
async fn involved_user_single_match() {
    let h = harness(&[ticket()]);
    let a = h.start("ticket", None).await;
    h.start("ticket", None).await;
    h.add_link(&a, PrincipalKind::User, "kermit", "participant").await;

    let q = h
        .executor
        .historic_case_instance_query()
        .involved_user(Some("kermit"))
        .unwrap();
    assert_eq!(q.count().await.unwrap(), 1);
    assert_eq!(q.list().await.unwrap()[0].id, a);
    assert_eq!(q.single_result().await.unwrap().unwrap().id, a);
}

#[tokio::test]
async fn second_user_does_not_disturb_first() {
    let h = harness(&[ticket()]);
    let a = h.start("ticket", None).await;
    h.add_link(&a, PrincipalKind::User, "kermit", "participant").await;
    h.add_link(&a, PrincipalKind::User, "gonzo", "participant").await;

    let query = h.executor.historic_case_instance_query();
    let kermit = query.clone().involved_user(Some("kermit")).unwrap();
    assert_eq!(kermit.count().await.unwrap(), 1);
    assert_eq!(kermit.single_result().await.unwrap().unwrap().id, a);

    let gonzo = query.clone().involved_user(Some("gonzo")).unwrap();
    assert_eq!(gonzo.count().await.unwrap(), 1);

    for user in ["", "nonexistent"] {
        let q = query.clone().involved_user(Some(user)).unwrap();
        assert_eq!(q.count().await.unwrap(), 0, "user {user:?}");
        assert!(q.list().await.unwrap().is_empty());
        assert_eq!(q.single_result().await.unwrap(), None);
    }
}

#[tokio::test]
async fn involved_groups_match_any_of_the_set() {
    let h = harness(&[ticket()]);
    let a = h.start("ticket", None).await;
    h.start("ticket", None).await;
    h.add_link(&a, PrincipalKind::Group, "testGroup", "participant").await;
    h.add_link(&a, PrincipalKind::Group, "testGroup2", "participant").await;

    let q = h
        .executor
        .historic_case_instance_query()
        .involved_groups(Some(["testGroup", "testGroup2", "testGroup3"]))
        .unwrap();
    assert_eq!(q.count().await.unwrap(), 1);
    assert_eq!(q.single_result().await.unwrap().unwrap().id, a);

    for group in ["", "NonExisting"] {
        let q = h
            .executor
            .historic_case_instance_query()
            .involved_groups(Some([group]))
            .unwrap();
        assert_eq!(q.count().await.unwrap(), 0, "group {group:?}");
    }
}

#[tokio::test]
async fn combined_filters_are_anded() {
    let h = harness(&[ticket()]);
    let a = h.start("ticket", None).await;
    let b = h.start("ticket", None).await;
    h.add_link(&a, PrincipalKind::User, "kermit", "participant").await;
    h.add_link(&a, PrincipalKind::Group, "muppets", "participant").await;
    h.add_link(&b, PrincipalKind::User, "kermit", "participant").await;
    h.add_link(&b, PrincipalKind::Group, "band", "participant").await;

    let both = h
        .executor
        .historic_case_instance_query()
        .involved_user(Some("kermit"))
        .unwrap();
    assert_eq!(both.count().await.unwrap(), 2);

    let only_a = both.clone().involved_groups(Some(["muppets"])).unwrap();
    assert_eq!(only_a.single_result().await.unwrap().unwrap().id, a);

    let none = only_a.involved_groups(Some(["band"])).unwrap();
    assert_eq!(none.count().await.unwrap(), 0);

    let err = h
        .executor
        .historic_case_instance_query()
        .involved_user(Some("kermit"))
        .unwrap()
        .single_result()
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));
    assert_eq!(err.to_string(), "query returned 2 results instead of max 1");
}

#[tokio::test]
async fn argument_errors_are_verbatim() {
    let h = harness(&[ticket()]);
    let query = h.executor.historic_case_instance_query();

    let err = query.clone().involved_user(None).unwrap_err();
    assert!(matches!(err, EngineError::IllegalArgument(_)));
    assert_eq!(err.to_string(), "involvedUser is null");

    let err = query
        .clone()
        .involved_groups(None::<Vec<String>>)
        .unwrap_err();
    assert_eq!(err.to_string(), "groupIds are null");

    let err = query
        .clone()
        .involved_groups(Some(Vec::<String>::new()))
        .unwrap_err();
    assert_eq!(err.to_string(), "groupIds are empty");
}

#[tokio::test]
async fn duplicate_links_are_idempotent() {
    let h = harness(&[ticket()]);
    let a = h.start("ticket", None).await;
    h.add_link(&a, PrincipalKind::User, "kermit", "participant").await;
    h.add_link(&a, PrincipalKind::User, "kermit", "participant").await;

    assert_eq!(h.executor.identity_links(&a).await.unwrap().len(), 1);
    assert_eq!(
        h.executor.historic_identity_links(&a).await.unwrap().len(),
        1
    );
    let q = h
        .executor
        .historic_case_instance_query()
        .involved_user(Some("kermit"))
        .unwrap();
    assert_eq!(q.count().await.unwrap(), 1);
}

#[tokio::test]
async fn involvement_survives_link_removal_and_case_end() {
    let h = harness(&[ticket()]);
    let a = h.start("ticket", None).await;
    h.add_link(&a, PrincipalKind::User, "kermit", "participant").await;

    h.executor
        .execute(Command::RemoveIdentityLink {
            case_instance_id: a.clone(),
            plan_item_instance_id: None,
            principal_kind: PrincipalKind::User,
            principal_id: Some("kermit".to_string()),
            link_type: "participant".to_string(),
        })
        .await
        .unwrap();
    assert!(h.executor.identity_links(&a).await.unwrap().is_empty());

    let q = h
        .executor
        .historic_case_instance_query()
        .involved_user(Some("kermit"))
        .unwrap();
    assert_eq!(q.count().await.unwrap(), 1);

    h.executor
        .execute(Command::TerminateCase {
            case_instance_id: a.clone(),
        })
        .await
        .unwrap();
    let finished = q.clone().finished();
    assert_eq!(finished.single_result().await.unwrap().unwrap().id, a);
}

#[tokio::test]
async fn starter_and_task_links_count_as_involvement() {
    let h = harness(&[triage()]);
    let a = h.start("triage", Some("rowlf")).await;
    let unlinked = h.start("triage", None).await;

    let query = h.executor.historic_case_instance_query();
    let by_starter = query.clone().involved_user(Some("rowlf")).unwrap();
    assert_eq!(by_starter.single_result().await.unwrap().unwrap().id, a);

    // The assignee and candidate group of the human task are linked on the
    // task and, as participants, on the case.
    let by_assignee = query.clone().involved_user(Some("fozzie")).unwrap();
    assert_eq!(by_assignee.count().await.unwrap(), 2);
    let by_group = query.clone().involved_groups(Some(["nurses"])).unwrap();
    assert_eq!(by_group.count().await.unwrap(), 2);

    let links = h.executor.identity_links(&unlinked).await.unwrap();
    assert!(links
        .iter()
        .any(|l| l.scope == LinkScope::Task && l.principal_id == "fozzie"));
    assert!(links
        .iter()
        .any(|l| l.scope == LinkScope::Case && l.principal_id == "nurses"));
    assert!(!links.iter().any(|l| l.principal_id == "rowlf"));
}

#[tokio::test]
async fn task_links_need_a_live_human_task() {
    let h = harness(&[triage()]);
    let a = h.start("triage", None).await;
    let assess = h.item(&a, "assess").await;

    h.complete(&a, "assess", json!({})).await;

    // Completing the task dropped its live task links.
    let links = h.executor.identity_links(&a).await.unwrap();
    assert!(!links.iter().any(|l| l.scope == LinkScope::Task));

    let err = h
        .executor
        .execute(Command::AddIdentityLink {
            case_instance_id: a.clone(),
            plan_item_instance_id: Some(assess.id),
            principal_kind: PrincipalKind::User,
            principal_id: Some("gonzo".to_string()),
            link_type: "candidate".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));

    let q = h
        .executor
        .historic_case_instance_query()
        .involved_user(Some("gonzo"))
        .unwrap();
    assert_eq!(q.count().await.unwrap(), 0);
}

#[tokio::test]
async fn null_principal_is_rejected_before_any_work() {
    let h = harness(&[ticket()]);
    let a = h.start("ticket", None).await;

    let err = h
        .executor
        .execute(Command::AddIdentityLink {
            case_instance_id: a.clone(),
            plan_item_instance_id: None,
            principal_kind: PrincipalKind::User,
            principal_id: None,
            link_type: "participant".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IllegalArgument(_)));
    assert_eq!(err.to_string(), "userId is null");
    assert!(h.executor.identity_links(&a).await.unwrap().is_empty());
}
