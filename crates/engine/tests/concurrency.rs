//! Concurrent commands against the same and different case instances.

mod common;

use casework_engine::Command;
use casework_storage::PrincipalKind;
use serde_json::{json, Map, Value};

use common::harness;

fn ticket() -> Value {
    json!({
        "key": "ticket",
        "plan_model": { "id": "root" },
        "plan_items": [{ "id": "handle", "kind": "human_task" }]
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_case_commands_are_serialized() {
    let h = harness(&[ticket()]);
    let case_id = h.start("ticket", None).await;

    let mut tasks = Vec::new();
    for n in 0..10 {
        let executor = h.executor.clone();
        let case_id = case_id.clone();
        tasks.push(tokio::spawn(async move {
            executor
                .execute(Command::AddIdentityLink {
                    case_instance_id: case_id,
                    plan_item_instance_id: None,
                    principal_kind: PrincipalKind::User,
                    principal_id: Some(format!("user-{n}")),
                    link_type: "participant".to_string(),
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let case = h.executor.case_instance(&case_id).await.unwrap();
    assert_eq!(case.version, 11);
    assert_eq!(h.executor.identity_links(&case_id).await.unwrap().len(), 10);
    for n in 0..10 {
        let user = format!("user-{n}");
        let q = h
            .executor
            .historic_case_instance_query()
            .involved_user(Some(user.as_str()))
            .unwrap();
        assert_eq!(q.count().await.unwrap(), 1, "{user}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_cases_run_independently() {
    let h = harness(&[ticket()]);

    let mut tasks = Vec::new();
    for n in 0..8 {
        let executor = h.executor.clone();
        tasks.push(tokio::spawn(async move {
            let mut variables = Map::new();
            variables.insert("n".to_string(), json!(n));
            executor
                .execute(Command::StartCase {
                    case_definition_id: None,
                    case_definition_key: Some("ticket".to_string()),
                    tenant_id: None,
                    business_key: Some(format!("T-{n}")),
                    started_by: Some("kermit".to_string()),
                    variables,
                })
                .await
        }));
    }
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().case_instance_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let q = h
        .executor
        .historic_case_instance_query()
        .involved_user(Some("kermit"))
        .unwrap()
        .order_by_case_instance_id()
        .asc();
    let listed: Vec<String> = q.list().await.unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(listed, ids);

    let page = q.list_page(2, 3).await.unwrap();
    assert_eq!(page.len(), 3);
    assert_eq!(page[0].id, ids[2]);
}
