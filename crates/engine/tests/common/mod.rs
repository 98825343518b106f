//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use casework_engine::{
    Clock, Command, CommandExecutor, EngineConfig, HandlerRegistry, ManualClock, PlanItemState,
};
use casework_model::DefinitionRepository;
use casework_storage::{InMemoryCaseStorage, PlanItemInstanceRecord, PrincipalKind};
use serde_json::{Map, Value};
use time::macros::datetime;

pub type Executor = CommandExecutor<InMemoryCaseStorage>;

pub struct Harness {
    pub executor: Arc<Executor>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(definitions: &[Value]) -> Harness {
    harness_with(definitions, HandlerRegistry::new(), EngineConfig::default())
}

pub fn harness_with(
    definitions: &[Value],
    handlers: HandlerRegistry,
    config: EngineConfig,
) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let repository = DefinitionRepository::new();
    for d in definitions {
        repository.deploy_json(d).unwrap();
    }
    let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 09:00 UTC)));
    let executor = CommandExecutor::with_clock(
        Arc::new(InMemoryCaseStorage::new()),
        Arc::new(repository),
        handlers,
        config,
        clock.clone() as Arc<dyn Clock>,
    );
    Harness {
        executor: Arc::new(executor),
        clock,
    }
}

impl Harness {
    /// A second executor over the same storage, definitions and clock.
    pub fn with_config(&self, config: EngineConfig) -> Harness {
        let executor = CommandExecutor::with_clock(
            self.executor.storage().clone(),
            self.executor.definitions().clone(),
            HandlerRegistry::new(),
            config,
            self.clock.clone() as Arc<dyn Clock>,
        );
        Harness {
            executor: Arc::new(executor),
            clock: self.clock.clone(),
        }
    }

    /// Start the latest version of `key` and return the case instance id.
    pub async fn start(&self, key: &str, started_by: Option<&str>) -> String {
        self.start_with(key, started_by, Map::new()).await
    }

    pub async fn start_with(
        &self,
        key: &str,
        started_by: Option<&str>,
        variables: Map<String, Value>,
    ) -> String {
        self.clock.advance(time::Duration::seconds(1));
        self.executor
            .execute(Command::StartCase {
                case_definition_id: None,
                case_definition_key: Some(key.to_string()),
                tenant_id: None,
                business_key: None,
                started_by: started_by.map(str::to_string),
                variables,
            })
            .await
            .unwrap()
            .case_instance_id
    }

    /// The newest live instance of a plan item definition.
    pub async fn item(&self, case_instance_id: &str, definition_id: &str) -> PlanItemInstanceRecord {
        self.executor
            .plan_item_instances(case_instance_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.definition_id == definition_id)
            .max_by_key(|p| p.created_seq)
            .unwrap_or_else(|| panic!("no instance of {definition_id}"))
    }

    pub async fn state_of(&self, case_instance_id: &str, definition_id: &str) -> PlanItemState {
        let item = self.item(case_instance_id, definition_id).await;
        PlanItemState::parse(&item.state).unwrap()
    }

    pub async fn add_link(&self, case_instance_id: &str, kind: PrincipalKind, id: &str, link_type: &str) {
        self.executor
            .execute(Command::AddIdentityLink {
                case_instance_id: case_instance_id.to_string(),
                plan_item_instance_id: None,
                principal_kind: kind,
                principal_id: Some(id.to_string()),
                link_type: link_type.to_string(),
            })
            .await
            .unwrap();
    }

    pub async fn complete(&self, case_instance_id: &str, definition_id: &str, variables: Value) {
        let item = self.item(case_instance_id, definition_id).await;
        let variables = match variables {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.executor
            .execute(Command::CompletePlanItem {
                case_instance_id: case_instance_id.to_string(),
                plan_item_instance_id: item.id,
                variables,
            })
            .await
            .unwrap();
    }
}
