//! Command executor.
//!
//! Every command runs as one unit of work inside one storage snapshot:
//! load the case, apply the command, drain the agenda to a fixpoint,
//! write runtime changes, propagate history, commit. Any failure aborts
//! the snapshot, so neither runtime nor historic state changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use casework_model::{CaseDefinition, DefinitionRepository};
use casework_storage::{
    CaseInstanceRecord, CaseState, CaseStorage, HistoricIdentityLinkRecord, IdentityLinkRecord,
    PlanItemInstanceRecord, StorageError,
};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::command::{Command, CommandOutcome};
use crate::config::EngineConfig;
use crate::context::{Changes, ExecutionContext, LoadedCase, Services};
use crate::error::EngineError;
use crate::handler::HandlerRegistry;
use crate::history::{HistoricCaseInstanceQuery, HistoricPlanItemInstanceQuery, HistoryPropagator};

/// Runs commands against a storage backend.
///
/// Cheap to share behind an `Arc`; commands on different case instances
/// run concurrently. Commands on the same case instance are serialized by
/// an in-process lock when `serialize_case_commands` is set, and by the
/// storage's optimistic version check in every case.
pub struct CommandExecutor<S: CaseStorage> {
    storage: Arc<S>,
    definitions: Arc<DefinitionRepository>,
    handlers: HandlerRegistry,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    history: HistoryPropagator,
    locks: CaseLocks,
}

impl<S: CaseStorage> CommandExecutor<S> {
    pub fn new(
        storage: Arc<S>,
        definitions: Arc<DefinitionRepository>,
        handlers: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(storage, definitions, handlers, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<S>,
        definitions: Arc<DefinitionRepository>,
        handlers: HandlerRegistry,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let history = HistoryPropagator::new(config.history_level);
        Self {
            storage,
            definitions,
            handlers,
            config,
            clock,
            history,
            locks: CaseLocks::default(),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn definitions(&self) -> &Arc<DefinitionRepository> {
        &self.definitions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one command as an atomic unit of work.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome, EngineError> {
        command.validate()?;

        let _guard = match command.case_instance_id() {
            Some(id) if self.config.serialize_case_commands => Some(self.locks.lock(id).await),
            _ => None,
        };

        let mut snapshot = self.storage.begin_snapshot().await?;
        match self.run(&mut snapshot, &command).await {
            Ok(outcome) => {
                self.storage.commit_snapshot(snapshot).await?;
                info!(
                    command = command.name(),
                    case_instance_id = %outcome.case_instance_id,
                    case_state = %outcome.case_state,
                    events = outcome.events.len(),
                    "unit of work committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    command = command.name(),
                    case_instance_id = command.case_instance_id().unwrap_or(""),
                    error = %e,
                    "unit of work aborted"
                );
                let _ = self.storage.abort_snapshot(snapshot).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        snapshot: &mut S::Snapshot,
        command: &Command,
    ) -> Result<CommandOutcome, EngineError> {
        let (definition, loaded) = self.load(snapshot, command).await?;
        let changes = self.evaluate(&definition, loaded, command)?;

        let outcome = CommandOutcome {
            case_instance_id: changes.case.id.clone(),
            case_state: changes.case.state,
            events: changes.events.clone(),
        };
        let case = changes.case.clone();
        let plan_items = changes.plan_items.clone();
        self.persist(snapshot, changes).await?;
        self.history
            .propagate(
                self.storage.as_ref(),
                snapshot,
                &case,
                &plan_items,
                &outcome.events,
            )
            .await?;
        Ok(outcome)
    }

    /// Resolve the definition and read the runtime state the command needs.
    async fn load(
        &self,
        snapshot: &mut S::Snapshot,
        command: &Command,
    ) -> Result<(Arc<CaseDefinition>, LoadedCase), EngineError> {
        if let Command::StartCase {
            case_definition_id,
            case_definition_key,
            tenant_id,
            business_key,
            started_by,
            variables,
        } = command
        {
            let definition = match (case_definition_id, case_definition_key) {
                (Some(id), _) => self.definitions.get(id)?,
                (None, Some(key)) => self
                    .definitions
                    .latest_by_key(key, tenant_id.as_deref())?,
                (None, None) => {
                    return Err(EngineError::illegal_argument(
                        "caseDefinitionId and caseDefinitionKey are null",
                    ))
                }
            };
            let now = self.clock.now();
            let case = CaseInstanceRecord {
                id: uuid::Uuid::new_v4().to_string(),
                case_definition_id: definition.id.clone(),
                case_definition_key: definition.key.clone(),
                business_key: business_key.clone(),
                tenant_id: definition.tenant_id.clone(),
                state: CaseState::Active,
                version: 1,
                variables: Value::Object(variables.clone()),
                started_by: started_by.clone(),
                started_at: now.clone(),
                last_updated_at: now,
            };
            let loaded = LoadedCase {
                case,
                is_new: true,
                plan_items: Vec::new(),
                transitions: Vec::new(),
                links: Vec::new(),
            };
            return Ok((definition, loaded));
        }

        let case_instance_id = command.case_instance_id().unwrap_or_default();
        let case = self
            .storage
            .get_case_instance_for_update(snapshot, case_instance_id)
            .await
            .map_err(|e| match e {
                StorageError::CaseInstanceNotFound { case_instance_id } => EngineError::NotFound {
                    kind: "case instance",
                    id: case_instance_id,
                },
                other => other.into(),
            })?;
        let definition = self.definitions.get(&case.case_definition_id)?;
        let plan_items = self
            .storage
            .list_plan_item_instances_for_update(snapshot, case_instance_id)
            .await?;
        let transitions = self
            .storage
            .list_transitions_for_update(snapshot, case_instance_id)
            .await?;
        let links = self
            .storage
            .list_identity_links_for_update(snapshot, case_instance_id)
            .await?;
        debug!(
            case_instance_id,
            version = case.version,
            plan_items = plan_items.len(),
            transitions = transitions.len(),
            "case instance loaded"
        );
        Ok((
            definition,
            LoadedCase {
                case,
                is_new: false,
                plan_items,
                transitions,
                links,
            },
        ))
    }

    /// The synchronous part of a unit of work: apply and propagate.
    fn evaluate(
        &self,
        definition: &CaseDefinition,
        loaded: LoadedCase,
        command: &Command,
    ) -> Result<Changes, EngineError> {
        let services = Services {
            config: &self.config,
            clock: self.clock.as_ref(),
            handlers: &self.handlers,
        };
        let mut context = ExecutionContext::new(definition, loaded, services)?;
        context.apply(command)?;
        context.run_agenda()?;
        Ok(context.into_changes())
    }

    async fn persist(&self, snapshot: &mut S::Snapshot, changes: Changes) -> Result<(), EngineError> {
        let storage = self.storage.as_ref();
        let Changes {
            case,
            base_version,
            is_new,
            plan_items,
            transitions,
            added_links,
            removed_links,
            ..
        } = changes;

        if case.state.is_ended() {
            // Ended cases leave only history behind.
            if !is_new {
                storage
                    .delete_case_instance(snapshot, &case.id, base_version)
                    .await?;
            }
            return Ok(());
        }

        if is_new {
            storage.insert_case_instance(snapshot, case).await?;
        } else {
            storage
                .update_case_instance(snapshot, case, base_version)
                .await?;
        }
        for record in plan_items {
            storage.save_plan_item_instance(snapshot, record).await?;
        }
        for record in transitions {
            storage.insert_transition(snapshot, record).await?;
        }
        for link in removed_links {
            storage.delete_identity_link(snapshot, &link.id).await?;
        }
        for link in added_links {
            storage.insert_identity_link(snapshot, link).await?;
        }
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn historic_case_instance_query(&self) -> HistoricCaseInstanceQuery<'_, S> {
        HistoricCaseInstanceQuery::new(self.storage.as_ref())
    }

    pub fn historic_plan_item_instance_query(&self) -> HistoricPlanItemInstanceQuery<'_, S> {
        HistoricPlanItemInstanceQuery::new(self.storage.as_ref())
    }

    pub async fn case_instance(&self, case_instance_id: &str) -> Result<CaseInstanceRecord, EngineError> {
        self.storage
            .get_case_instance(case_instance_id)
            .await
            .map_err(|e| match e {
                StorageError::CaseInstanceNotFound { case_instance_id } => EngineError::NotFound {
                    kind: "case instance",
                    id: case_instance_id,
                },
                other => other.into(),
            })
    }

    pub async fn plan_item_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, EngineError> {
        Ok(self.storage.list_plan_item_instances(case_instance_id).await?)
    }

    pub async fn identity_links(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<IdentityLinkRecord>, EngineError> {
        Ok(self.storage.list_identity_links(case_instance_id).await?)
    }

    pub async fn historic_identity_links(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<HistoricIdentityLinkRecord>, EngineError> {
        Ok(self
            .storage
            .list_historic_identity_links(case_instance_id)
            .await?)
    }
}

// ── Per-case locks ──────────────────────────────────────────────────────

/// Async mutexes keyed by case instance id. Entries are dropped once no
/// command holds or waits for them.
#[derive(Default)]
struct CaseLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CaseLocks {
    async fn lock(&self, case_instance_id: &str) -> CaseLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(case_instance_id.to_string()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        CaseLockGuard {
            locks: self,
            case_instance_id: case_instance_id.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

struct CaseLockGuard<'a> {
    locks: &'a CaseLocks,
    case_instance_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CaseLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock().unwrap_or_else(|p| p.into_inner());
        // The map and this guard are the only owners left.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.case_instance_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_entries_are_released() {
        let locks = CaseLocks::default();
        {
            let _a = locks.lock("c1").await;
            let _b = locks.lock("c2").await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn same_case_waits() {
        let locks = Arc::new(CaseLocks::default());
        let first = locks.lock("c1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("c1").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
