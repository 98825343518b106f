use casework_model::Transition;
use casework_storage::{
    CaseInstanceRecord, CaseState, CaseStorage, HistoricCaseInstanceRecord,
    HistoricIdentityLinkRecord, HistoricPlanItemInstanceRecord, PlanItemInstanceRecord,
};
use tracing::debug;

use crate::config::HistoryLevel;
use crate::error::EngineError;
use crate::event::CaseEvent;
use crate::state::PlanItemState;

/// Mirrors the events of one unit of work into the historic tables.
///
/// Runs inside the same storage snapshot as the runtime writes, so history
/// becomes visible exactly when the runtime state does. Applying the same
/// event list twice leaves the same historic state: rows are created only
/// when absent, fields are overwritten with the values the events carry,
/// and historic identity links are inserted only once per key.
///
/// Removals never delete history.
///
/// Rows missing for a case that ran while history was off, or at a lower
/// level, are opened from the runtime records of the unit of work. Their
/// timestamps start at the first recorded transition.
#[derive(Debug, Clone, Copy)]
pub struct HistoryPropagator {
    level: HistoryLevel,
}

impl HistoryPropagator {
    pub fn new(level: HistoryLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> HistoryLevel {
        self.level
    }

    /// `case` and `plan_items` are the runtime records written by the same
    /// unit of work; every plan item an event names is among them.
    pub async fn propagate<S: CaseStorage>(
        &self,
        storage: &S,
        snapshot: &mut S::Snapshot,
        case: &CaseInstanceRecord,
        plan_items: &[PlanItemInstanceRecord],
        events: &[CaseEvent],
    ) -> Result<(), EngineError> {
        if self.level == HistoryLevel::None {
            return Ok(());
        }
        let seed = Seed { case, plan_items };
        for event in events {
            self.apply(storage, snapshot, &seed, event).await?;
        }
        debug!(events = events.len(), level = ?self.level, "propagated history");
        Ok(())
    }

    async fn apply<S: CaseStorage>(
        &self,
        storage: &S,
        snapshot: &mut S::Snapshot,
        seed: &Seed<'_>,
        event: &CaseEvent,
    ) -> Result<(), EngineError> {
        match event {
            CaseEvent::CaseStarted {
                case_instance_id,
                case_definition_id,
                case_definition_key,
                business_key,
                tenant_id,
                started_by,
                started_at,
            } => {
                let existing = storage
                    .get_historic_case_instance_for_update(snapshot, case_instance_id)
                    .await?;
                if existing.is_none() {
                    let record = HistoricCaseInstanceRecord {
                        id: case_instance_id.clone(),
                        case_definition_id: case_definition_id.clone(),
                        case_definition_key: case_definition_key.clone(),
                        business_key: business_key.clone(),
                        tenant_id: tenant_id.clone(),
                        state: CaseState::Active,
                        started_by: started_by.clone(),
                        started_at: started_at.clone(),
                        last_updated_at: started_at.clone(),
                        ended_at: None,
                    };
                    storage.save_historic_case_instance(snapshot, record).await?;
                }
            }

            CaseEvent::CaseStateChanged {
                case_instance_id,
                state,
                at,
            } => {
                let mut record = self.case(storage, snapshot, seed, case_instance_id).await?;
                record.state = *state;
                record.last_updated_at = at.clone();
                storage.save_historic_case_instance(snapshot, record).await?;
            }

            CaseEvent::CaseUpdated {
                case_instance_id,
                at,
            } => {
                let mut record = self.case(storage, snapshot, seed, case_instance_id).await?;
                record.last_updated_at = at.clone();
                storage.save_historic_case_instance(snapshot, record).await?;
            }

            CaseEvent::CaseEnded {
                case_instance_id,
                state,
                ended_at,
            } => {
                let mut record = self.case(storage, snapshot, seed, case_instance_id).await?;
                record.state = *state;
                record.last_updated_at = ended_at.clone();
                record.ended_at = Some(ended_at.clone());
                storage.save_historic_case_instance(snapshot, record).await?;
            }

            CaseEvent::PlanItemCreated {
                case_instance_id,
                plan_item_instance_id,
                definition_id,
                stage_instance_id,
                kind,
                name,
                repetition,
                state,
                at,
            } if self.level >= HistoryLevel::Activity => {
                let existing = storage
                    .get_historic_plan_item_instance_for_update(snapshot, plan_item_instance_id)
                    .await?;
                if existing.is_none() {
                    let record = HistoricPlanItemInstanceRecord {
                        id: plan_item_instance_id.clone(),
                        case_instance_id: case_instance_id.clone(),
                        definition_id: definition_id.clone(),
                        stage_instance_id: stage_instance_id.clone(),
                        kind: kind.clone(),
                        name: name.clone(),
                        state: state.as_str().to_string(),
                        repetition: *repetition,
                        created_at: at.clone(),
                        last_transition_at: at.clone(),
                        enabled_at: None,
                        activated_at: None,
                        completed_at: None,
                        occurred_at: None,
                        terminated_at: None,
                        exited_at: None,
                        failed_at: None,
                        ended_at: None,
                    };
                    storage
                        .save_historic_plan_item_instance(snapshot, record)
                        .await?;
                }
            }

            CaseEvent::PlanItemTransitioned {
                plan_item_instance_id,
                transition,
                from,
                to,
                at,
                ..
            } if self.level >= HistoryLevel::Activity => {
                let existing = storage
                    .get_historic_plan_item_instance_for_update(snapshot, plan_item_instance_id)
                    .await?;
                let mut record = match existing {
                    Some(record) => record,
                    None => seed.plan_item(plan_item_instance_id, *from)?,
                };
                stamp(&mut record, *transition, *to, at);
                storage
                    .save_historic_plan_item_instance(snapshot, record)
                    .await?;
            }

            CaseEvent::IdentityLinkAdded { link } if self.level >= HistoryLevel::Audit => {
                let inserted = storage
                    .insert_historic_identity_link(snapshot, HistoricIdentityLinkRecord::from(link))
                    .await?;
                if !inserted {
                    debug!(
                        case_instance_id = %link.case_instance_id,
                        principal_id = %link.principal_id,
                        link_type = %link.link_type,
                        "historic identity link already present"
                    );
                }
            }

            _ => {}
        }
        Ok(())
    }

    async fn case<S: CaseStorage>(
        &self,
        storage: &S,
        snapshot: &mut S::Snapshot,
        seed: &Seed<'_>,
        case_instance_id: &str,
    ) -> Result<HistoricCaseInstanceRecord, EngineError> {
        match storage
            .get_historic_case_instance_for_update(snapshot, case_instance_id)
            .await?
        {
            Some(record) => Ok(record),
            None => seed.case(case_instance_id),
        }
    }
}

/// Runtime records used to open historic rows that were never written.
struct Seed<'a> {
    case: &'a CaseInstanceRecord,
    plan_items: &'a [PlanItemInstanceRecord],
}

impl Seed<'_> {
    fn case(&self, case_instance_id: &str) -> Result<HistoricCaseInstanceRecord, EngineError> {
        let case = self.case;
        if case.id != case_instance_id {
            return Err(EngineError::NotFound {
                kind: "historic case instance",
                id: case_instance_id.to_string(),
            });
        }
        debug!(case_instance_id, "opening historic case instance late");
        Ok(HistoricCaseInstanceRecord {
            id: case.id.clone(),
            case_definition_id: case.case_definition_id.clone(),
            case_definition_key: case.case_definition_key.clone(),
            business_key: case.business_key.clone(),
            tenant_id: case.tenant_id.clone(),
            state: case.state,
            started_by: case.started_by.clone(),
            started_at: case.started_at.clone(),
            last_updated_at: case.last_updated_at.clone(),
            ended_at: None,
        })
    }

    fn plan_item(
        &self,
        plan_item_instance_id: &str,
        from: PlanItemState,
    ) -> Result<HistoricPlanItemInstanceRecord, EngineError> {
        let item = self
            .plan_items
            .iter()
            .find(|i| i.id == plan_item_instance_id)
            .ok_or_else(|| EngineError::NotFound {
                kind: "historic plan item instance",
                id: plan_item_instance_id.to_string(),
            })?;
        debug!(
            case_instance_id = %item.case_instance_id,
            plan_item_instance_id,
            "opening historic plan item instance late"
        );
        Ok(HistoricPlanItemInstanceRecord {
            id: item.id.clone(),
            case_instance_id: item.case_instance_id.clone(),
            definition_id: item.definition_id.clone(),
            stage_instance_id: item.stage_instance_id.clone(),
            kind: item.kind.clone(),
            name: item.name.clone(),
            state: from.as_str().to_string(),
            repetition: item.repetition,
            created_at: item.created_at.clone(),
            last_transition_at: item.created_at.clone(),
            enabled_at: None,
            activated_at: None,
            completed_at: None,
            occurred_at: None,
            terminated_at: None,
            exited_at: None,
            failed_at: None,
            ended_at: None,
        })
    }
}

/// Apply one transition to a historic plan item row.
fn stamp(
    record: &mut HistoricPlanItemInstanceRecord,
    transition: Transition,
    to: PlanItemState,
    at: &str,
) {
    let at = Some(at.to_string());
    match transition {
        Transition::Enable => record.enabled_at = at.clone(),
        Transition::Start => record.activated_at = at.clone(),
        Transition::Complete => record.completed_at = at.clone(),
        Transition::Occur => record.occurred_at = at.clone(),
        Transition::Terminate => record.terminated_at = at.clone(),
        Transition::Exit => record.exited_at = at.clone(),
        Transition::Fault => record.failed_at = at.clone(),
        _ => {}
    }
    if to.is_terminal() {
        record.ended_at = at.clone();
    }
    record.state = to.as_str().to_string();
    if let Some(at) = at {
        record.last_transition_at = at;
    }
}
