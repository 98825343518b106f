use std::collections::BTreeSet;
use std::fmt;

use casework_storage::{
    CaseInstanceOrder, CaseState, CaseStorage, HistoricCaseInstanceFilter,
    HistoricCaseInstanceRecord, HistoricPlanItemInstanceFilter, HistoricPlanItemInstanceRecord,
    SortDirection,
};

use crate::error::EngineError;
use crate::state::PlanItemState;

// ── Historic case instances ─────────────────────────────────────────

/// Fluent query over historic case instances.
///
/// Conditions accumulate and are ANDed. Builders that validate their
/// argument return `Result`, so a bad argument fails at the call that
/// supplied it:
///
/// ```ignore
/// let count = HistoricCaseInstanceQuery::new(&storage)
///     .involved_user(Some("kermit"))?
///     .unfinished()
///     .count()
///     .await?;
/// ```
pub struct HistoricCaseInstanceQuery<'s, S> {
    storage: &'s S,
    filter: HistoricCaseInstanceFilter,
}

impl<S> Clone for HistoricCaseInstanceQuery<'_, S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage,
            filter: self.filter.clone(),
        }
    }
}

impl<S> fmt::Debug for HistoricCaseInstanceQuery<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoricCaseInstanceQuery")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl<'s, S: CaseStorage> HistoricCaseInstanceQuery<'s, S> {
    pub fn new(storage: &'s S) -> Self {
        Self {
            storage,
            filter: HistoricCaseInstanceFilter::default(),
        }
    }

    pub fn filter(&self) -> &HistoricCaseInstanceFilter {
        &self.filter
    }

    pub fn case_instance_id(mut self, id: impl Into<String>) -> Self {
        self.filter.case_instance_id = Some(id.into());
        self
    }

    pub fn case_definition_id(mut self, id: impl Into<String>) -> Self {
        self.filter.case_definition_id = Some(id.into());
        self
    }

    pub fn case_definition_key(mut self, key: impl Into<String>) -> Self {
        self.filter.case_definition_key = Some(key.into());
        self
    }

    pub fn business_key(mut self, key: impl Into<String>) -> Self {
        self.filter.business_key = Some(key.into());
        self
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.filter.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn state(mut self, state: CaseState) -> Self {
        self.filter.state = Some(state);
        self
    }

    pub fn finished(mut self) -> Self {
        self.filter.finished = Some(true);
        self
    }

    pub fn unfinished(mut self) -> Self {
        self.filter.finished = Some(false);
        self
    }

    pub fn started_by(mut self, user_id: impl Into<String>) -> Self {
        self.filter.started_by = Some(user_id.into());
        self
    }

    /// Only cases the user was ever involved in. `None` is rejected; an
    /// empty string is a valid id that matches no one.
    pub fn involved_user(mut self, user_id: Option<&str>) -> Result<Self, EngineError> {
        let user_id =
            user_id.ok_or_else(|| EngineError::illegal_argument("involvedUser is null"))?;
        self.filter.involved_users.push(user_id.to_string());
        Ok(self)
    }

    /// Only cases at least one of the groups was ever involved in.
    ///
    /// `None` and empty collections are rejected. Each call adds one more
    /// condition that must hold as well.
    pub fn involved_groups<I, G>(mut self, group_ids: Option<I>) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        let group_ids =
            group_ids.ok_or_else(|| EngineError::illegal_argument("groupIds are null"))?;
        let set: BTreeSet<String> = group_ids.into_iter().map(Into::into).collect();
        if set.is_empty() {
            return Err(EngineError::illegal_argument("groupIds are empty"));
        }
        self.filter.involved_group_sets.push(set);
        Ok(self)
    }

    pub fn order_by_start_time(mut self) -> Self {
        self.filter.order_by = CaseInstanceOrder::StartTime;
        self
    }

    pub fn order_by_case_instance_id(mut self) -> Self {
        self.filter.order_by = CaseInstanceOrder::Id;
        self
    }

    pub fn asc(mut self) -> Self {
        self.filter.direction = SortDirection::Ascending;
        self
    }

    pub fn desc(mut self) -> Self {
        self.filter.direction = SortDirection::Descending;
        self
    }

    pub async fn count(&self) -> Result<usize, EngineError> {
        Ok(self.storage.count_historic_case_instances(&self.filter).await?)
    }

    pub async fn list(&self) -> Result<Vec<HistoricCaseInstanceRecord>, EngineError> {
        let filter = HistoricCaseInstanceFilter {
            first_result: 0,
            max_results: None,
            ..self.filter.clone()
        };
        Ok(self.storage.find_historic_case_instances(&filter).await?)
    }

    pub async fn list_page(
        &self,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<HistoricCaseInstanceRecord>, EngineError> {
        let filter = HistoricCaseInstanceFilter {
            first_result,
            max_results: Some(max_results),
            ..self.filter.clone()
        };
        Ok(self.storage.find_historic_case_instances(&filter).await?)
    }

    /// The single match, `None` when nothing matches, an error when more
    /// than one record does.
    pub async fn single_result(&self) -> Result<Option<HistoricCaseInstanceRecord>, EngineError> {
        let mut records = self.list().await?;
        if records.len() > 1 {
            return Err(EngineError::illegal_state(format!(
                "query returned {} results instead of max 1",
                records.len()
            )));
        }
        Ok(records.pop())
    }
}

// ── Historic plan item instances ────────────────────────────────────

pub struct HistoricPlanItemInstanceQuery<'s, S> {
    storage: &'s S,
    filter: HistoricPlanItemInstanceFilter,
}

impl<S> Clone for HistoricPlanItemInstanceQuery<'_, S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage,
            filter: self.filter.clone(),
        }
    }
}

impl<'s, S: CaseStorage> HistoricPlanItemInstanceQuery<'s, S> {
    pub fn new(storage: &'s S) -> Self {
        Self {
            storage,
            filter: HistoricPlanItemInstanceFilter::default(),
        }
    }

    pub fn case_instance_id(mut self, id: impl Into<String>) -> Self {
        self.filter.case_instance_id = Some(id.into());
        self
    }

    pub fn definition_id(mut self, id: impl Into<String>) -> Self {
        self.filter.definition_id = Some(id.into());
        self
    }

    pub fn state(mut self, state: PlanItemState) -> Self {
        self.filter.state = Some(state.as_str().to_string());
        self
    }

    pub fn ended(mut self) -> Self {
        self.filter.ended = Some(true);
        self
    }

    pub fn unended(mut self) -> Self {
        self.filter.ended = Some(false);
        self
    }

    pub async fn count(&self) -> Result<usize, EngineError> {
        Ok(self
            .storage
            .count_historic_plan_item_instances(&self.filter)
            .await?)
    }

    /// Matches in creation order.
    pub async fn list(&self) -> Result<Vec<HistoricPlanItemInstanceRecord>, EngineError> {
        Ok(self
            .storage
            .find_historic_plan_item_instances(&self.filter)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use casework_storage::InMemoryCaseStorage;

    use super::*;

    #[test]
    fn involved_user_validation() {
        let storage = InMemoryCaseStorage::new();
        let err = HistoricCaseInstanceQuery::new(&storage)
            .involved_user(None)
            .unwrap_err();
        assert_eq!(err.to_string(), "involvedUser is null");
        assert!(matches!(err, EngineError::IllegalArgument(_)));

        let q = HistoricCaseInstanceQuery::new(&storage)
            .involved_user(Some(""))
            .unwrap();
        assert_eq!(q.filter().involved_users, vec![String::new()]);
    }

    #[test]
    fn involved_groups_validation() {
        let storage = InMemoryCaseStorage::new();
        let err = HistoricCaseInstanceQuery::new(&storage)
            .involved_groups(None::<Vec<String>>)
            .unwrap_err();
        assert_eq!(err.to_string(), "groupIds are null");

        let err = HistoricCaseInstanceQuery::new(&storage)
            .involved_groups(Some(Vec::<String>::new()))
            .unwrap_err();
        assert_eq!(err.to_string(), "groupIds are empty");

        let q = HistoricCaseInstanceQuery::new(&storage)
            .involved_groups(Some([""]))
            .unwrap();
        assert_eq!(q.filter().involved_group_sets.len(), 1);
    }

    #[test]
    fn null_rejected_after_other_filters() {
        let storage = InMemoryCaseStorage::new();
        let err = HistoricCaseInstanceQuery::new(&storage)
            .case_definition_key("claim")
            .unfinished()
            .involved_groups(Some(["g1"]))
            .unwrap()
            .involved_user(None)
            .unwrap_err();
        assert_eq!(err.to_string(), "involvedUser is null");
    }

    #[tokio::test]
    async fn empty_store_single_result_is_none() {
        let storage = InMemoryCaseStorage::new();
        let q = HistoricCaseInstanceQuery::new(&storage)
            .involved_user(Some("kermit"))
            .unwrap();
        assert_eq!(q.count().await.unwrap(), 0);
        assert_eq!(q.single_result().await.unwrap(), None);
    }
}
