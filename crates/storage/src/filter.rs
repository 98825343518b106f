//! Filters over historic records.
//!
//! Filters are plain data: the engine's query builders accumulate them and
//! backends evaluate them. [`HistoricCaseInstanceFilter::matches`] and
//! [`HistoricCaseInstanceFilter::order_and_page`] give every backend the
//! same reference semantics.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::record::{
    CaseState, HistoricCaseInstanceRecord, HistoricIdentityLinkRecord,
    HistoricPlanItemInstanceRecord, LinkScope, PrincipalKind,
};

/// Sort key for historic case instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaseInstanceOrder {
    #[default]
    StartTime,
    Id,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Conditions on historic case instances. All set conditions must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricCaseInstanceFilter {
    pub case_instance_id: Option<String>,
    pub case_definition_id: Option<String>,
    pub case_definition_key: Option<String>,
    pub business_key: Option<String>,
    pub tenant_id: Option<String>,
    pub state: Option<CaseState>,
    /// Some(true) = ended only, Some(false) = running only.
    pub finished: Option<bool>,
    pub started_by: Option<String>,
    /// Every user must be involved in the case.
    pub involved_users: Vec<String>,
    /// For every set, at least one of its groups must be involved.
    pub involved_group_sets: Vec<BTreeSet<String>>,
    pub order_by: CaseInstanceOrder,
    pub direction: SortDirection,
    pub first_result: usize,
    pub max_results: Option<usize>,
}

impl HistoricCaseInstanceFilter {
    /// Evaluate every condition except paging.
    ///
    /// `links` may contain links of other cases; only links owned by this
    /// case instance count as involvement.
    pub fn matches(
        &self,
        record: &HistoricCaseInstanceRecord,
        links: &[HistoricIdentityLinkRecord],
    ) -> bool {
        if !eq_opt(&self.case_instance_id, &record.id)
            || !eq_opt(&self.case_definition_id, &record.case_definition_id)
            || !eq_opt(&self.case_definition_key, &record.case_definition_key)
        {
            return false;
        }
        if self.business_key.is_some() && self.business_key != record.business_key {
            return false;
        }
        if self.tenant_id.is_some() && self.tenant_id != record.tenant_id {
            return false;
        }
        if self.started_by.is_some() && self.started_by != record.started_by {
            return false;
        }
        if let Some(state) = self.state {
            if record.state != state {
                return false;
            }
        }
        if let Some(finished) = self.finished {
            if record.is_finished() != finished {
                return false;
            }
        }

        let involved = |kind: PrincipalKind, principal: &str| {
            links.iter().any(|l| {
                l.case_instance_id == record.id
                    && l.scope == LinkScope::Case
                    && l.principal_kind == kind
                    && l.principal_id == principal
            })
        };
        if !self
            .involved_users
            .iter()
            .all(|u| involved(PrincipalKind::User, u))
        {
            return false;
        }
        self.involved_group_sets
            .iter()
            .all(|set| set.iter().any(|g| involved(PrincipalKind::Group, g)))
    }

    /// Whether any involvement condition is set.
    pub fn needs_links(&self) -> bool {
        !self.involved_users.is_empty() || !self.involved_group_sets.is_empty()
    }

    /// Sort matching records and cut the requested page.
    pub fn order_and_page(
        &self,
        mut records: Vec<HistoricCaseInstanceRecord>,
    ) -> Vec<HistoricCaseInstanceRecord> {
        records.sort_by(|a, b| {
            let ord = match self.order_by {
                CaseInstanceOrder::StartTime => a
                    .started_at
                    .cmp(&b.started_at)
                    .then_with(|| a.id.cmp(&b.id)),
                CaseInstanceOrder::Id => a.id.cmp(&b.id),
            };
            match self.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        let page = records.into_iter().skip(self.first_result);
        match self.max_results {
            Some(max) => page.take(max).collect(),
            None => page.collect(),
        }
    }
}

/// Conditions on historic plan item instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoricPlanItemInstanceFilter {
    pub case_instance_id: Option<String>,
    pub definition_id: Option<String>,
    pub state: Option<String>,
    pub ended: Option<bool>,
}

impl HistoricPlanItemInstanceFilter {
    pub fn matches(&self, record: &HistoricPlanItemInstanceRecord) -> bool {
        eq_opt(&self.case_instance_id, &record.case_instance_id)
            && eq_opt(&self.definition_id, &record.definition_id)
            && eq_opt(&self.state, &record.state)
            && self
                .ended
                .map_or(true, |ended| record.ended_at.is_some() == ended)
    }

    /// Creation order, then id.
    pub fn order(records: &mut [HistoricPlanItemInstanceRecord]) {
        records.sort_by(|a, b| match a.created_at.cmp(&b.created_at) {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        });
    }
}

fn eq_opt(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().map_or(true, |e| e == actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, started_at: &str) -> HistoricCaseInstanceRecord {
        HistoricCaseInstanceRecord {
            id: id.to_string(),
            case_definition_id: "claim:1".to_string(),
            case_definition_key: "claim".to_string(),
            business_key: None,
            tenant_id: None,
            state: CaseState::Active,
            started_by: None,
            started_at: started_at.to_string(),
            last_updated_at: started_at.to_string(),
            ended_at: None,
        }
    }

    fn link(case_id: &str, kind: PrincipalKind, principal: &str) -> HistoricIdentityLinkRecord {
        HistoricIdentityLinkRecord {
            id: format!("{case_id}-{principal}"),
            case_instance_id: case_id.to_string(),
            scope: LinkScope::Case,
            scope_id: case_id.to_string(),
            principal_kind: kind,
            principal_id: principal.to_string(),
            link_type: "participant".to_string(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn involved_users_are_and_combined() {
        let record = case("c1", "2025-01-01T00:00:00Z");
        let links = vec![link("c1", PrincipalKind::User, "kermit")];
        let mut filter = HistoricCaseInstanceFilter {
            involved_users: vec!["kermit".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&record, &links));
        filter.involved_users.push("gonzo".to_string());
        assert!(!filter.matches(&record, &links));
    }

    #[test]
    fn group_sets_are_or_within_and_across() {
        let record = case("c1", "2025-01-01T00:00:00Z");
        let links = vec![link("c1", PrincipalKind::Group, "g1")];
        let set = |gs: &[&str]| gs.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>();
        let mut filter = HistoricCaseInstanceFilter {
            involved_group_sets: vec![set(&["g1", "g9"])],
            ..Default::default()
        };
        assert!(filter.matches(&record, &links));
        filter.involved_group_sets.push(set(&["g9"]));
        assert!(!filter.matches(&record, &links));
    }

    #[test]
    fn user_link_does_not_match_group_filter() {
        let record = case("c1", "2025-01-01T00:00:00Z");
        let links = vec![link("c1", PrincipalKind::User, "kermit")];
        let filter = HistoricCaseInstanceFilter {
            involved_group_sets: vec![["kermit".to_string()].into_iter().collect()],
            ..Default::default()
        };
        assert!(!filter.matches(&record, &links));
    }

    #[test]
    fn links_of_other_cases_are_ignored() {
        let record = case("c1", "2025-01-01T00:00:00Z");
        let links = vec![link("c2", PrincipalKind::User, "kermit")];
        let filter = HistoricCaseInstanceFilter {
            involved_users: vec!["kermit".to_string()],
            ..Default::default()
        };
        assert!(!filter.matches(&record, &links));
    }

    #[test]
    fn order_and_page_by_start_time() {
        let filter = HistoricCaseInstanceFilter {
            first_result: 1,
            max_results: Some(1),
            ..Default::default()
        };
        let page = filter.order_and_page(vec![
            case("b", "2025-01-02T00:00:00Z"),
            case("a", "2025-01-03T00:00:00Z"),
            case("c", "2025-01-01T00:00:00Z"),
        ]);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "b");
    }

    #[test]
    fn order_by_id_descending() {
        let filter = HistoricCaseInstanceFilter {
            order_by: CaseInstanceOrder::Id,
            direction: SortDirection::Descending,
            ..Default::default()
        };
        let ids: Vec<_> = filter
            .order_and_page(vec![
                case("a", "2025-01-01T00:00:00Z"),
                case("c", "2025-01-01T00:00:00Z"),
                case("b", "2025-01-01T00:00:00Z"),
            ])
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }
}
