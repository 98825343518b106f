//! Identity links: which users and groups are involved in a case or task.
//!
//! Links are unique per (owner, principal kind, principal id, link type);
//! adding an existing link is a no-op. Every link on a task also makes
//! the principal a `participant` of the case, and that case-level link is
//! what involvement queries match. Removing a link only touches runtime
//! state; the historic link stays.

use casework_storage::{IdentityLinkRecord, LinkScope, PrincipalKind};
use tracing::debug;

use crate::capability::Capabilities;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::event::CaseEvent;

pub const STARTER: &str = "starter";
pub const PARTICIPANT: &str = "participant";
pub const ASSIGNEE: &str = "assignee";
pub const OWNER: &str = "owner";
pub const CANDIDATE: &str = "candidate";

/// Reject a missing principal id. An empty string is a valid id.
pub fn require_principal(
    kind: PrincipalKind,
    principal_id: Option<&str>,
) -> Result<&str, EngineError> {
    principal_id.ok_or_else(|| {
        EngineError::illegal_argument(match kind {
            PrincipalKind::User => "userId is null",
            PrincipalKind::Group => "groupId is null",
        })
    })
}

impl ExecutionContext<'_> {
    /// Link a principal to the case itself.
    pub(crate) fn add_case_link(
        &mut self,
        kind: PrincipalKind,
        principal_id: &str,
        link_type: &str,
    ) -> bool {
        let case_instance_id = self.case.id.clone();
        self.insert_link(LinkScope::Case, &case_instance_id, kind, principal_id, link_type)
    }

    /// Link a principal to a human task instance, and to the case as a
    /// participant.
    pub(crate) fn add_task_link(
        &mut self,
        idx: usize,
        kind: PrincipalKind,
        principal_id: &str,
        link_type: &str,
    ) -> Result<bool, EngineError> {
        self.ensure_linkable_task(idx)?;
        let task_id = self.items[idx].id.clone();
        let added = self.insert_link(LinkScope::Task, &task_id, kind, principal_id, link_type);
        self.add_case_link(kind, principal_id, PARTICIPANT);
        Ok(added)
    }

    /// Remove a link if present. Returns whether one was removed.
    pub(crate) fn remove_link(
        &mut self,
        scope: LinkScope,
        scope_id: &str,
        kind: PrincipalKind,
        principal_id: &str,
        link_type: &str,
    ) -> bool {
        let Some(pos) = self.links.iter().position(|l| {
            l.scope == scope
                && l.scope_id == scope_id
                && l.principal_kind == kind
                && l.principal_id == principal_id
                && l.link_type == link_type
        }) else {
            return false;
        };
        let link = self.links.remove(pos);
        self.forget_link(link);
        true
    }

    /// Drop every runtime link of a task instance that just ended.
    pub(crate) fn remove_task_links(&mut self, idx: usize) {
        let task_id = self.items[idx].id.clone();
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.links)
            .into_iter()
            .partition(|l| l.scope == LinkScope::Task && l.scope_id == task_id);
        self.links = kept;
        for link in removed {
            self.forget_link(link);
        }
    }

    /// Check that `idx` is a human task that can still carry links.
    pub(crate) fn ensure_linkable_task(&self, idx: usize) -> Result<(), EngineError> {
        let item = &self.items[idx];
        let def = self.plan_item_definition(idx)?;
        if !Capabilities::of(&def.kind).has_identity_links {
            return Err(EngineError::illegal_state(format!(
                "plan item instance {} is a {} and cannot have identity links",
                item.id,
                def.kind.name()
            )));
        }
        if item.state.is_terminal() {
            return Err(EngineError::illegal_state(format!(
                "plan item instance {} is already {}",
                item.id, item.state
            )));
        }
        Ok(())
    }

    fn insert_link(
        &mut self,
        scope: LinkScope,
        scope_id: &str,
        kind: PrincipalKind,
        principal_id: &str,
        link_type: &str,
    ) -> bool {
        let link = IdentityLinkRecord {
            id: uuid::Uuid::new_v4().to_string(),
            case_instance_id: self.case.id.clone(),
            scope,
            scope_id: scope_id.to_string(),
            principal_kind: kind,
            principal_id: principal_id.to_string(),
            link_type: link_type.to_string(),
            created_at: self.now(),
        };
        if self.links.iter().any(|l| l.same_key(&link)) {
            return false;
        }
        debug!(
            case_instance_id = %self.case.id,
            scope_id = %link.scope_id,
            principal_kind = kind.as_str(),
            principal_id = %link.principal_id,
            link_type = %link.link_type,
            "added identity link"
        );
        self.links.push(link.clone());
        self.added_links.push(link.clone());
        self.events.push(CaseEvent::IdentityLinkAdded { link });
        true
    }

    /// Record the removal of a link that is no longer in `self.links`.
    fn forget_link(&mut self, link: IdentityLinkRecord) {
        match self.added_links.iter().position(|l| l.id == link.id) {
            Some(pos) => {
                self.added_links.remove(pos);
            }
            None => self.removed_links.push(link.clone()),
        }
        debug!(
            case_instance_id = %self.case.id,
            scope_id = %link.scope_id,
            principal_id = %link.principal_id,
            link_type = %link.link_type,
            "removed identity link"
        );
        self.events.push(CaseEvent::IdentityLinkRemoved { link });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_principals_are_rejected() {
        let err = require_principal(PrincipalKind::User, None).unwrap_err();
        assert_eq!(err.to_string(), "userId is null");
        let err = require_principal(PrincipalKind::Group, None).unwrap_err();
        assert_eq!(err.to_string(), "groupId is null");
    }

    #[test]
    fn empty_principal_is_valid() {
        assert_eq!(require_principal(PrincipalKind::User, Some("")).unwrap(), "");
    }
}
