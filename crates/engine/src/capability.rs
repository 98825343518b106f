//! Kind-specific behavior of plan items as a lookup table.

use casework_model::{PlanItemDefinition, PlanItemKind};

/// How an active plan item reaches `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// When its children allow it (stages).
    Children,
    /// When a caller reports the work done (human tasks).
    Caller,
    /// When its registered handler returns, or a later trigger for waiting handlers.
    Handler,
    /// Immediately on activation (milestones).
    Occurrence,
    /// On an external trigger (event listeners).
    Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Starts by itself once enabled, unless manual activation is set.
    pub auto_start: bool,
    /// Honors the definition's `manual_activation` flag.
    pub manual_activation_allowed: bool,
    pub completion: CompletionMode,
    pub has_children: bool,
    pub suspendable: bool,
    /// May carry task-scoped identity links.
    pub has_identity_links: bool,
}

impl Capabilities {
    pub fn of(kind: &PlanItemKind) -> Capabilities {
        match kind {
            PlanItemKind::Stage { .. } => Capabilities {
                auto_start: true,
                manual_activation_allowed: true,
                completion: CompletionMode::Children,
                has_children: true,
                suspendable: true,
                has_identity_links: false,
            },
            PlanItemKind::HumanTask { .. } => Capabilities {
                auto_start: true,
                manual_activation_allowed: true,
                completion: CompletionMode::Caller,
                has_children: false,
                suspendable: true,
                has_identity_links: true,
            },
            PlanItemKind::Task { .. } => Capabilities {
                auto_start: true,
                manual_activation_allowed: true,
                completion: CompletionMode::Handler,
                has_children: false,
                suspendable: true,
                has_identity_links: false,
            },
            PlanItemKind::Milestone => Capabilities {
                auto_start: true,
                manual_activation_allowed: false,
                completion: CompletionMode::Occurrence,
                has_children: false,
                suspendable: false,
                has_identity_links: false,
            },
            PlanItemKind::EventListener => Capabilities {
                auto_start: true,
                manual_activation_allowed: false,
                completion: CompletionMode::Trigger,
                has_children: false,
                suspendable: false,
                has_identity_links: false,
            },
        }
    }

    /// Whether an enabled instance of `def` activates without a command.
    pub fn starts_automatically(def: &PlanItemDefinition, is_root: bool) -> bool {
        let caps = Capabilities::of(&def.kind);
        is_root || (caps.auto_start && !(caps.manual_activation_allowed && def.manual_activation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(kind: PlanItemKind, manual_activation: bool) -> PlanItemDefinition {
        PlanItemDefinition {
            id: "x".to_string(),
            name: None,
            kind,
            parent: Some("root".to_string()),
            entry_criteria: vec![],
            exit_criteria: vec![],
            required: false,
            manual_activation,
            repetition: None,
            completion_condition: None,
        }
    }

    #[test]
    fn manual_activation_only_for_work_items() {
        let task = def(
            PlanItemKind::HumanTask {
                assignee: None,
                candidate_groups: vec![],
            },
            true,
        );
        assert!(!Capabilities::starts_automatically(&task, false));
        let milestone = def(PlanItemKind::Milestone, true);
        assert!(Capabilities::starts_automatically(&milestone, false));
    }

    #[test]
    fn root_always_starts() {
        let stage = def(
            PlanItemKind::Stage {
                auto_complete: false,
            },
            true,
        );
        assert!(Capabilities::starts_automatically(&stage, true));
    }

    #[test]
    fn completion_modes() {
        assert_eq!(
            Capabilities::of(&PlanItemKind::EventListener).completion,
            CompletionMode::Trigger
        );
        assert!(Capabilities::of(&PlanItemKind::Stage { auto_complete: true }).has_children);
    }
}
