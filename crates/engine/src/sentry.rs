//! Sentry evaluation.
//!
//! Evaluation is pure: it reads the transition history and the case
//! variables through a [`CaseView`] and never applies transitions itself.

use casework_model::{SentryDefinition, Transition};
use serde_json::Value;

use crate::error::EngineError;
use crate::expression::evaluate_condition;

/// Read-only view of one case instance, as seen by sentries.
pub trait CaseView {
    /// Sequence number of the latest `transition` of any instance of the
    /// plan item definition `definition_id`.
    fn last_transition_seq(&self, definition_id: &str, transition: Transition) -> Option<i64>;

    fn variables(&self) -> &Value;
}

/// Whether `sentry` is satisfied for an owner whose sentry memory was last
/// reset at `reset_seq`.
///
/// Every on-part needs a matching transition recorded after the reset, and
/// the if-part (when present) must currently hold. A sentry without parts
/// is never satisfied.
pub fn evaluate(
    sentry: &SentryDefinition,
    reset_seq: i64,
    view: &impl CaseView,
) -> Result<bool, EngineError> {
    if !sentry.has_parts() {
        return Ok(false);
    }

    let on_parts_fired = sentry.on_parts.iter().all(|part| {
        view.last_transition_seq(&part.source, part.transition)
            .is_some_and(|seq| seq > reset_seq)
    });
    if !on_parts_fired {
        return Ok(false);
    }

    match &sentry.if_part {
        Some(condition) => evaluate_condition(condition, view.variables()),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use casework_model::{CompareOp, Expression, OnPart};
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct FakeView {
        seqs: HashMap<(String, Transition), i64>,
        variables: Value,
    }

    impl FakeView {
        fn fired(mut self, source: &str, transition: Transition, seq: i64) -> Self {
            self.seqs.insert((source.to_string(), transition), seq);
            self
        }
    }

    impl CaseView for FakeView {
        fn last_transition_seq(&self, definition_id: &str, transition: Transition) -> Option<i64> {
            self.seqs
                .get(&(definition_id.to_string(), transition))
                .copied()
        }

        fn variables(&self) -> &Value {
            &self.variables
        }
    }

    fn sentry(on_parts: &[(&str, Transition)], if_part: Option<Expression>) -> SentryDefinition {
        SentryDefinition {
            id: "s".to_string(),
            name: None,
            on_parts: on_parts
                .iter()
                .map(|(source, transition)| OnPart {
                    source: source.to_string(),
                    transition: *transition,
                })
                .collect(),
            if_part,
        }
    }

    fn approved() -> Expression {
        Expression::Compare {
            left: Box::new(Expression::Var("approved".to_string())),
            op: CompareOp::Eq,
            right: Box::new(Expression::Literal(json!(true))),
        }
    }

    #[test]
    fn empty_sentry_never_fires() {
        let view = FakeView::default();
        assert!(!evaluate(&sentry(&[], None), 0, &view).unwrap());
    }

    #[test]
    fn all_on_parts_required() {
        let s = sentry(
            &[("a", Transition::Complete), ("b", Transition::Complete)],
            None,
        );
        let view = FakeView::default().fired("a", Transition::Complete, 3);
        assert!(!evaluate(&s, 0, &view).unwrap());
        let view = view.fired("b", Transition::Complete, 4);
        assert!(evaluate(&s, 0, &view).unwrap());
    }

    #[test]
    fn transitions_before_reset_are_forgotten() {
        let s = sentry(&[("a", Transition::Complete)], None);
        let view = FakeView::default().fired("a", Transition::Complete, 3);
        assert!(evaluate(&s, 2, &view).unwrap());
        assert!(!evaluate(&s, 3, &view).unwrap());
    }

    #[test]
    fn transition_name_must_match() {
        let s = sentry(&[("a", Transition::Complete)], None);
        let view = FakeView::default().fired("a", Transition::Exit, 3);
        assert!(!evaluate(&s, 0, &view).unwrap());
    }

    #[test]
    fn if_part_alone() {
        let s = sentry(&[], Some(approved()));
        let mut view = FakeView::default();
        assert!(!evaluate(&s, 0, &view).unwrap());
        view.variables = json!({"approved": true});
        assert!(evaluate(&s, 0, &view).unwrap());
    }

    #[test]
    fn if_part_gates_on_parts() {
        let s = sentry(&[("a", Transition::Complete)], Some(approved()));
        let mut view = FakeView::default().fired("a", Transition::Complete, 1);
        view.variables = json!({"approved": false});
        assert!(!evaluate(&s, 0, &view).unwrap());
    }
}
