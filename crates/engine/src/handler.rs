//! Task handlers: the work behind automatic `task` plan items.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

/// What a handler sees when its task becomes active.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub case_instance_id: String,
    pub plan_item_instance_id: String,
    pub definition_id: String,
    pub repetition: u32,
    /// Case variables at activation time.
    pub variables: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Work is done; `output` is merged into the case variables.
    Complete { output: Map<String, Value> },
    /// Work continues elsewhere; the task stays active until triggered.
    Wait,
}

impl HandlerOutcome {
    pub fn complete() -> Self {
        HandlerOutcome::Complete { output: Map::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type HandlerResult = Result<HandlerOutcome, HandlerError>;

/// Synchronous work executed inside the unit of work. Handlers must not
/// block on I/O; long-running work returns [`HandlerOutcome::Wait`].
pub trait TaskHandler: Send + Sync {
    fn execute(&self, invocation: &TaskInvocation) -> HandlerResult;
}

impl<F> TaskHandler for F
where
    F: Fn(&TaskInvocation) -> HandlerResult + Send + Sync,
{
    fn execute(&self, invocation: &TaskInvocation) -> HandlerResult {
        self(invocation)
    }
}

/// Handlers by name. Built once, then shared read-only.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn with(mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        self.register(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation() -> TaskInvocation {
        TaskInvocation {
            case_instance_id: "c".to_string(),
            plan_item_instance_id: "p".to_string(),
            definition_id: "score".to_string(),
            repetition: 1,
            variables: json!({"amount": 10}),
        }
    }

    #[test]
    fn closures_are_handlers() {
        let registry = HandlerRegistry::new().with("score", |inv: &TaskInvocation| -> HandlerResult {
            let mut output = Map::new();
            output.insert("score".to_string(), inv.variables["amount"].clone());
            Ok(HandlerOutcome::Complete { output })
        });
        let handler = registry.get("score").unwrap();
        match handler.execute(&invocation()).unwrap() {
            HandlerOutcome::Complete { output } => assert_eq!(output["score"], json!(10)),
            HandlerOutcome::Wait => panic!("expected completion"),
        }
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn errors_carry_message() {
        let registry = HandlerRegistry::new().with("broken", |_: &TaskInvocation| -> HandlerResult {
            Err(HandlerError::new("backend unavailable"))
        });
        let err = registry
            .get("broken")
            .unwrap()
            .execute(&invocation())
            .unwrap_err();
        assert_eq!(err.to_string(), "backend unavailable");
    }
}
