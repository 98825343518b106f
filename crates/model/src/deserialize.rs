//! Deserialization of case definition JSON into typed structs.
//!
//! The entry point is [`CaseDefinition::from_json`]. Parsing walks the
//! `serde_json::Value` by hand so that every missing or malformed field
//! produces a [`ModelError`] naming the construct it belongs to.
//!
//! ```json
//! {
//!   "key": "claim",
//!   "plan_model": { "id": "root", "exit_criteria": ["rejected"] },
//!   "plan_items": [
//!     { "id": "review", "kind": "human_task", "assignee": "kermit" },
//!     { "id": "approved", "kind": "milestone", "entry_criteria": ["reviewDone"] }
//!   ],
//!   "sentries": [
//!     { "id": "reviewDone",
//!       "on_parts": [{ "source": "review", "transition": "complete" }],
//!       "if_part": { "op": "=", "left": { "var": "approved" }, "right": { "literal": true } } }
//!   ]
//! }
//! ```

use serde_json::Value;

use crate::error::ModelError;
use crate::types::*;
use crate::validate::validate;

impl CaseDefinition {
    /// Parse and validate a case definition.
    ///
    /// The parsed definition has version 1; the repository assigns the
    /// real version on deployment.
    pub fn from_json(v: &Value) -> Result<CaseDefinition, ModelError> {
        let definition = parse_definition(v)?;
        validate(&definition)?;
        Ok(definition)
    }
}

fn parse_definition(v: &Value) -> Result<CaseDefinition, ModelError> {
    let key = required_str(v, "key", "case definition")?;
    let name = optional_str(v, "name");
    let tenant_id = optional_str(v, "tenant_id");

    let root_json = v
        .get("plan_model")
        .ok_or_else(|| missing("case definition", "plan_model"))?;
    let mut plan_model = parse_plan_item(root_json, None)?;
    plan_model.kind = PlanItemKind::Stage {
        auto_complete: bool_field(root_json, "auto_complete"),
    };
    plan_model.parent = None;

    let plan_items = match v.get("plan_items") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| parse_plan_item(item, Some(&plan_model.id)))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(missing("case definition", "plan_items")),
    };

    let sentries = match v.get("sentries") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(parse_sentry)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(missing("case definition", "sentries")),
    };

    let version = 1;
    Ok(CaseDefinition {
        id: CaseDefinition::make_id(&key, version, tenant_id.as_deref()),
        key,
        name,
        version,
        tenant_id,
        plan_model,
        plan_items,
        sentries,
    })
}

fn parse_plan_item(v: &Value, root_id: Option<&str>) -> Result<PlanItemDefinition, ModelError> {
    let id = required_str(v, "id", "plan item")?;
    let context = format!("plan item '{}'", id);

    let kind_name = v.get("kind").and_then(|k| k.as_str()).unwrap_or("stage");
    let kind = match kind_name {
        "stage" => PlanItemKind::Stage {
            auto_complete: bool_field(v, "auto_complete"),
        },
        "human_task" => PlanItemKind::HumanTask {
            assignee: optional_str(v, "assignee"),
            candidate_groups: str_array(v, "candidate_groups", &context)?,
        },
        "task" => PlanItemKind::Task {
            handler: optional_str(v, "handler"),
        },
        "milestone" => PlanItemKind::Milestone,
        "event_listener" => PlanItemKind::EventListener,
        other => {
            return Err(ModelError::InvalidField {
                context,
                field: "kind".to_string(),
                message: format!("unknown plan item kind '{}'", other),
            })
        }
    };

    let parent = optional_str(v, "parent").or_else(|| root_id.map(|r| r.to_string()));

    let repetition = match v.get("repetition") {
        None | Some(Value::Null) => None,
        Some(r) => Some(parse_repetition(r, &context)?),
    };

    let completion_condition = match v.get("completion_condition") {
        None | Some(Value::Null) => None,
        Some(c) => Some(parse_expression(c, &context)?),
    };

    Ok(PlanItemDefinition {
        entry_criteria: str_array(v, "entry_criteria", &context)?,
        exit_criteria: str_array(v, "exit_criteria", &context)?,
        required: bool_field(v, "required"),
        manual_activation: bool_field(v, "manual_activation"),
        name: optional_str(v, "name"),
        id,
        kind,
        parent,
        repetition,
        completion_condition,
    })
}

fn parse_repetition(v: &Value, context: &str) -> Result<RepetitionRule, ModelError> {
    // `"repetition": true` is shorthand for an unconditional rule.
    if let Some(flag) = v.as_bool() {
        if !flag {
            return Err(ModelError::InvalidField {
                context: context.to_string(),
                field: "repetition".to_string(),
                message: "use null to disable repetition".to_string(),
            });
        }
        return Ok(RepetitionRule {
            condition: None,
            max_instance_count: None,
        });
    }

    let condition = match v.get("condition") {
        None | Some(Value::Null) => None,
        Some(c) => Some(parse_expression(c, context)?),
    };
    let max_instance_count = match v.get("max_instance_count") {
        None | Some(Value::Null) => None,
        Some(n) => {
            let n = n
                .as_u64()
                .filter(|n| *n > 0 && *n <= u32::MAX as u64)
                .ok_or_else(|| ModelError::InvalidField {
                    context: context.to_string(),
                    field: "max_instance_count".to_string(),
                    message: "must be a positive integer".to_string(),
                })?;
            Some(n as u32)
        }
    };
    Ok(RepetitionRule {
        condition,
        max_instance_count,
    })
}

fn parse_sentry(v: &Value) -> Result<SentryDefinition, ModelError> {
    let id = required_str(v, "id", "sentry")?;
    let context = format!("sentry '{}'", id);

    let on_parts = match v.get("on_parts") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|p| parse_on_part(p, &context))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(missing(&context, "on_parts")),
    };

    let if_part = match v.get("if_part") {
        None | Some(Value::Null) => None,
        Some(e) => Some(parse_expression(e, &context)?),
    };

    Ok(SentryDefinition {
        name: optional_str(v, "name"),
        id,
        on_parts,
        if_part,
    })
}

fn parse_on_part(v: &Value, context: &str) -> Result<OnPart, ModelError> {
    let source = required_str(v, "source", context)?;
    let name = required_str(v, "transition", context)?;
    let transition = Transition::parse(&name).ok_or_else(|| ModelError::InvalidField {
        context: context.to_string(),
        field: "transition".to_string(),
        message: format!("unknown transition '{}'", name),
    })?;
    Ok(OnPart { source, transition })
}

/// Parse an expression tree.
///
/// Leaf nodes are checked before `op` nodes: `{"var": ..}`,
/// `{"literal": ..}` and `{"exists": ..}`.
pub fn parse_expression(v: &Value, context: &str) -> Result<Expression, ModelError> {
    if let Some(var) = v.get("var") {
        let name = var.as_str().ok_or_else(|| missing(context, "var"))?;
        return Ok(Expression::Var(name.to_string()));
    }

    if let Some(lit) = v.get("literal") {
        return Ok(Expression::Literal(lit.clone()));
    }

    if let Some(var) = v.get("exists") {
        let name = var.as_str().ok_or_else(|| missing(context, "exists"))?;
        return Ok(Expression::Exists(name.to_string()));
    }

    let op = v
        .get("op")
        .and_then(|o| o.as_str())
        .ok_or_else(|| missing(context, "op"))?;

    let operand = |field: &str| -> Result<Box<Expression>, ModelError> {
        let child = v.get(field).ok_or_else(|| missing(context, field))?;
        Ok(Box::new(parse_expression(child, context)?))
    };

    match op {
        "and" => Ok(Expression::And {
            left: operand("left")?,
            right: operand("right")?,
        }),
        "or" => Ok(Expression::Or {
            left: operand("left")?,
            right: operand("right")?,
        }),
        "not" => Ok(Expression::Not {
            operand: operand("operand")?,
        }),
        other => {
            let op = CompareOp::parse(other).ok_or_else(|| ModelError::InvalidField {
                context: context.to_string(),
                field: "op".to_string(),
                message: format!("unknown operator '{}'", other),
            })?;
            Ok(Expression::Compare {
                left: operand("left")?,
                op,
                right: operand("right")?,
            })
        }
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn missing(context: &str, field: &str) -> ModelError {
    ModelError::MissingField {
        context: context.to_string(),
        field: field.to_string(),
    }
}

fn required_str(v: &Value, field: &str, context: &str) -> Result<String, ModelError> {
    v.get(field)
        .and_then(|f| f.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| missing(context, field))
}

fn optional_str(v: &Value, field: &str) -> Option<String> {
    v.get(field).and_then(|f| f.as_str()).map(|s| s.to_string())
}

fn bool_field(v: &Value, field: &str) -> bool {
    v.get(field).and_then(|f| f.as_bool()).unwrap_or(false)
}

fn str_array(v: &Value, field: &str, context: &str) -> Result<Vec<String>, ModelError> {
    match v.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| missing(context, field))
            })
            .collect(),
        Some(_) => Err(missing(context, field)),
    }
}
