//! Condition evaluation over case variables.
//!
//! Numbers compare as `rust_decimal::Decimal`, so `1`, `1.0` and `1.00`
//! are equal and fractional comparisons are exact. A variable that is
//! absent evaluates to null; ordering comparisons with null are false.

use std::cmp::Ordering;
use std::str::FromStr;

use casework_model::{CompareOp, Expression};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::EngineError;

/// Evaluate a boolean condition (if-part, repetition or completion condition).
pub fn evaluate_condition(expr: &Expression, variables: &Value) -> Result<bool, EngineError> {
    as_bool(&eval(expr, variables)?)
}

/// Evaluate an expression node to a JSON value.
pub fn eval(expr: &Expression, variables: &Value) -> Result<Value, EngineError> {
    match expr {
        Expression::Var(path) => Ok(lookup(variables, path).cloned().unwrap_or(Value::Null)),

        Expression::Literal(v) => Ok(v.clone()),

        Expression::Exists(path) => Ok(Value::Bool(
            lookup(variables, path).is_some_and(|v| !v.is_null()),
        )),

        Expression::Compare { left, op, right } => {
            let l = eval(left, variables)?;
            let r = eval(right, variables)?;
            compare_values(&l, &r, *op).map(Value::Bool)
        }

        Expression::And { left, right } => {
            // Short-circuit: the right side is not evaluated when the left is false.
            if !as_bool(&eval(left, variables)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool(&eval(right, variables)?)?))
        }

        Expression::Or { left, right } => {
            if as_bool(&eval(left, variables)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool(&eval(right, variables)?)?))
        }

        Expression::Not { operand } => Ok(Value::Bool(!as_bool(&eval(operand, variables)?)?)),
    }
}

/// Resolve a dotted path (`order.total`) inside a JSON object.
pub fn lookup<'a>(variables: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(variables, |current, segment| current.get(segment))
}

fn as_bool(v: &Value) -> Result<bool, EngineError> {
    v.as_bool().ok_or_else(|| {
        EngineError::Expression(format!("expected a boolean, got {}", type_name(v)))
    })
}

fn compare_values(left: &Value, right: &Value, op: CompareOp) -> Result<bool, EngineError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            let l = to_decimal(l)?;
            let r = to_decimal(r)?;
            Ok(ordering_matches(l.cmp(&r), op))
        }
        (Value::String(l), Value::String(r)) => Ok(ordering_matches(l.cmp(r), op)),
        (Value::Null, _) | (_, Value::Null) => match op {
            CompareOp::Eq => Ok(left == right),
            CompareOp::Ne => Ok(left != right),
            _ => Ok(false),
        },
        (Value::Bool(_), Value::Bool(_))
        | (Value::Array(_), Value::Array(_))
        | (Value::Object(_), Value::Object(_)) => match op {
            CompareOp::Eq => Ok(left == right),
            CompareOp::Ne => Ok(left != right),
            _ => Err(EngineError::Expression(format!(
                "operator '{}' not defined for {}",
                op.as_str(),
                type_name(left)
            ))),
        },
        _ => match op {
            CompareOp::Eq => Ok(false),
            CompareOp::Ne => Ok(true),
            _ => Err(EngineError::Expression(format!(
                "cannot order {} against {}",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn ordering_matches(ord: Ordering, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
    }
}

fn to_decimal(n: &serde_json::Number) -> Result<Decimal, EngineError> {
    let s = n.to_string();
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .map_err(|_| EngineError::Expression(format!("number {} out of decimal range", s)))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casework_model::deserialize::parse_expression;
    use serde_json::json;

    fn cond(expr: Value, vars: Value) -> Result<bool, EngineError> {
        let e = parse_expression(&expr, "test").unwrap();
        evaluate_condition(&e, &vars)
    }

    #[test]
    fn decimal_equality_ignores_scale() {
        assert!(cond(
            json!({"op": "=", "left": {"var": "amount"}, "right": {"literal": 1}}),
            json!({"amount": 1.0})
        )
        .unwrap());
    }

    #[test]
    fn fractional_comparison_is_exact() {
        assert!(cond(
            json!({"op": ">", "left": {"var": "a"}, "right": {"literal": 0.3}}),
            json!({"a": 0.30000000000000004})
        )
        .unwrap());
    }

    #[test]
    fn dotted_paths() {
        assert!(cond(
            json!({"op": ">=", "left": {"var": "order.total"}, "right": {"literal": 100}}),
            json!({"order": {"total": 250}})
        )
        .unwrap());
    }

    #[test]
    fn missing_variable_orders_false() {
        assert!(!cond(
            json!({"op": ">", "left": {"var": "missing"}, "right": {"literal": 1}}),
            json!({})
        )
        .unwrap());
        assert!(cond(
            json!({"op": "=", "left": {"var": "missing"}, "right": {"literal": null}}),
            json!({})
        )
        .unwrap());
    }

    #[test]
    fn exists_and_not() {
        assert!(cond(json!({"op": "not", "operand": {"exists": "approved"}}), json!({"approved": null})).unwrap());
        assert!(cond(json!({"exists": "approved"}), json!({"approved": false})).unwrap());
    }

    #[test]
    fn and_or_short_circuit() {
        // The right side would be a type error if it were evaluated.
        assert!(!cond(
            json!({"op": "and", "left": {"literal": false}, "right": {"var": "text"}}),
            json!({"text": "x"})
        )
        .unwrap());
        assert!(cond(
            json!({"op": "or", "left": {"literal": true}, "right": {"var": "text"}}),
            json!({"text": "x"})
        )
        .unwrap());
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let err = cond(json!({"var": "text"}), json!({"text": "x"})).unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
    }

    #[test]
    fn ordering_mixed_types_is_an_error() {
        assert!(cond(
            json!({"op": "<", "left": {"literal": "a"}, "right": {"literal": 1}}),
            json!({})
        )
        .is_err());
        assert!(!cond(
            json!({"op": "=", "left": {"literal": "1"}, "right": {"literal": 1}}),
            json!({})
        )
        .unwrap());
    }
}
