//! CEL condition evaluation.
//!
//! Policies may carry a `condition` — a CEL expression evaluated against the
//! request.  The evaluator is sandboxed: no I/O, no loops, no reflection, and
//! the context contains only the request fields listed below — never secrets
//! or audit rows.
//!
//! Exposed variables: `agent_id`, `skill_id` (empty string when absent),
//! `purpose`, `amount` (0.0 when absent), `currency` (empty when absent),
//! `action` (empty when absent), plus every key of the request's `context`
//! mapping.

use std::collections::HashMap;

use cel_interpreter::{Context, Program, Value};

use crate::error::{Result, WalletError};
use crate::policy::model::CredentialRequest;

/// Evaluate `expr` against the request context.
///
/// Returns `Ok(true)` only when the expression evaluates to the boolean
/// `true`; any other value is `Ok(false)`.
///
/// # Errors
///
/// Returns [`WalletError::Expression`] when the expression fails to compile
/// or evaluate.  The engine converts that into a denial carrying the message.
pub fn evaluate_condition(expr: &str, request: &CredentialRequest) -> Result<bool> {
    let program = Program::compile(expr).map_err(|e| WalletError::Expression {
        reason: format!("parse error: {e}"),
    })?;

    let mut context = Context::default();
    context.add_variable_from_value("agent_id", Value::from(request.agent_id.as_str()));
    context.add_variable_from_value(
        "skill_id",
        Value::from(request.skill_id.as_deref().unwrap_or("")),
    );
    context.add_variable_from_value("purpose", Value::from(request.purpose.as_str()));
    context.add_variable_from_value("amount", Value::Float(request.amount.unwrap_or(0.0)));
    context.add_variable_from_value(
        "currency",
        Value::from(request.currency.as_deref().unwrap_or("")),
    );
    context.add_variable_from_value(
        "action",
        Value::from(request.action.as_deref().unwrap_or("")),
    );
    for (key, value) in &request.context {
        context.add_variable_from_value(key.clone(), json_to_cel(value));
    }

    let value = program.execute(&context).map_err(|e| WalletError::Expression {
        reason: e.to_string(),
    })?;

    Ok(matches!(value, Value::Bool(true)))
}

/// Convert a JSON value from the request context into a CEL value.
fn json_to_cel(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => {
            Value::from(items.iter().map(json_to_cel).collect::<Vec<_>>())
        }
        serde_json::Value::Object(map) => Value::from(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_cel(v)))
                .collect::<HashMap<String, Value>>(),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
