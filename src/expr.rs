use evalexpr::{ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, eval_with_context};
use serde_json::{Value, json};

use crate::data::attribute::Attribute;
use crate::data::scope::Scope;

pub type EvalContext = HashMapContext<DefaultNumericTypes>;
pub type EvalValue = evalexpr::Value<DefaultNumericTypes>;

/// Strips `${...}` wrappers so `${count} > 3` reads as `count > 3`.
/// Braces outside a `${...}` wrapper are kept.
pub fn clean_expression(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        let inner = &rest[start + 2..];
        let Some(end) = inner.find('}') else {
            break;
        };
        cleaned.push_str(&rest[..start]);
        cleaned.push_str(&inner[..end]);
        rest = &inner[end + 1..];
    }
    cleaned.push_str(rest);
    cleaned
}

pub fn to_eval_value(value: &Value) -> Option<EvalValue> {
    match value {
        Value::String(s) => Some(EvalValue::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(EvalValue::Int(i))
            } else {
                n.as_f64().map(EvalValue::Float)
            }
        }
        Value::Bool(b) => Some(EvalValue::Boolean(*b)),
        Value::Array(items) => items
            .iter()
            .map(to_eval_value)
            .collect::<Option<Vec<_>>>()
            .map(EvalValue::Tuple),
        _ => None,
    }
}

pub fn from_eval_value(value: EvalValue) -> Value {
    match value {
        EvalValue::String(s) => Value::String(s),
        EvalValue::Int(i) => json!(i),
        EvalValue::Float(f) => json!(f),
        EvalValue::Boolean(b) => Value::Bool(b),
        EvalValue::Tuple(items) => Value::Array(items.into_iter().map(from_eval_value).collect()),
        EvalValue::Empty => Value::Null,
    }
}

/// Builds an evaluation context exposing every convertible attribute by name.
pub fn context_from_attrs(attrs: &[Attribute]) -> EvalContext {
    let mut ctx = EvalContext::new();
    for attr in attrs {
        if let Some(ev) = to_eval_value(attr.value()) {
            let _ = ctx.set_value(attr.name().to_string(), ev);
        }
    }
    ctx
}

/// Evaluates an expression against the attributes of `scope`.
pub fn eval_expression(raw: &str, scope: &dyn Scope) -> Result<Value, String> {
    let ctx = context_from_attrs(&scope.attrs());
    eval_with_context(&clean_expression(raw), &ctx)
        .map(from_eval_value)
        .map_err(|e| e.to_string())
}
