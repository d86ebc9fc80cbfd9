use serde_json::Value;

use crate::data::scope::Scope;
use crate::error::DataError;

/// Marks a string as a reference to be resolved rather than a literal.
pub const RESOLVER_PREFIX: char = '$';

pub fn is_resolvable(s: &str) -> bool {
    s.starts_with(RESOLVER_PREFIX)
}

/// Key under which a task's output attribute is published to the flow scope.
pub fn activity_attr_name(task_id: &str, attr: &str) -> String {
    format!("_A.{}.{}", task_id, attr)
}

/// Resolves `$`-prefixed references against a scope.
pub trait DataResolver: Send + Sync {
    fn resolve(&self, to_resolve: &str, scope: &dyn Scope) -> Result<Value, DataError>;
}

/// Understands the following references:
///
/// - `$flow.<attr>[.path]`: a flow attribute
/// - `$activity[<task>].<attr>[.path]`: an output published by a finished task
/// - `$env.<NAME>`: an environment variable
/// - `$.<attr>[.path]`: an attribute of the scope itself (output mappings)
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicResolver;

impl BasicResolver {
    pub fn new() -> Self {
        Self
    }

    fn lookup(
        &self,
        scope: &dyn Scope,
        attr_name: &str,
        path: Option<&str>,
        raw: &str,
    ) -> Result<Value, DataError> {
        let value = scope
            .get_value(attr_name)
            .ok_or_else(|| DataError::Unresolved(raw.to_string()))?;

        match path {
            Some(path) => {
                navigate(&value, path).ok_or_else(|| DataError::Unresolved(raw.to_string()))
            }
            None => Ok(value),
        }
    }
}

impl DataResolver for BasicResolver {
    fn resolve(&self, to_resolve: &str, scope: &dyn Scope) -> Result<Value, DataError> {
        let expr = to_resolve
            .strip_prefix(RESOLVER_PREFIX)
            .ok_or_else(|| DataError::Unresolved(to_resolve.to_string()))?;

        if let Some(rest) = expr.strip_prefix('.') {
            let (attr, path) = split_path(rest);
            return self.lookup(scope, attr, path, to_resolve);
        }

        if let Some(rest) = expr.strip_prefix("flow.") {
            let (attr, path) = split_path(rest);
            return self.lookup(scope, attr, path, to_resolve);
        }

        if let Some(rest) = expr.strip_prefix("activity[") {
            let (task_id, rest) = rest
                .split_once("].")
                .ok_or_else(|| DataError::Unresolved(to_resolve.to_string()))?;
            let (attr, path) = split_path(rest);
            let key = activity_attr_name(task_id, attr);
            return self.lookup(scope, &key, path, to_resolve);
        }

        if let Some(name) = expr.strip_prefix("env.") {
            return std::env::var(name)
                .map(Value::String)
                .map_err(|_| DataError::Unresolved(to_resolve.to_string()));
        }

        Err(DataError::UnknownResolver(to_resolve.to_string()))
    }
}

fn split_path(s: &str) -> (&str, Option<&str>) {
    match s.split_once('.') {
        Some((attr, path)) => (attr, Some(path)),
        None => (s, None),
    }
}

/// Walks a dotted path through objects and arrays.
fn navigate(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}
