use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::resolver::{DataResolver, activity_attr_name, is_resolvable};
use crate::data::scope::Scope;
use crate::error::{DataError, MapperError};
use crate::expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    /// Copies a referenced value (`$flow.x`, `$activity[t].y`, `$.z` or a bare attribute name).
    #[default]
    Assign,
    /// Writes `value` as is.
    Literal,
    /// Evaluates `value` as an expression over the source scope.
    Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDef {
    #[serde(rename = "type", default)]
    pub kind: MappingType,
    pub value: Value,
    #[serde(rename = "mapTo")]
    pub map_to: String,
}

impl MappingDef {
    pub fn assign(map_to: &str, reference: &str) -> Self {
        Self {
            kind: MappingType::Assign,
            value: Value::String(reference.to_string()),
            map_to: map_to.to_string(),
        }
    }

    pub fn literal(map_to: &str, value: impl Into<Value>) -> Self {
        Self {
            kind: MappingType::Literal,
            value: value.into(),
            map_to: map_to.to_string(),
        }
    }

    pub fn expression(map_to: &str, expr: &str) -> Self {
        Self {
            kind: MappingType::Expression,
            value: Value::String(expr.to_string()),
            map_to: map_to.to_string(),
        }
    }
}

/// Moves values from one scope into another.
pub trait Mapper: Send + Sync + Debug {
    fn apply(
        &self,
        from: &dyn Scope,
        to: &dyn Scope,
        resolver: &dyn DataResolver,
    ) -> Result<(), MapperError>;
}

/// Applies an ordered list of mapping definitions.
#[derive(Debug, Clone)]
pub struct BasicMapper {
    mappings: Vec<MappingDef>,
}

impl BasicMapper {
    pub fn new(mappings: Vec<MappingDef>) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &[MappingDef] {
        &self.mappings
    }

    fn mapped_value(
        &self,
        mapping: &MappingDef,
        from: &dyn Scope,
        resolver: &dyn DataResolver,
    ) -> Result<Value, MapperError> {
        let data_err = |source: DataError| MapperError::Data {
            map_to: mapping.map_to.clone(),
            source,
        };

        match mapping.kind {
            MappingType::Literal => Ok(mapping.value.clone()),
            MappingType::Assign => match mapping.value.as_str() {
                Some(reference) if is_resolvable(reference) => {
                    resolver.resolve(reference, from).map_err(data_err)
                }
                Some(name) => from
                    .get_value(name)
                    .ok_or_else(|| data_err(DataError::Unresolved(name.to_string()))),
                None => Ok(mapping.value.clone()),
            },
            MappingType::Expression => {
                let raw = mapping.value.as_str().unwrap_or_default();
                expr::eval_expression(raw, from).map_err(|message| MapperError::Expression {
                    expr: raw.to_string(),
                    message,
                })
            }
        }
    }
}

impl Mapper for BasicMapper {
    fn apply(
        &self,
        from: &dyn Scope,
        to: &dyn Scope,
        resolver: &dyn DataResolver,
    ) -> Result<(), MapperError> {
        for mapping in &self.mappings {
            let value = self.mapped_value(mapping, from, resolver)?;
            to.set_attr_value(&mapping.map_to, value)
                .map_err(|source| MapperError::Data {
                    map_to: mapping.map_to.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Default output mapper: publishes every output attribute of a task to the
/// flow scope as `_A.<task>.<attr>`, where `$activity[<task>].<attr>` finds it.
#[derive(Debug, Clone)]
pub struct ActivityOutputMapper {
    task_id: String,
}

impl ActivityOutputMapper {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

impl Mapper for ActivityOutputMapper {
    fn apply(
        &self,
        from: &dyn Scope,
        to: &dyn Scope,
        _resolver: &dyn DataResolver,
    ) -> Result<(), MapperError> {
        for attr in from.attrs() {
            if attr.value().is_null() {
                continue;
            }
            let key = activity_attr_name(&self.task_id, attr.name());
            to.set_attr_value(&key, attr.into_value())
                .map_err(|source| MapperError::Data { map_to: key.clone(), source })?;
        }
        Ok(())
    }
}
