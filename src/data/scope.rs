use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::data::attribute::{Attribute, DataType};
use crate::error::DataError;

/// A named-attribute namespace.
pub trait Scope: Send + Sync {
    fn get_attr(&self, name: &str) -> Option<Attribute>;

    fn set_attr_value(&self, name: &str, value: Value) -> Result<(), DataError>;

    /// All attributes currently visible through this scope.
    fn attrs(&self) -> Vec<Attribute>;

    fn get_value(&self, name: &str) -> Option<Value> {
        self.get_attr(name).map(Attribute::into_value)
    }
}

/// Open scope: any name may be written. Used for flow attributes.
#[derive(Debug, Default)]
pub struct SimpleScope {
    attrs: RwLock<HashMap<String, Attribute>>,
}

impl SimpleScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attrs(attrs: impl IntoIterator<Item = Attribute>) -> Self {
        let map = attrs
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();
        Self {
            attrs: RwLock::new(map),
        }
    }

    /// Adds or replaces an attribute together with its declared type.
    pub fn add_attr(&self, attr: Attribute) {
        self.attrs.write().insert(attr.name().to_string(), attr);
    }
}

impl Scope for SimpleScope {
    fn get_attr(&self, name: &str) -> Option<Attribute> {
        self.attrs.read().get(name).cloned()
    }

    fn set_attr_value(&self, name: &str, value: Value) -> Result<(), DataError> {
        let mut attrs = self.attrs.write();
        match attrs.get_mut(name) {
            Some(attr) => attr.set_value(value),
            None => {
                attrs.insert(name.to_string(), Attribute::new(name, DataType::Any, value)?);
                Ok(())
            }
        }
    }

    fn attrs(&self) -> Vec<Attribute> {
        let mut attrs: Vec<Attribute> = self.attrs.read().values().cloned().collect();
        attrs.sort_by(|a, b| a.name().cmp(b.name()));
        attrs
    }
}

/// Closed scope bound to the attributes an activity declares.
///
/// Names outside the declared set are invisible and cannot be written.
/// Reads of a declared but unset attribute fall back to the task-level
/// default, then to the metadata default.
#[derive(Debug)]
pub struct FixedScope {
    metadata: Vec<Attribute>,
    defaults: HashMap<String, Value>,
    values: RwLock<HashMap<String, Attribute>>,
}

impl FixedScope {
    pub fn new(metadata: &[Attribute], defaults: HashMap<String, Value>) -> Self {
        Self {
            metadata: metadata.to_vec(),
            defaults,
            values: RwLock::new(HashMap::new()),
        }
    }

    fn declared(&self, name: &str) -> Option<&Attribute> {
        self.metadata.iter().find(|a| a.name() == name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared(name).is_some()
    }
}

impl Scope for FixedScope {
    fn get_attr(&self, name: &str) -> Option<Attribute> {
        let declared = self.declared(name)?;

        if let Some(attr) = self.values.read().get(name) {
            return Some(attr.clone());
        }

        if let Some(default) = self.defaults.get(name) {
            if let Ok(attr) = Attribute::new(name, declared.data_type(), default.clone()) {
                return Some(attr);
            }
        }

        Some(declared.clone())
    }

    fn set_attr_value(&self, name: &str, value: Value) -> Result<(), DataError> {
        let declared = self
            .declared(name)
            .ok_or_else(|| DataError::AttrNotDefined(name.to_string()))?;

        let mut values = self.values.write();
        match values.get_mut(name) {
            Some(attr) => attr.set_value(value),
            None => {
                values.insert(
                    name.to_string(),
                    Attribute::new(name, declared.data_type(), value)?,
                );
                Ok(())
            }
        }
    }

    fn attrs(&self) -> Vec<Attribute> {
        self.metadata
            .iter()
            .filter_map(|a| self.get_attr(a.name()))
            .collect()
    }
}
