use std::fmt::Debug;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::data::attribute::{Attribute, DataType};
use crate::definition::Link;
use crate::error::{ActivityError, DataError, FlowError};
use crate::instance::link::LinkInstance;

pub mod builtin;

/// Declared shape of an activity: its reference and its input/output attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    id: String,
    input: Vec<Attribute>,
    output: Vec<Attribute>,
}

impl Metadata {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: &str, data_type: DataType) -> Self {
        self.input.push(Attribute::declared(name, data_type));
        self
    }

    pub fn with_output(mut self, name: &str, data_type: DataType) -> Self {
        self.output.push(Attribute::declared(name, data_type));
        self
    }

    /// The reference string tasks use to select this activity.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input(&self) -> &[Attribute] {
        &self.input
    }

    pub fn output(&self) -> &[Attribute] {
        &self.output
    }
}

/// Plugin interface: every unit of work a task can run implements this trait.
pub trait Activity: Send + Sync + Debug {
    fn metadata(&self) -> &Metadata;

    /// Runs the activity. `Ok(false)` means the activity has not finished yet
    /// and the task waits for an external completion.
    fn eval(&self, ctx: &dyn ActivityContext) -> Result<bool, ActivityError>;
}

/// The flow instance, as seen by an activity.
pub trait ActivityHost: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn get_attr(&self, name: &str) -> Option<Value>;
    fn set_attr(&self, name: &str, value: Value) -> Result<(), DataError>;
    fn attrs(&self) -> Vec<Attribute>;
}

/// Capability set handed to an activity while it runs.
pub trait ActivityContext {
    fn name(&self) -> &str;
    fn host(&self) -> Option<Arc<dyn ActivityHost>>;

    fn get_input(&self, name: &str) -> Option<Value>;
    fn set_input(&self, name: &str, value: Value) -> Result<(), DataError>;
    fn get_output(&self, name: &str) -> Option<Value>;
    fn set_output(&self, name: &str, value: Value) -> Result<(), DataError>;

    fn get_setting(&self, name: &str) -> Option<Value>;

    fn add_working_data(&self, attr: Attribute);
    fn get_working_data(&self, key: &str) -> Option<Attribute>;
    fn update_working_data(&self, key: &str, value: Value) -> Result<(), FlowError>;

    fn from_link_instances(&self) -> Vec<Arc<LinkInstance>>;
    fn to_link_instances(&self) -> Vec<Arc<LinkInstance>>;
    fn eval_link(&self, link: &Link) -> Result<bool, FlowError>;

    fn has_activity(&self) -> bool;
}

/// Activities by reference string. Owned by the engine and shared with every
/// flow instance it creates.
#[derive(Debug, Default)]
pub struct ActivityRegistry {
    activities: DashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in activities.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(builtin::LogActivity::new()));
        registry.register(Arc::new(builtin::ExpressionActivity::new()));
        registry.register(Arc::new(builtin::ErrorActivity::new()));
        registry
    }

    pub fn register(&self, activity: Arc<dyn Activity>) {
        let id = activity.metadata().id().to_string();
        self.activities.insert(id, activity);
    }

    pub fn get(&self, activity_ref: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(activity_ref).map(|a| a.value().clone())
    }

    pub fn contains(&self, activity_ref: &str) -> bool {
        self.activities.contains_key(activity_ref)
    }
}
