use std::collections::HashMap;

use serde_json::Value;

use crate::data::attribute::{Attribute, DataType};
use crate::data::mapper::MappingDef;
use crate::definition::{
    ActivityConfigDef, FlowConfig, FlowDefinition, LinkConfig, LinkType, MappingsDef, TaskConfig,
};
use crate::error::{DataError, DefinitionError};

/// Fluent construction of a [`FlowConfig`], mostly for tests and embedding.
pub struct FlowBuilder {
    id: String,
    name: String,
    attributes: Vec<Attribute>,
    tasks: Vec<TaskConfig>,
    links: Vec<LinkConfig>,
}

impl FlowBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            attributes: Vec::new(),
            tasks: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.push(Attribute::untyped(name, value.into()));
        self
    }

    pub fn typed_attr(
        mut self,
        name: &str,
        data_type: DataType,
        value: impl Into<Value>,
    ) -> Result<Self, DataError> {
        self.attributes.push(Attribute::new(name, data_type, value.into())?);
        Ok(self)
    }

    /// A task that runs the activity registered under `activity_ref`.
    pub fn task(self, id: &str, activity_ref: &str) -> TaskBuilder {
        TaskBuilder {
            flow_builder: self,
            config: TaskConfig {
                id: id.to_string(),
                name: None,
                activity: Some(ActivityConfigDef {
                    activity_ref: activity_ref.to_string(),
                    input: HashMap::new(),
                    mappings: MappingsDef::default(),
                }),
                settings: HashMap::new(),
                scope: false,
            },
        }
    }

    /// A task without an activity (routing or join point).
    pub fn noop(mut self, id: &str) -> Self {
        self.tasks.push(TaskConfig {
            id: id.to_string(),
            name: None,
            activity: None,
            settings: HashMap::new(),
            scope: false,
        });
        self
    }

    /// A scope-defining task without an activity of its own.
    pub fn scope_task(mut self, id: &str) -> Self {
        self.tasks.push(TaskConfig {
            id: id.to_string(),
            name: None,
            activity: None,
            settings: HashMap::new(),
            scope: true,
        });
        self
    }

    pub fn link(self, from: &str, to: &str) -> Self {
        self.push_link(from, to, LinkType::Default, None)
    }

    pub fn link_if(self, from: &str, to: &str, expr: &str) -> Self {
        self.push_link(from, to, LinkType::Expression, Some(expr.to_string()))
    }

    pub fn link_error(self, from: &str, to: &str) -> Self {
        self.push_link(from, to, LinkType::Error, None)
    }

    fn push_link(mut self, from: &str, to: &str, kind: LinkType, value: Option<String>) -> Self {
        self.links.push(LinkConfig {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            value,
        });
        self
    }

    pub fn build(self) -> FlowConfig {
        FlowConfig {
            id: self.id,
            name: self.name,
            attributes: self.attributes,
            tasks: self.tasks,
            links: self.links,
        }
    }

    pub fn definition(self) -> Result<FlowDefinition, DefinitionError> {
        FlowDefinition::from_config(self.build())
    }
}

pub struct TaskBuilder {
    flow_builder: FlowBuilder,
    config: TaskConfig,
}

impl TaskBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = Some(name.to_string());
        self
    }

    pub fn input(mut self, name: &str, value: impl Into<Value>) -> Self {
        if let Some(activity) = self.config.activity.as_mut() {
            activity.input.insert(name.to_string(), value.into());
        }
        self
    }

    pub fn setting(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.config.settings.insert(name.to_string(), value.into());
        self
    }

    pub fn map_input(mut self, mapping: MappingDef) -> Self {
        if let Some(activity) = self.config.activity.as_mut() {
            activity.mappings.input.push(mapping);
        }
        self
    }

    pub fn map_output(mut self, mapping: MappingDef) -> Self {
        if let Some(activity) = self.config.activity.as_mut() {
            activity.mappings.output.push(mapping);
        }
        self
    }

    pub fn scope(mut self) -> Self {
        self.config.scope = true;
        self
    }

    pub fn build(mut self) -> FlowBuilder {
        self.flow_builder.tasks.push(self.config);
        self.flow_builder
    }
}
