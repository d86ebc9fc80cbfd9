pub mod builder;
pub mod link_expr;
pub mod loader;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::attribute::Attribute;
use crate::data::mapper::{ActivityOutputMapper, BasicMapper, Mapper, MappingDef};
use crate::definition::link_expr::{ExprLinkManager, LinkExprManager};
use crate::error::DefinitionError;

pub type LinkId = usize;

// --- Flow file representation ---

/// A flow as written in a flow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub activity: Option<ActivityConfigDef>,
    #[serde(default)]
    pub settings: HashMap<String, Value>,
    /// Marks a task that defines its own scope (a subflow boundary).
    #[serde(default)]
    pub scope: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfigDef {
    #[serde(rename = "ref")]
    pub activity_ref: String,
    /// Task-level values for the activity's inputs.
    #[serde(default)]
    pub input: HashMap<String, Value>,
    #[serde(default)]
    pub mappings: MappingsDef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingsDef {
    #[serde(default)]
    pub input: Vec<MappingDef>,
    #[serde(default)]
    pub output: Vec<MappingDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: LinkType,
    #[serde(default)]
    pub value: Option<String>,
}

// --- Runtime definition ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    #[default]
    Default,
    Expression,
    Label,
    Error,
}

#[derive(Debug)]
pub struct Link {
    id: LinkId,
    kind: LinkType,
    value: Option<String>,
    from_task: String,
    to_task: String,
}

impl Link {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn kind(&self) -> LinkType {
        self.kind
    }

    /// The guard expression of an expression link.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn from_task(&self) -> &str {
        &self.from_task
    }

    pub fn to_task(&self) -> &str {
        &self.to_task
    }
}

#[derive(Debug)]
pub struct ActivityConfig {
    activity_ref: String,
    input_values: HashMap<String, Value>,
    input_mapper: Option<Arc<dyn Mapper>>,
    output_mapper: Option<Arc<dyn Mapper>>,
}

impl ActivityConfig {
    fn from_def(task_id: &str, def: ActivityConfigDef) -> Self {
        let input_mapper: Option<Arc<dyn Mapper>> = if def.mappings.input.is_empty() {
            None
        } else {
            Some(Arc::new(BasicMapper::new(def.mappings.input)))
        };

        let output_mapper: Arc<dyn Mapper> = if def.mappings.output.is_empty() {
            Arc::new(ActivityOutputMapper::new(task_id))
        } else {
            Arc::new(BasicMapper::new(def.mappings.output))
        };

        Self {
            activity_ref: def.activity_ref,
            input_values: def.input,
            input_mapper,
            output_mapper: Some(output_mapper),
        }
    }

    pub fn activity_ref(&self) -> &str {
        &self.activity_ref
    }

    pub fn input_values(&self) -> &HashMap<String, Value> {
        &self.input_values
    }

    pub fn input_mapper(&self) -> Option<&Arc<dyn Mapper>> {
        self.input_mapper.as_ref()
    }

    pub fn output_mapper(&self) -> Option<&Arc<dyn Mapper>> {
        self.output_mapper.as_ref()
    }
}

#[derive(Debug)]
pub struct Task {
    id: String,
    name: String,
    activity_config: Option<ActivityConfig>,
    settings: HashMap<String, Value>,
    is_scope: bool,
    from_links: Vec<Arc<Link>>,
    to_links: Vec<Arc<Link>>,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn activity_config(&self) -> Option<&ActivityConfig> {
        self.activity_config.as_ref()
    }

    pub fn activity_ref(&self) -> Option<&str> {
        self.activity_config.as_ref().map(|c| c.activity_ref())
    }

    pub fn get_setting(&self, name: &str) -> Option<&Value> {
        self.settings.get(name)
    }

    pub fn is_scope(&self) -> bool {
        self.is_scope
    }

    /// Incoming links, in flow file order.
    pub fn from_links(&self) -> &[Arc<Link>] {
        &self.from_links
    }

    /// Outgoing links, in flow file order.
    pub fn to_links(&self) -> &[Arc<Link>] {
        &self.to_links
    }
}

/// Immutable, validated flow graph.
#[derive(Debug)]
pub struct FlowDefinition {
    id: String,
    name: String,
    attrs: Vec<Attribute>,
    tasks: Vec<Arc<Task>>,
    task_index: HashMap<String, usize>,
    links: Vec<Arc<Link>>,
    link_expr_manager: Option<Arc<dyn LinkExprManager>>,
}

impl FlowDefinition {
    pub fn from_config(config: FlowConfig) -> Result<Self, DefinitionError> {
        // 1. Index tasks
        let mut task_index = HashMap::with_capacity(config.tasks.len());
        for (idx, task) in config.tasks.iter().enumerate() {
            if task_index.insert(task.id.clone(), idx).is_some() {
                return Err(DefinitionError::DuplicateTask(task.id.clone()));
            }
        }

        // 2. Links
        let mut links = Vec::with_capacity(config.links.len());
        for (id, link) in config.links.into_iter().enumerate() {
            for endpoint in [&link.from, &link.to] {
                if !task_index.contains_key(endpoint) {
                    return Err(DefinitionError::UnknownTask {
                        link_id: id,
                        task_id: endpoint.clone(),
                    });
                }
            }
            if link.kind == LinkType::Expression && link.value.is_none() {
                return Err(DefinitionError::MissingExpression(id));
            }
            links.push(Arc::new(Link {
                id,
                kind: link.kind,
                value: link.value,
                from_task: link.from,
                to_task: link.to,
            }));
        }

        // 3. Tasks, wired to their links
        let tasks = config
            .tasks
            .into_iter()
            .map(|task| {
                let from_links = links
                    .iter()
                    .filter(|l| l.to_task == task.id)
                    .cloned()
                    .collect();
                let to_links = links
                    .iter()
                    .filter(|l| l.from_task == task.id)
                    .cloned()
                    .collect();
                let activity_config = task
                    .activity
                    .map(|def| ActivityConfig::from_def(&task.id, def));

                Arc::new(Task {
                    name: task.name.unwrap_or_else(|| task.id.clone()),
                    id: task.id,
                    activity_config,
                    settings: task.settings,
                    is_scope: task.scope,
                    from_links,
                    to_links,
                })
            })
            .collect();

        // 4. Expression manager, only when some link needs one
        let link_expr_manager: Option<Arc<dyn LinkExprManager>> =
            if links.iter().any(|l| l.kind == LinkType::Expression) {
                Some(Arc::new(ExprLinkManager::new(&links)?))
            } else {
                None
            };

        let name = if config.name.is_empty() {
            config.id.clone()
        } else {
            config.name
        };

        Ok(Self {
            id: config.id,
            name,
            attrs: config.attributes,
            tasks,
            task_index,
            links,
            link_expr_manager,
        })
    }

    /// Replaces the link expression evaluator.
    pub fn with_link_expr_manager(mut self, manager: Option<Arc<dyn LinkExprManager>>) -> Self {
        self.link_expr_manager = manager;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared flow attributes with their initial values.
    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Arc<Task>> {
        self.task_index.get(id).map(|&idx| &self.tasks[idx])
    }

    pub fn links(&self) -> &[Arc<Link>] {
        &self.links
    }

    pub fn link(&self, id: LinkId) -> Option<&Arc<Link>> {
        self.links.get(id)
    }

    pub fn link_expr_manager(&self) -> Option<&Arc<dyn LinkExprManager>> {
        self.link_expr_manager.as_ref()
    }
}
