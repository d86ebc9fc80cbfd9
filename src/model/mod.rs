use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::activity::ActivityContext;
use crate::definition::{FlowDefinition, Task};
use crate::error::EvalError;

pub mod flow;
pub mod status;
pub mod task;

pub use flow::{FlowBehavior, SimpleFlowBehavior};
pub use status::{FlowStatus, LinkStatus, TaskStatus};
pub use task::{EnterResult, EvalResult, SimpleTaskBehavior, TaskBehavior};

pub const SIMPLE_MODEL: &str = "simple";

/// A task handed to the driver for entry, with an enter code that extended
/// scheduling policies may use to pick alternate entry semantics.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub task: Arc<Task>,
    pub enter_code: i32,
}

impl TaskEntry {
    pub fn new(task: Arc<Task>) -> Self {
        Self { task, enter_code: 0 }
    }
}

/// What a task behavior may see and do on a task instance.
pub trait TaskContext: ActivityContext {
    fn task(&self) -> &Arc<Task>;
    fn flow_definition(&self) -> &FlowDefinition;
    fn status(&self) -> TaskStatus;
    fn set_status(&self, status: TaskStatus);
    fn eval_activity(&self) -> Result<bool, EvalError>;
}

/// What a flow behavior may see of a flow instance.
pub trait FlowContext {
    fn flow_definition(&self) -> &FlowDefinition;
    fn task_instances(&self) -> Vec<Arc<dyn TaskContext>>;
}

/// A named pairing of flow-level and task-level policy.
#[derive(Clone)]
pub struct FlowModel {
    name: String,
    flow_behavior: Arc<dyn FlowBehavior>,
    task_behavior: Arc<dyn TaskBehavior>,
}

impl FlowModel {
    pub fn new(
        name: &str,
        flow_behavior: Arc<dyn FlowBehavior>,
        task_behavior: Arc<dyn TaskBehavior>,
    ) -> Self {
        Self {
            name: name.to_string(),
            flow_behavior,
            task_behavior,
        }
    }

    pub fn simple() -> Self {
        Self::new(
            SIMPLE_MODEL,
            Arc::new(SimpleFlowBehavior),
            Arc::new(SimpleTaskBehavior),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow_behavior(&self) -> &dyn FlowBehavior {
        self.flow_behavior.as_ref()
    }

    pub fn task_behavior(&self) -> &dyn TaskBehavior {
        self.task_behavior.as_ref()
    }
}

impl fmt::Debug for FlowModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowModel")
            .field("name", &self.name)
            .field("flow_behavior", &self.flow_behavior)
            .field("task_behavior", &self.task_behavior)
            .finish()
    }
}

#[derive(Debug)]
pub struct ModelRegistry {
    models: DashMap<String, FlowModel>,
}

impl ModelRegistry {
    /// A registry holding the simple model.
    pub fn new() -> Self {
        let registry = Self {
            models: DashMap::new(),
        };
        registry.register(FlowModel::simple());
        registry
    }

    pub fn register(&self, model: FlowModel) {
        self.models.insert(model.name().to_string(), model);
    }

    pub fn get(&self, name: &str) -> Option<FlowModel> {
        self.models.get(name).map(|m| m.value().clone())
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
