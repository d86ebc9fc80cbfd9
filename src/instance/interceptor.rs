use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-task overrides applied around activity evaluation, for test and
/// replay runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interceptor {
    #[serde(default)]
    pub tasks: Vec<TaskInterceptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInterceptor {
    pub id: String,
    /// Completes the task without running its activity.
    #[serde(default)]
    pub skip: bool,
    /// Written into the input scope after input mapping.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    /// Written into the output scope before output mapping.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
}

impl Interceptor {
    pub fn task(&self, id: &str) -> Option<&TaskInterceptor> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
