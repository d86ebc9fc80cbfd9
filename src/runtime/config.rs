use std::fs;

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};

use crate::model::SIMPLE_MODEL;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the registered flow model instances run under.
    pub flow_model: String,
    /// Upper bound on task evaluations per `run` call.
    pub max_steps: usize,
    /// When set, change records are appended to Redis lists.
    pub redis_url: Option<String>,
    pub changes_key_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flow_model: SIMPLE_MODEL.to_string(),
            max_steps: 10_000,
            redis_url: None,
            changes_key_prefix: "flowcore".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_file(file_path: &str) -> Result<Self> {
        let yaml_content = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read config file from {}", file_path))?;

        serde_yaml::from_str(&yaml_content)
            .with_context(|| format!("Failed to deserialize config from {}", file_path))
    }
}
