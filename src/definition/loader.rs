use std::fs;

use anyhow::{Context as AnyhowContext, Result};

use crate::definition::{FlowConfig, FlowDefinition};

pub fn parse_flow_yaml(yaml_content: &str) -> Result<FlowConfig> {
    serde_yaml::from_str(yaml_content).context("Failed to deserialize flow YAML")
}

pub fn load_flow_from_yaml(file_path: &str) -> Result<FlowConfig> {
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path))?;

    let flow: FlowConfig = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path))?;

    Ok(flow)
}

/// Loads and validates a flow file.
pub fn load_flow_definition(file_path: &str) -> Result<FlowDefinition> {
    let config = load_flow_from_yaml(file_path)?;
    let flow_id = config.id.clone();
    FlowDefinition::from_config(config)
        .with_context(|| format!("Invalid flow '{}' in {}", flow_id, file_path))
}
