use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::definition::loader::load_flow_definition;
use flowcore::instance::snapshot::InstanceSnapshot;
use flowcore::runtime::{Engine, EngineConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow file to completion or suspension
    Run {
        /// Path to the flow YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Initial flow attributes (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,

        /// Engine configuration YAML file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Redis connection URL for change records
        #[arg(long)]
        redis: Option<String>,

        /// Maximum number of task evaluations
        #[arg(long)]
        max_steps: Option<usize>,

        /// Write a snapshot of the instance here when the run returns
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Continue a flow instance from a snapshot
    Resume {
        /// Path to the flow YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Snapshot written by a previous run
        #[arg(long, short)]
        snapshot: PathBuf,

        /// Engine configuration YAML file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Load and validate a flow file without running it
    Validate {
        /// Path to the flow YAML file
        #[arg(long, short)]
        file: PathBuf,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // JSON when it parses, a plain string otherwise
    let val = serde_json::from_str(val_str)
        .unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_yaml_file(&path.to_string_lossy()),
        None => Ok(EngineConfig::default()),
    }
}

/// An engine with the flow in `file` registered, plus that flow's id.
fn engine_for(config: EngineConfig, file: &Path) -> Result<(Engine, String)> {
    let engine = Engine::from_config(config)?;
    let definition = load_flow_definition(&file.to_string_lossy())
        .with_context(|| format!("Failed to load flow from {}", file.display()))?;
    info!("Loaded flow: {}", definition.id());
    let flow_id = definition.id().to_string();
    engine.register_flow(definition);
    Ok((engine, flow_id))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            vars,
            config,
            redis,
            max_steps,
            snapshot,
        } => {
            let mut config = load_config(config.as_ref())?;
            if redis.is_some() {
                config.redis_url = redis;
            }
            if let Some(max_steps) = max_steps {
                config.max_steps = max_steps;
            }

            let (engine, flow_id) = engine_for(config, &file)?;

            let attrs: HashMap<_, _> = vars.into_iter().collect();
            let instance = engine.start_flow(&flow_id, attrs)?;
            info!(instance = %instance.id(), status = ?instance.status(), "Run finished");

            for attr in instance.attrs() {
                println!("{} = {}", attr.name(), attr.value());
            }

            if let Some(path) = snapshot {
                instance.snapshot().save(&path)?;
                info!("Snapshot written to {}", path.display());
            }
        }

        Commands::Resume {
            file,
            snapshot,
            config,
        } => {
            let (engine, _) = engine_for(load_config(config.as_ref())?, &file)?;
            let snapshot = InstanceSnapshot::load(&snapshot)?;
            let instance = engine.resume_flow(snapshot)?;
            info!(instance = %instance.id(), status = ?instance.status(), "Resume finished");

            for attr in instance.attrs() {
                println!("{} = {}", attr.name(), attr.value());
            }
        }

        Commands::Validate { file } => {
            let definition = load_flow_definition(&file.to_string_lossy())?;
            println!(
                "Flow '{}' is valid: {} tasks, {} links",
                definition.id(),
                definition.tasks().len(),
                definition.links().len()
            );
        }
    }

    Ok(())
}
