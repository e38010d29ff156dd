//! Subcommand handlers.

use anyhow::Context;
use rowflow_core::types::dataset_from_value;
use rowflow_core::{
    CdcConfig, CdcManager, Dataset, FileWatermarkStore, InputData, MergeStrategy, Pipeline,
    PipelineExecutionResult, PipelineExecutor, RowflowConfig, TrackingMode,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Execute a pipeline definition against JSON input datasets
    Run {
        /// Pipeline definition (JSON)
        #[arg(short, long)]
        pipeline: PathBuf,
        /// Input datasets as name=file.json pairs
        #[arg(short, long)]
        input: Vec<String>,
        /// Write the final dataset to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Classify changes between two snapshots and advance the watermark
    Sync {
        /// CDC configuration (JSON)
        #[arg(long = "cdc")]
        cdc_config: PathBuf,
        /// Incoming snapshot (JSON array of records)
        #[arg(long)]
        new: PathBuf,
        /// Stored snapshot (JSON array of records)
        #[arg(long)]
        existing: PathBuf,
        /// Apply the changes to the stored snapshot and print the result
        #[arg(long)]
        merge: bool,
        /// Merge strategy (JSON); defaults to source-wins with hard deletes
        #[arg(long)]
        strategy: Option<PathBuf>,
        /// Write the merged dataset to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Watermark directory
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Delete a data source's watermark so the next sync is a full load
    Reset {
        data_source_id: String,
        /// Watermark directory
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (default)
    Show,
    /// Write a default `.rowflow/config.toml` into the workspace
    Init,
}

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load(workspace, config_file)?;

    match command {
        Commands::Run {
            pipeline,
            input,
            output,
        } => {
            let result = run_pipeline(&config, &pipeline, &input).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if let (Some(path), Some(data)) = (output, &result.output_data) {
                write_json(&path, data).await?;
            }
            if !result.is_success() {
                anyhow::bail!(
                    "pipeline '{}' failed: {}",
                    result.pipeline_id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Commands::Sync {
            cdc_config,
            new,
            existing,
            merge,
            strategy,
            output,
            state_dir,
        } => {
            let state_dir = state_dir.unwrap_or_else(|| config.cdc.resolved_state_dir());
            let request = SyncRequest {
                cdc_config,
                new,
                existing,
                merge,
                strategy,
            };
            let (summary, merged) = sync(&config, &request, &state_dir).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if let (Some(path), Some(data)) = (output, &merged) {
                write_json(&path, data).await?;
            }
            Ok(())
        }
        Commands::Reset {
            data_source_id,
            state_dir,
        } => {
            let state_dir = state_dir.unwrap_or_else(|| config.cdc.resolved_state_dir());
            let manager = CdcManager::new(Arc::new(FileWatermarkStore::new(state_dir)));
            if manager.reset_watermark(&data_source_id).await? {
                println!("Watermark for '{data_source_id}' removed.");
            } else {
                println!("No watermark stored for '{data_source_id}'.");
            }
            Ok(())
        }
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init => {
                let path = init_config(workspace)?;
                println!("Configuration written to {}", path.display());
                Ok(())
            }
        },
    }
}

fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<RowflowConfig> {
    let config = match config_file {
        Some(file) => rowflow_core::load_config_with_file(Some(workspace), file, None),
        None => rowflow_core::load_config(Some(workspace), None),
    };
    config.map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn read_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let value: Value = read_json(path).await?;
    dataset_from_value(value).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

/// Split `name=path` arguments.
fn parse_inputs(pairs: &[String]) -> anyhow::Result<Vec<(String, PathBuf)>> {
    pairs
        .iter()
        .map(|kv| match kv.split_once('=') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                Ok((name.to_string(), PathBuf::from(path)))
            }
            _ => Err(anyhow::anyhow!(
                "Invalid input format '{}', expected name=file.json",
                kv
            )),
        })
        .collect()
}

async fn run_pipeline(
    config: &RowflowConfig,
    pipeline_path: &Path,
    inputs: &[String],
) -> anyhow::Result<PipelineExecutionResult> {
    let pipeline: Pipeline = read_json(pipeline_path).await?;
    let mut input_data = InputData::new();
    for (name, path) in parse_inputs(inputs)? {
        input_data.insert(name, read_dataset(&path).await?);
    }

    let executor = PipelineExecutor::new(config.executor.clone());
    Ok(executor.execute(&pipeline, &input_data).await)
}

/// Parse a CDC config, filling `trackingMode` from settings when absent.
fn parse_cdc_config(mut raw: Value, default_mode: TrackingMode) -> anyhow::Result<CdcConfig> {
    if let Value::Object(map) = &mut raw {
        if !map.contains_key("trackingMode") {
            map.insert("trackingMode".into(), serde_json::to_value(default_mode)?);
        }
    }
    let config: CdcConfig = serde_json::from_value(raw).context("invalid CDC config")?;
    config.validate()?;
    Ok(config)
}

struct SyncRequest {
    cdc_config: PathBuf,
    new: PathBuf,
    existing: PathBuf,
    merge: bool,
    strategy: Option<PathBuf>,
}

async fn sync(
    config: &RowflowConfig,
    request: &SyncRequest,
    state_dir: &Path,
) -> anyhow::Result<(Value, Option<Dataset>)> {
    let cdc = parse_cdc_config(
        read_json(&request.cdc_config).await?,
        config.cdc.default_tracking_mode,
    )?;
    let new_data = read_dataset(&request.new).await?;
    let existing_data = read_dataset(&request.existing).await?;
    let manager = CdcManager::new(Arc::new(FileWatermarkStore::new(state_dir)));
    info!(state_dir = %state_dir.display(), source = %cdc.data_source_id, "syncing");

    let (result, merged) = if request.merge {
        let strategy = match &request.strategy {
            Some(path) => read_json::<MergeStrategy>(path).await?,
            None => MergeStrategy::default(),
        };
        let (result, merged) = manager
            .sync_and_merge(&cdc.data_source_id, &new_data, &existing_data, &cdc, &strategy)
            .await?;
        (result, Some(merged))
    } else {
        let result = manager
            .incremental_sync(&cdc.data_source_id, &new_data, &existing_data, &cdc)
            .await?;
        (result, None)
    };

    let cs = &result.change_set;
    let mut summary = json!({
        "dataSourceId": cdc.data_source_id,
        "inserts": cs.inserts.len(),
        "updates": cs.updates.len(),
        "deletes": cs.deletes.len(),
        "unchanged": cs.unchanged,
        "totalRecords": cs.total_records,
        "statistics": result.statistics,
        "watermark": result.watermark,
    });
    if let (Value::Object(map), Some(data)) = (&mut summary, &merged) {
        map.insert("merged".into(), serde_json::to_value(data)?);
    }
    Ok((summary, merged))
}

fn init_config(workspace: &Path) -> anyhow::Result<PathBuf> {
    let dir = workspace.join(".rowflow");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.toml");
    if !path.exists() {
        std::fs::write(&path, toml::to_string_pretty(&RowflowConfig::default())?)?;
    }
    Ok(path)
}
