//! Configuration system for rowflow.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.
//! Configuration is loaded from the platform config dir (`rowflow/config.toml`)
//! and/or `.rowflow/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cdc::TrackingMode;
use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowflowConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cdc: CdcSettings,
}

impl RowflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.script_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "executor.script_timeout_secs must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Configuration for the pipeline executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Hard time budget for a `custom_script` step, in seconds.
    pub script_timeout_secs: u64,
    /// Keep each step's output dataset on its `StepResult`.
    pub capture_step_output: bool,
    /// Operation budget for scripts; 0 means unlimited.
    pub max_script_operations: u64,
    /// Finished runs kept in the execution registry.
    #[serde(default = "default_execution_history")]
    pub execution_history: usize,
}

fn default_execution_history() -> usize {
    crate::pipeline::registry::DEFAULT_HISTORY_LIMIT
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            script_timeout_secs: 300,
            capture_step_output: true,
            max_script_operations: 0,
            execution_history: default_execution_history(),
        }
    }
}

impl ExecutorConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

/// Configuration for change data capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcSettings {
    /// Directory for the JSON-file watermark store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Tracking mode used when a CDC config file omits one.
    pub default_tracking_mode: TrackingMode,
}

impl Default for CdcSettings {
    fn default() -> Self {
        Self {
            state_dir: None,
            default_tracking_mode: TrackingMode::Hash,
        }
    }
}

impl CdcSettings {
    /// Effective state directory: the configured one or the platform data dir.
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "rowflow", "rowflow")
            .map(|d| d.data_dir().join("watermarks"))
            .unwrap_or_else(|| PathBuf::from(".rowflow").join("watermarks"))
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ROWFLOW_`)
/// 3. Workspace-local config (`.rowflow/config.toml`)
/// 4. User config (`<config dir>/rowflow/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&RowflowConfig>,
) -> Result<RowflowConfig, ConfigError> {
    load_layered(workspace, None, overrides)
}

/// Like [`load_config`], with an explicit config file layered above the
/// workspace file. The file must exist.
pub fn load_config_with_file(
    workspace: Option<&Path>,
    file: &Path,
    overrides: Option<&RowflowConfig>,
) -> Result<RowflowConfig, ConfigError> {
    if !file.exists() {
        return Err(ConfigError::FileNotFound {
            path: file.to_path_buf(),
        });
    }
    load_layered(workspace, Some(file), overrides)
}

fn load_layered(
    workspace: Option<&Path>,
    file: Option<&Path>,
    overrides: Option<&RowflowConfig>,
) -> Result<RowflowConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(RowflowConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "rowflow", "rowflow") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".rowflow").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(file) = file {
        figment = figment.merge(Toml::file(file));
    }

    // ROWFLOW_EXECUTOR__SCRIPT_TIMEOUT_SECS, ROWFLOW_CDC__STATE_DIR, etc.
    figment = figment.merge(Env::prefixed("ROWFLOW_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: RowflowConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
