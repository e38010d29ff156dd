use crate::error::StepError;
use crate::sandbox::{SandboxError, ScriptLimits, ScriptSandbox};
use crate::types::{Dataset, Record};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub script_content: String,
    /// Per-step budget in milliseconds, replacing the executor default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn step_error(step_id: &str, err: SandboxError) -> StepError {
    let step = step_id.to_string();
    match err {
        SandboxError::MissingEntryPoint | SandboxError::Compile(_) => StepError::Configuration {
            step,
            message: err.to_string(),
        },
        SandboxError::Runtime(_) | SandboxError::InvalidOutput(_) => StepError::Execution {
            step,
            message: err.to_string(),
        },
        SandboxError::Timeout { timeout_ms } => StepError::Timeout { step, timeout_ms },
        SandboxError::Cancelled => StepError::Cancelled { step },
    }
}

/// Run `scriptContent` over a copy of the whole dataset in the sandbox.
pub async fn apply(
    step_id: &str,
    config: &ScriptConfig,
    data: &[Record],
    sandbox: &dyn ScriptSandbox,
    mut limits: ScriptLimits,
    cancel: CancellationToken,
) -> Result<Dataset, StepError> {
    if config.script_content.trim().is_empty() {
        return Err(StepError::configuration(step_id, "scriptContent is empty"));
    }
    if let Some(ms) = config.timeout_ms {
        limits.timeout = Duration::from_millis(ms);
    }
    sandbox
        .run_transform(&config.script_content, data.to_vec(), limits, cancel)
        .await
        .map_err(|e| step_error(step_id, e))
}
