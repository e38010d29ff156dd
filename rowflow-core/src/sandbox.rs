//! Script sandbox for `custom_script` steps.
//!
//! Scripts are Rhai source defining `fn transform(data)`: `data` is the whole
//! current dataset as an array of object maps, and the function returns the
//! new array. The engine has no filesystem, network, or environment access,
//! module imports are disabled, and `print`/`debug` go to tracing.
//!
//! ## Execution model
//!
//! ```text
//! RhaiSandbox::run_transform
//!     │
//!     ├── spawn_blocking ── Engine (deadline + cancellation checked in on_progress)
//!     │                        └── transform(data) -> array
//!     │
//!     └── tokio::time::timeout (hard bound, cancels the in-engine token)
//! ```

use crate::types::{Dataset, dataset_from_value};
use async_trait::async_trait;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Name of the entry point every script must define.
pub const ENTRY_POINT: &str = "transform";

const TERMINATED_TIMEOUT: i64 = 1;
const TERMINATED_CANCELLED: i64 = 2;

/// Error type for sandboxed script execution.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("script does not define `fn transform(data)`")]
    MissingEntryPoint,
    #[error("script failed to compile: {0}")]
    Compile(String),
    #[error("script raised an error: {0}")]
    Runtime(String),
    #[error("script returned an invalid dataset: {0}")]
    InvalidOutput(String),
    #[error("script exceeded its {timeout_ms}ms budget")]
    Timeout { timeout_ms: u64 },
    #[error("script was cancelled")]
    Cancelled,
}

/// Resource limits for one script run.
#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    pub timeout: Duration,
    /// Maximum Rhai operations; 0 means unlimited.
    pub max_operations: u64,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_operations: 0,
        }
    }
}

/// Pluggable script execution backend.
#[async_trait]
pub trait ScriptSandbox: Send + Sync {
    /// Run the script's `transform` over `data` and return the new dataset.
    async fn run_transform(
        &self,
        script: &str,
        data: Dataset,
        limits: ScriptLimits,
        cancel: CancellationToken,
    ) -> Result<Dataset, SandboxError>;
}

/// Rhai-backed sandbox.
#[derive(Debug, Clone)]
pub struct RhaiSandbox {
    max_expr_depth: usize,
    max_call_levels: usize,
}

impl Default for RhaiSandbox {
    fn default() -> Self {
        Self {
            max_expr_depth: 64,
            max_call_levels: 64,
        }
    }
}

impl RhaiSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_engine(&self, deadline: Instant, max_operations: u64, cancel: CancellationToken) -> Engine {
        let mut engine = Engine::new();
        engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_expr_depths(self.max_expr_depth, self.max_expr_depth);
        engine.set_max_call_levels(self.max_call_levels);
        if max_operations > 0 {
            engine.set_max_operations(max_operations);
        }

        engine.on_print(|text| debug!(target: "rowflow::script", "{text}"));
        engine.on_debug(|text, _source, pos| debug!(target: "rowflow::script", ?pos, "{text}"));

        engine.on_progress(move |_ops| {
            if cancel.is_cancelled() {
                Some(Dynamic::from_int(TERMINATED_CANCELLED))
            } else if Instant::now() >= deadline {
                Some(Dynamic::from_int(TERMINATED_TIMEOUT))
            } else {
                None
            }
        });
        engine
    }

    fn run_blocking(
        &self,
        script: &str,
        data: Dataset,
        limits: ScriptLimits,
        cancel: CancellationToken,
    ) -> Result<Dataset, SandboxError> {
        let timeout_ms = limits.timeout.as_millis() as u64;
        let deadline = Instant::now() + limits.timeout;
        let engine = self.build_engine(deadline, limits.max_operations, cancel);

        let ast = engine
            .compile(script)
            .map_err(|e| SandboxError::Compile(e.to_string()))?;
        let has_entry = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 1);
        if !has_entry {
            return Err(SandboxError::MissingEntryPoint);
        }

        let input = rhai::serde::to_dynamic(&data).map_err(|e| SandboxError::Runtime(e.to_string()))?;
        let mut scope = Scope::new();
        let output = engine
            .call_fn::<Dynamic>(&mut scope, &ast, ENTRY_POINT, (input,))
            .map_err(|err| map_eval_error(*err, timeout_ms))?;

        let value: serde_json::Value =
            rhai::serde::from_dynamic(&output).map_err(|e| SandboxError::InvalidOutput(e.to_string()))?;
        dataset_from_value(value).map_err(SandboxError::InvalidOutput)
    }
}

fn map_eval_error(err: EvalAltResult, timeout_ms: u64) -> SandboxError {
    match err {
        EvalAltResult::ErrorTerminated(token, _) => {
            if token.as_int() == Ok(TERMINATED_TIMEOUT) {
                SandboxError::Timeout { timeout_ms }
            } else {
                SandboxError::Cancelled
            }
        }
        EvalAltResult::ErrorTooManyOperations(_) => {
            SandboxError::Runtime("operation budget exhausted".to_string())
        }
        other => SandboxError::Runtime(other.to_string()),
    }
}

#[async_trait]
impl ScriptSandbox for RhaiSandbox {
    async fn run_transform(
        &self,
        script: &str,
        data: Dataset,
        limits: ScriptLimits,
        cancel: CancellationToken,
    ) -> Result<Dataset, SandboxError> {
        let script_token = cancel.child_token();
        let worker_token = script_token.clone();
        let sandbox = self.clone();
        let script = script.to_string();
        let timeout_ms = limits.timeout.as_millis() as u64;

        let handle = tokio::task::spawn_blocking(move || {
            sandbox.run_blocking(&script, data, limits, worker_token)
        });

        match tokio::time::timeout(limits.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SandboxError::Runtime(format!(
                "script worker terminated abnormally: {join_err}"
            ))),
            Err(_) => {
                warn!(timeout_ms, "script exceeded its budget, interrupting");
                script_token.cancel();
                Err(SandboxError::Timeout { timeout_ms })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(v: serde_json::Value) -> Dataset {
        dataset_from_value(v).unwrap()
    }

    fn limits(ms: u64) -> ScriptLimits {
        ScriptLimits {
            timeout: Duration::from_millis(ms),
            max_operations: 0,
        }
    }

    #[tokio::test]
    async fn test_transform_filters_rows() {
        let script = r#"
            fn transform(data) {
                data.filter(|r| r.age >= 18)
            }
        "#;
        let out = RhaiSandbox::new()
            .run_transform(
                script,
                dataset(json!([{"age": 25}, {"age": 17}])),
                limits(5_000),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["age"], json!(25));
    }

    #[tokio::test]
    async fn test_transform_adds_field() {
        let script = r#"
            fn transform(data) {
                let out = [];
                for row in data {
                    row.total = row.price * row.qty;
                    out.push(row);
                }
                out
            }
        "#;
        let out = RhaiSandbox::new()
            .run_transform(
                script,
                dataset(json!([{"price": 3, "qty": 4}])),
                limits(5_000),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out[0]["total"], json!(12));
    }

    #[tokio::test]
    async fn test_missing_entry_point() {
        let err = RhaiSandbox::new()
            .run_transform("fn other(x) { x }", Vec::new(), limits(5_000), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::MissingEntryPoint));
    }

    #[tokio::test]
    async fn test_compile_error() {
        let err = RhaiSandbox::new()
            .run_transform("fn transform(data) { data +* }", Vec::new(), limits(5_000), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));
    }

    #[tokio::test]
    async fn test_thrown_error_is_runtime_error() {
        let err = RhaiSandbox::new()
            .run_transform(
                r#"fn transform(data) { throw "bad row"; }"#,
                Vec::new(),
                limits(5_000),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            SandboxError::Runtime(msg) => assert!(msg.contains("bad row")),
            other => panic!("expected Runtime, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_array_output_rejected() {
        let err = RhaiSandbox::new()
            .run_transform("fn transform(data) { 42 }", Vec::new(), limits(5_000), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let script = r#"
            fn transform(data) {
                let x = 0;
                loop { x += 1; }
            }
        "#;
        let err = RhaiSandbox::new()
            .run_transform(script, Vec::new(), limits(100), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn test_operation_budget() {
        let script = r#"
            fn transform(data) {
                let x = 0;
                loop { x += 1; }
            }
        "#;
        let err = RhaiSandbox::new()
            .run_transform(
                script,
                Vec::new(),
                ScriptLimits {
                    timeout: Duration::from_secs(30),
                    max_operations: 1_000,
                },
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(ref m) if m.contains("operation budget")));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_script() {
        let token = CancellationToken::new();
        token.cancel();
        let script = r#"
            fn transform(data) {
                let x = 0;
                loop { x += 1; }
            }
        "#;
        let err = RhaiSandbox::new()
            .run_transform(script, Vec::new(), limits(30_000), token)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Cancelled));
    }

    #[tokio::test]
    async fn test_imports_are_disabled() {
        let script = r#"
            import "secrets" as s;
            fn transform(data) { data }
        "#;
        let result = RhaiSandbox::new()
            .run_transform(script, Vec::new(), limits(5_000), CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
