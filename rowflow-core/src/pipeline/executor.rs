//! Pipeline executor: runs steps in `order`, threading the current dataset
//! through each handler and recording per-step results.
//!
//! A run is fail-fast. The first failing step marks itself and the run
//! `failed`; later steps stay `pending`. Cancellation is checked before every
//! step and inside the script sandbox.

use crate::config::ExecutorConfig;
use crate::error::{PipelineError, StepError};
use crate::pipeline::registry::ExecutionRegistry;
use crate::pipeline::steps::{self, parse_config};
use crate::pipeline::types::{
    ExecutionContext, ExecutionStatus, Pipeline, PipelineExecutionResult, StepResult, StepStatus,
    StepType, TransformStep,
};
use crate::sandbox::{RhaiSandbox, ScriptLimits, ScriptSandbox};
use crate::types::{Dataset, InputData, Record};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Executes pipelines against in-memory inputs.
pub struct PipelineExecutor {
    sandbox: Arc<dyn ScriptSandbox>,
    config: ExecutorConfig,
    registry: ExecutionRegistry,
}

impl PipelineExecutor {
    /// An executor using the Rhai sandbox for `custom_script` steps.
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_sandbox(Arc::new(RhaiSandbox::new()), config)
    }

    pub fn with_sandbox(sandbox: Arc<dyn ScriptSandbox>, config: ExecutorConfig) -> Self {
        Self {
            sandbox,
            registry: ExecutionRegistry::with_history_limit(config.execution_history),
            config,
        }
    }

    /// Share an existing registry instead of the executor's own.
    pub fn with_registry(mut self, registry: ExecutionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Request cancellation of a running execution.
    pub async fn cancel(&self, execution_id: Uuid) -> crate::error::Result<()> {
        self.registry.cancel(execution_id).await?;
        info!(%execution_id, "cancellation requested");
        Ok(())
    }

    /// Run with a fresh execution context.
    pub async fn execute(&self, pipeline: &Pipeline, input_data: &InputData) -> PipelineExecutionResult {
        let context = ExecutionContext::new(pipeline, None);
        self.execute_pipeline(pipeline, input_data, &context).await
    }

    /// Execute `pipeline` over `input_data`.
    ///
    /// Input datasets are never modified; every step works on its own copy.
    /// Failures are reported in the returned result, not as `Err`.
    #[instrument(
        skip(self, pipeline, input_data, context),
        fields(pipeline_id = %pipeline.id, execution_id = %context.execution_id)
    )]
    pub async fn execute_pipeline(
        &self,
        pipeline: &Pipeline,
        input_data: &InputData,
        context: &ExecutionContext,
    ) -> PipelineExecutionResult {
        let token = CancellationToken::new();
        self.registry
            .register(context.execution_id, &pipeline.id, token.clone())
            .await;
        info!(
            pipeline_name = %pipeline.name,
            steps = pipeline.steps.len(),
            "pipeline execution started"
        );

        let result = self.run(pipeline, input_data, context, &token).await;

        if let Err(e) = self.registry.set_status(context.execution_id, result.status).await {
            warn!(error = %e, "execution vanished from registry before completion");
        }
        match result.status {
            ExecutionStatus::Completed => info!(
                output_records = result.output_records,
                duration_ms = result.duration_ms().unwrap_or_default(),
                "pipeline execution completed"
            ),
            _ => warn!(
                error = result.error.as_deref().unwrap_or_default(),
                "pipeline execution failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        pipeline: &Pipeline,
        input_data: &InputData,
        context: &ExecutionContext,
        token: &CancellationToken,
    ) -> PipelineExecutionResult {
        let ordered = match pipeline.ordered_steps() {
            Ok(steps) => steps,
            Err(e) => {
                let pending = pipeline.steps.iter().map(StepResult::pending).collect();
                let mut result = PipelineExecutionResult::running(context, pending);
                finish_failed(&mut result, e.to_string(), "configuration");
                return result;
            }
        };
        let mut result =
            PipelineExecutionResult::running(context, ordered.iter().map(|s| StepResult::pending(s)).collect());

        let primary = match pipeline.primary_source() {
            Some(id) => id,
            None => {
                let e = PipelineError::NoInputSource {
                    pipeline: pipeline.id.clone(),
                };
                finish_failed(&mut result, e.to_string(), "configuration");
                return result;
            }
        };
        let Some(initial) = input_data.get(primary) else {
            let e = PipelineError::MissingInput {
                source_id: primary.to_string(),
            };
            finish_failed(&mut result, e.to_string(), "configuration");
            return result;
        };

        let mut current: Dataset = initial.clone();
        let mut completed_any = false;

        for (i, step) in ordered.iter().enumerate() {
            if token.is_cancelled() {
                let err = StepError::Cancelled {
                    step: step.id.clone(),
                };
                warn!(step_id = %step.id, "execution cancelled before step start");
                if completed_any {
                    result.output_data = Some(current);
                }
                finish_failed(&mut result, err.to_string(), err.kind());
                return result;
            }

            let input_records = current.len();
            result.steps[i].status = StepStatus::Running;
            result.steps[i].input_records = input_records;
            debug!(step_id = %step.id, step_type = %step.step_type, input_records, "step started");

            let started = Instant::now();
            let outcome = self.run_step(step, &current, input_data, token).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            result.steps[i].duration_ms = duration_ms;

            match outcome {
                Ok(output) => {
                    debug!(
                        step_id = %step.id,
                        output_records = output.len(),
                        duration_ms,
                        "step completed"
                    );
                    let step_result = &mut result.steps[i];
                    step_result.status = StepStatus::Completed;
                    step_result.output_records = output.len();
                    if self.config.capture_step_output {
                        step_result.output_data = Some(output.clone());
                    }
                    current = output;
                    completed_any = true;
                }
                Err(err) => {
                    warn!(step_id = %step.id, error = %err, "step failed");
                    let step_result = &mut result.steps[i];
                    step_result.status = StepStatus::Failed;
                    step_result.error = Some(err.to_string());
                    if completed_any {
                        result.output_data = Some(current);
                    }
                    finish_failed(&mut result, err.to_string(), err.kind());
                    return result;
                }
            }
        }

        result.status = ExecutionStatus::Completed;
        result.output_records = current.len();
        result.output_data = Some(current);
        result.end_time = Some(Utc::now());
        result
    }

    async fn run_step(
        &self,
        step: &TransformStep,
        data: &[Record],
        input_data: &InputData,
        token: &CancellationToken,
    ) -> Result<Dataset, StepError> {
        let id = step.id.as_str();
        match step.step_type {
            StepType::Filter => steps::filter::apply(id, &parse_config(step)?, data),
            StepType::Map => steps::map::apply(id, &parse_config(step)?, data),
            StepType::Aggregate => steps::aggregate::apply(id, &parse_config(step)?, data),
            StepType::Join => steps::join::apply(id, &parse_config(step)?, data, input_data),
            StepType::Sort => steps::sort::apply(id, &parse_config(step)?, data),
            StepType::Deduplicate => steps::dedupe::apply(id, &parse_config(step)?, data),
            StepType::CustomScript => {
                let limits = ScriptLimits {
                    timeout: self.config.script_timeout(),
                    max_operations: self.config.max_script_operations,
                };
                steps::script::apply(
                    id,
                    &parse_config(step)?,
                    data,
                    self.sandbox.as_ref(),
                    limits,
                    token.clone(),
                )
                .await
            }
        }
    }
}

fn finish_failed(result: &mut PipelineExecutionResult, error: String, kind: &str) {
    result.status = ExecutionStatus::Failed;
    result.output_records = result.output_data.as_ref().map_or(0, Vec::len);
    result.error = Some(error);
    result.error_kind = Some(kind.to_string());
    result.end_time = Some(Utc::now());
}
