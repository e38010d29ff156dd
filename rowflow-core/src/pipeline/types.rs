//! Pipeline type definitions: pipelines, steps, execution context, and
//! per-step / per-run results.

use crate::error::PipelineError;
use crate::types::Dataset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// A named, ordered sequence of transform steps over named input datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<TransformStep>,
    /// Dataset names consumed by the pipeline. The first is the primary input.
    #[serde(default)]
    pub input_source_ids: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            input_source_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_input(mut self, source_id: impl Into<String>) -> Self {
        self.input_source_ids.push(source_id.into());
        self
    }

    pub fn with_step(mut self, step: TransformStep) -> Self {
        self.steps.push(step);
        self.updated_at = Utc::now();
        self
    }

    /// The dataset the first step reads from.
    pub fn primary_source(&self) -> Option<&str> {
        self.input_source_ids.first().map(String::as_str)
    }

    /// Check step ids and `order` values without running anything.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.ordered_steps().map(|_| ())
    }

    /// Steps in execution order, after checking ids and `order` values.
    ///
    /// `order` is authoritative: steps are sorted by it, and two steps sharing
    /// an `order` value are rejected.
    pub fn ordered_steps(&self) -> Result<Vec<&TransformStep>, PipelineError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(PipelineError::EmptyStepId);
            }
            if !seen.insert(step.id.as_str()) {
                return Err(PipelineError::DuplicateStepId {
                    step: step.id.clone(),
                });
            }
        }

        let mut ordered: Vec<&TransformStep> = self.steps.iter().collect();
        ordered.sort_by_key(|s| s.order);
        for pair in ordered.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(PipelineError::NonIncreasingOrder {
                    step: pair[1].id.clone(),
                    order: pair[1].order,
                    previous: pair[0].order,
                });
            }
        }
        Ok(ordered)
    }
}

/// The kind of a transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Filter,
    Map,
    Aggregate,
    Join,
    Sort,
    Deduplicate,
    CustomScript,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepType::Filter => write!(f, "filter"),
            StepType::Map => write!(f, "map"),
            StepType::Aggregate => write!(f, "aggregate"),
            StepType::Join => write!(f, "join"),
            StepType::Sort => write!(f, "sort"),
            StepType::Deduplicate => write!(f, "deduplicate"),
            StepType::CustomScript => write!(f, "custom_script"),
        }
    }
}

/// One typed operation in a pipeline. `config` is interpreted per `step_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub name: String,
    pub order: i64,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl TransformStep {
    pub fn new(id: impl Into<String>, step_type: StepType, order: i64, config: serde_json::Value) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type,
            order,
            config,
        }
    }
}

/// Immutable identity of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub pipeline_id: String,
    pub pipeline_name: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub start_time: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create a context with a fresh execution id.
    pub fn new(pipeline: &Pipeline, project_id: Option<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            pipeline_id: pipeline.id.clone(),
            pipeline_name: pipeline.name.clone(),
            project_id,
            start_time: Utc::now(),
        }
    }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub step_name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub input_records: usize,
    pub output_records: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The step's output, kept for tester/preview callers when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Dataset>,
}

impl StepResult {
    pub fn pending(step: &TransformStep) -> Self {
        Self {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            step_type: step.step_type,
            status: StepStatus::Pending,
            input_records: 0,
            output_records: 0,
            duration_ms: 0,
            error: None,
            output_data: None,
        }
    }
}

/// Status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Structured result of `execute_pipeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecutionResult {
    pub execution_id: Uuid,
    pub pipeline_id: String,
    pub status: ExecutionStatus,
    pub steps: Vec<StepResult>,
    pub output_records: usize,
    /// Output of the last successfully completed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Dataset>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error kind (`configuration`, `expression`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl PipelineExecutionResult {
    pub(crate) fn running(context: &ExecutionContext, steps: Vec<StepResult>) -> Self {
        Self {
            execution_id: context.execution_id,
            pipeline_id: context.pipeline_id.clone(),
            status: ExecutionStatus::Running,
            steps,
            output_records: 0,
            output_data: None,
            start_time: context.start_time,
            end_time: None,
            error: None,
            error_kind: None,
        }
    }

    /// Look up a step result by step id.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Wall-clock duration of the run, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, order: i64) -> TransformStep {
        TransformStep::new(id, StepType::Sort, order, json!({}))
    }

    #[test]
    fn test_pipeline_deserializes_camel_case() {
        let pipeline: Pipeline = serde_json::from_value(json!({
            "id": "p1",
            "name": "Adults",
            "inputSourceIds": ["people"],
            "steps": [{
                "id": "s1",
                "type": "filter",
                "name": "adults only",
                "order": 1,
                "config": {"filterExpression": "row.age >= 18"}
            }]
        }))
        .unwrap();
        assert_eq!(pipeline.primary_source(), Some("people"));
        assert_eq!(pipeline.steps[0].step_type, StepType::Filter);
        assert_eq!(pipeline.steps[0].config["filterExpression"], "row.age >= 18");
    }

    #[test]
    fn test_ordered_steps_uses_order_not_position() {
        let pipeline = Pipeline::new("p", "p")
            .with_step(step("third", 30))
            .with_step(step("first", 10))
            .with_step(step("second", 20));
        let ids: Vec<&str> = pipeline
            .ordered_steps()
            .unwrap()
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_ordered_steps_rejects_duplicate_order() {
        let pipeline = Pipeline::new("p", "p")
            .with_step(step("a", 1))
            .with_step(step("b", 1));
        assert!(matches!(
            pipeline.ordered_steps().unwrap_err(),
            PipelineError::NonIncreasingOrder { .. }
        ));
    }

    #[test]
    fn test_ordered_steps_rejects_duplicate_id() {
        let pipeline = Pipeline::new("p", "p")
            .with_step(step("a", 1))
            .with_step(step("a", 2));
        assert!(matches!(
            pipeline.ordered_steps().unwrap_err(),
            PipelineError::DuplicateStepId { .. }
        ));
    }

    #[test]
    fn test_step_type_display_matches_serde() {
        for t in [
            StepType::Filter,
            StepType::Map,
            StepType::Aggregate,
            StepType::Join,
            StepType::Sort,
            StepType::Deduplicate,
            StepType::CustomScript,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{t}\""));
        }
    }

    #[test]
    fn test_execution_context_ids_are_unique() {
        let pipeline = Pipeline::new("p", "p");
        let a = ExecutionContext::new(&pipeline, None);
        let b = ExecutionContext::new(&pipeline, None);
        assert_ne!(a.execution_id, b.execution_id);
        assert_eq!(a.pipeline_id, "p");
    }
}
