//! Pipeline execution engine.
//!
//! A pipeline is an ordered list of typed transform steps applied to a
//! primary input dataset, with `join` steps reading additional named inputs.

pub mod executor;
pub mod registry;
pub mod steps;
pub mod types;

pub use executor::PipelineExecutor;
pub use registry::{ExecutionEntry, ExecutionRegistry};
pub use types::{
    ExecutionContext, ExecutionStatus, Pipeline, PipelineExecutionResult, StepResult, StepStatus,
    StepType, TransformStep,
};
