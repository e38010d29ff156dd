//! # Rowflow Core
//!
//! Pipeline execution engine and change-data-capture engine for schema-less,
//! in-memory datasets. Provides ordered transform steps (filter, map,
//! aggregate, join, sort, deduplicate, custom script), a row expression
//! language, a sandboxed script runtime, and hash/timestamp/version change
//! classification with merge policies.

pub mod cdc;
pub mod config;
pub mod error;
pub mod expression;
pub mod persistence;
pub mod pipeline;
pub mod sandbox;
pub mod types;

// Re-export commonly used types at the crate root.
pub use cdc::{
    CdcConfig, CdcManager, ChangeSet, ChangeStats, ConflictResolution, FileWatermarkStore,
    InMemoryWatermarkStore, MergeStrategy, SyncResult, TrackingMode, Watermark, WatermarkStore,
};
pub use config::{CdcSettings, ExecutorConfig, RowflowConfig, load_config, load_config_with_file};
pub use error::{CdcError, ConfigError, ExpressionError, PipelineError, Result, RowflowError, StepError};
pub use expression::{Bindings, Expression};
pub use pipeline::{
    ExecutionContext, ExecutionRegistry, ExecutionStatus, Pipeline, PipelineExecutionResult,
    PipelineExecutor, StepResult, StepStatus, StepType, TransformStep,
};
pub use sandbox::{RhaiSandbox, ScriptLimits, ScriptSandbox};
pub use types::{Dataset, InputData, Record};
