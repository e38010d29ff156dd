//! Error types for the rowflow core library.
//!
//! Uses `thiserror` for structured error variants covering expression
//! evaluation, pipeline steps, pipeline validation, change data capture, and
//! configuration.

use std::path::PathBuf;
use uuid::Uuid;

/// Top-level error type for the rowflow core library.
#[derive(Debug, thiserror::Error)]
pub enum RowflowError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("CDC error: {0}")]
    Cdc(#[from] CdcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while lexing, parsing, or evaluating a row expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal starting at position {pos}")]
    UnterminatedString { pos: usize },

    #[error("invalid number literal '{literal}' at position {pos}")]
    InvalidNumber { literal: String, pos: usize },

    #[error("unexpected token '{found}' at position {pos}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        pos: usize,
    },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: String },

    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("expression nesting exceeds the maximum depth of {max}")]
    TooDeep { max: usize },
}

/// Errors from an individual transform step. This is the taxonomy reported in
/// `StepResult.error`.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("configuration error in step '{step}': {message}")]
    Configuration { step: String, message: String },

    #[error("expression error in step '{step}': {source}")]
    Expression {
        step: String,
        #[source]
        source: ExpressionError,
    },

    #[error("script execution failed in step '{step}': {message}")]
    Execution { step: String, message: String },

    #[error("script in step '{step}' timed out after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("join key '{key}' is absent from target dataset '{target}'")]
    JoinKey { key: String, target: String },

    #[error("step '{step}' was cancelled")]
    Cancelled { step: String },
}

impl StepError {
    pub fn configuration(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Configuration { .. } => "configuration",
            StepError::Expression { .. } => "expression",
            StepError::Execution { .. } => "execution",
            StepError::Timeout { .. } => "timeout",
            StepError::JoinKey { .. } => "join_key",
            StepError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Pipeline-level errors detected before or around step execution.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline '{pipeline}' declares no input sources")]
    NoInputSource { pipeline: String },

    #[error("primary input source '{source_id}' is missing from the input data")]
    MissingInput { source_id: String },

    #[error("step '{step}' has order {order}, which does not strictly increase after {previous}")]
    NonIncreasingOrder {
        step: String,
        order: i64,
        previous: i64,
    },

    #[error("duplicate step id '{step}'")]
    DuplicateStepId { step: String },

    #[error("step id must not be empty")]
    EmptyStepId,

    #[error("execution not found: {execution_id}")]
    RunNotFound { execution_id: Uuid },
}

/// Errors from change classification, merging, and watermark persistence.
#[derive(Debug, thiserror::Error)]
pub enum CdcError {
    #[error("invalid CDC configuration: {message}")]
    Configuration { message: String },

    #[error("{dataset} record at index {index} is missing primary key '{key}'")]
    KeyMissing {
        dataset: &'static str,
        index: usize,
        key: String,
    },

    #[error("{dataset} records at index {first} and {index} share primary key {key}")]
    DuplicateKey {
        dataset: &'static str,
        key: String,
        first: usize,
        index: usize,
    },

    #[error("watermark store failure: {message}")]
    Store { message: String },
}

impl CdcError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `RowflowError`.
pub type Result<T> = std::result::Result<T, RowflowError>;
