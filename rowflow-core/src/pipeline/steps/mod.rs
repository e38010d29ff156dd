//! Step handlers, one module per step type.
//!
//! Every synchronous handler is a pure function of the current dataset (and,
//! for `join`, the named inputs) plus its typed config. Handlers borrow their
//! input and build a fresh output, so the executor can keep the last good
//! dataset when a step fails.

pub mod aggregate;
pub mod dedupe;
pub mod filter;
pub mod join;
pub mod map;
pub mod script;
pub mod sort;

pub use aggregate::{AggregateConfig, AggregateOperation, Aggregation};
pub use dedupe::DedupeConfig;
pub use filter::FilterConfig;
pub use join::{JoinConfig, JoinType};
pub use map::{FieldMapping, MapConfig};
pub use script::ScriptConfig;
pub use sort::{SortConfig, SortDirection, SortField};

use crate::error::StepError;
use crate::pipeline::types::TransformStep;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a step's untyped `config` into its typed form.
///
/// A missing config (`null`) decodes as an empty object so that steps whose
/// fields are all optional accept it.
pub fn parse_config<T: DeserializeOwned>(step: &TransformStep) -> Result<T, StepError> {
    let raw = match &step.config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(raw).map_err(|e| {
        StepError::configuration(&step.id, format!("invalid {} config: {e}", step.step_type))
    })
}
