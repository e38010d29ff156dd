use crate::error::StepError;
use crate::types::{Dataset, Record, compare_fields};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    pub sort_fields: Vec<SortField>,
}

/// Stable lexicographic sort over `sortFields`. Rows that compare equal on
/// every field keep their input order.
pub fn apply(step_id: &str, config: &SortConfig, data: &[Record]) -> Result<Dataset, StepError> {
    if config.sort_fields.iter().any(|f| f.field.is_empty()) {
        return Err(StepError::configuration(step_id, "sort field name is empty"));
    }

    let mut out = data.to_vec();
    out.sort_by(|a, b| {
        for key in &config.sort_fields {
            let ord = compare_fields(a.get(&key.field), b.get(&key.field));
            let ord = match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(out)
}
