//! Grouped aggregation.
//!
//! Groups appear in the output in the order their first row appears in the
//! input. Each output row holds the group-by fields (taken from the group's
//! first row) followed by one `{field}_{operation}` field per aggregation.
//!
//! Empty-set results: `count` and `sum` yield `0`; `avg`, `min` and `max`
//! yield `null`. Only JSON numbers take part in `sum`/`avg`/`min`/`max`.

use crate::error::StepError;
use crate::types::{Dataset, Record, as_number, canonical_fields_key, compare_values, number_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOperation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl fmt::Display for AggregateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateOperation::Sum => write!(f, "sum"),
            AggregateOperation::Avg => write!(f, "avg"),
            AggregateOperation::Count => write!(f, "count"),
            AggregateOperation::Min => write!(f, "min"),
            AggregateOperation::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub field: String,
    pub operation: AggregateOperation,
}

impl Aggregation {
    pub fn output_field(&self) -> String {
        format!("{}_{}", self.field, self.operation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateConfig {
    #[serde(default)]
    pub group_by: Vec<String>,
    pub aggregations: Vec<Aggregation>,
}

/// Running state for one aggregation within one group.
#[derive(Debug, Default)]
struct Accumulator {
    non_null: usize,
    numeric: usize,
    int_sum: Option<i64>,
    float_sum: f64,
    all_int: bool,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            int_sum: Some(0),
            all_int: true,
            ..Default::default()
        }
    }

    fn push(&mut self, value: Option<&Value>) {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return;
        };
        self.non_null += 1;

        let Some(f) = as_number(value) else {
            return;
        };
        self.numeric += 1;
        self.float_sum += f;
        match value.as_i64() {
            Some(i) if self.all_int => self.int_sum = self.int_sum.and_then(|s| s.checked_add(i)),
            _ => self.all_int = false,
        }

        if self
            .min
            .as_ref()
            .is_none_or(|m| compare_values(value, m) == Ordering::Less)
        {
            self.min = Some(value.clone());
        }
        if self
            .max
            .as_ref()
            .is_none_or(|m| compare_values(value, m) == Ordering::Greater)
        {
            self.max = Some(value.clone());
        }
    }

    fn sum(&self) -> Value {
        match (self.all_int, self.int_sum) {
            (true, Some(i)) => Value::from(i),
            _ => number_value(self.float_sum),
        }
    }

    fn finish(&self, op: AggregateOperation) -> Value {
        match op {
            AggregateOperation::Count => Value::from(self.non_null as u64),
            AggregateOperation::Sum => self.sum(),
            AggregateOperation::Avg if self.numeric == 0 => Value::Null,
            AggregateOperation::Avg => number_value(self.float_sum / self.numeric as f64),
            AggregateOperation::Min => self.min.clone().unwrap_or(Value::Null),
            AggregateOperation::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

struct Group<'a> {
    first: &'a Record,
    accumulators: Vec<Accumulator>,
}

pub fn apply(step_id: &str, config: &AggregateConfig, data: &[Record]) -> Result<Dataset, StepError> {
    if config.aggregations.is_empty() && config.group_by.is_empty() {
        return Err(StepError::configuration(
            step_id,
            "aggregate needs at least one groupBy field or aggregation",
        ));
    }
    if let Some(agg) = config.aggregations.iter().find(|a| a.field.is_empty()) {
        return Err(StepError::configuration(
            step_id,
            format!("{} aggregation has an empty field", agg.operation),
        ));
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();
    for row in data {
        let key = canonical_fields_key(row, &config.group_by);
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Group {
                first: row,
                accumulators: config.aggregations.iter().map(|_| Accumulator::new()).collect(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        for (acc, agg) in group.accumulators.iter_mut().zip(&config.aggregations) {
            acc.push(row.get(&agg.field));
        }
    }

    // A whole-dataset aggregate still reports over an empty input.
    if config.group_by.is_empty() && groups.is_empty() {
        let empty: Vec<Accumulator> = config.aggregations.iter().map(|_| Accumulator::new()).collect();
        let mut record = Record::new();
        for (acc, agg) in empty.iter().zip(&config.aggregations) {
            record.insert(agg.output_field(), acc.finish(agg.operation));
        }
        return Ok(vec![record]);
    }

    let out = groups
        .iter()
        .map(|group| {
            let mut record = Record::new();
            for field in &config.group_by {
                record.insert(
                    field.clone(),
                    group.first.get(field).cloned().unwrap_or(Value::Null),
                );
            }
            for (acc, agg) in group.accumulators.iter().zip(&config.aggregations) {
                record.insert(agg.output_field(), acc.finish(agg.operation));
            }
            record
        })
        .collect();
    Ok(out)
}
