use crate::error::StepError;
use crate::expression::{Bindings, Expression};
use crate::types::{Dataset, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub filter_expression: String,
}

/// Keep the rows for which `filterExpression` is truthy, with the row bound
/// as `row`.
pub fn apply(step_id: &str, config: &FilterConfig, data: &[Record]) -> Result<Dataset, StepError> {
    if config.filter_expression.trim().is_empty() {
        return Err(StepError::configuration(step_id, "filterExpression is empty"));
    }
    let expr = Expression::parse(&config.filter_expression).map_err(|source| StepError::Expression {
        step: step_id.to_string(),
        source,
    })?;

    let mut out = Vec::with_capacity(data.len());
    for row in data {
        let keep = expr
            .evaluate_truthy(&Bindings::new().with_record("row", row))
            .map_err(|source| StepError::Expression {
                step: step_id.to_string(),
                source,
            })?;
        if keep {
            out.push(row.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::dataset_from_value;
    use serde_json::json;

    fn config(expr: &str) -> FilterConfig {
        FilterConfig {
            filter_expression: expr.to_string(),
        }
    }

    #[test]
    fn test_filter_adults() {
        let data = dataset_from_value(json!([{"age": 25}, {"age": 17}, {"age": 30}])).unwrap();
        let out = apply("f", &config("row.age >= 18"), &data).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r["age"].as_i64().unwrap() >= 18));
    }

    #[test]
    fn test_filter_missing_field_drops_row() {
        let data = dataset_from_value(json!([{"age": 25}, {"name": "x"}])).unwrap();
        let out = apply("f", &config("row.age > 1"), &data).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_malformed_expression_fails_step() {
        let data = dataset_from_value(json!([{"age": 25}])).unwrap();
        let err = apply("f", &config("row.age >="), &data).unwrap_err();
        assert_eq!(err.kind(), "expression");
    }

    #[test]
    fn test_malformed_expression_fails_even_on_empty_input() {
        let err = apply("f", &config("(("), &[]).unwrap_err();
        assert_eq!(err.kind(), "expression");
    }

    #[test]
    fn test_long_generated_expression_is_rejected() {
        let data = dataset_from_value(json!([{"a": 1}])).unwrap();
        let long = vec!["row.a"; 10_000].join(" + ") + " > 0";
        let err = apply("f", &config(&long), &data).unwrap_err();
        assert!(matches!(
            err,
            StepError::Expression {
                source: crate::error::ExpressionError::TooDeep { .. },
                ..
            }
        ));

        let short = vec!["row.a"; 60].join(" + ") + " > 0";
        assert_eq!(apply("f", &config(&short), &data).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_expression_is_configuration_error() {
        let err = apply("f", &config("  "), &[]).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_unbound_identifier_is_expression_error() {
        let data = dataset_from_value(json!([{"age": 25}])).unwrap();
        let err = apply("f", &config("process.env"), &data).unwrap_err();
        assert_eq!(err.kind(), "expression");
    }
}
