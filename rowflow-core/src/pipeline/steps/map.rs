use crate::error::StepError;
use crate::expression::{Bindings, Expression};
use crate::types::{Dataset, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One output field of a `map` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    /// Expression evaluated with `value` bound to the source field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub field_mappings: Vec<FieldMapping>,
}

struct CompiledMapping<'a> {
    from: Option<&'a str>,
    to: &'a str,
    transform: Option<Expression>,
}

/// Project every row onto the mapped fields. Unmapped fields are dropped.
pub fn apply(step_id: &str, config: &MapConfig, data: &[Record]) -> Result<Dataset, StepError> {
    let mut compiled = Vec::with_capacity(config.field_mappings.len());
    for mapping in &config.field_mappings {
        if mapping.to.is_empty() {
            return Err(StepError::configuration(step_id, "field mapping has an empty `to`"));
        }
        let transform = match mapping.transform.as_deref().map(str::trim) {
            Some(src) if !src.is_empty() => {
                Some(Expression::parse(src).map_err(|source| StepError::Expression {
                    step: step_id.to_string(),
                    source,
                })?)
            }
            _ => None,
        };
        compiled.push(CompiledMapping {
            from: mapping.from.as_deref(),
            to: &mapping.to,
            transform,
        });
    }

    let null = Value::Null;
    let mut out = Vec::with_capacity(data.len());
    for row in data {
        let mut record = Record::new();
        for mapping in &compiled {
            let source = mapping.from.and_then(|f| row.get(f)).unwrap_or(&null);
            let value = match &mapping.transform {
                Some(expr) => expr
                    .evaluate(&Bindings::new().with_value("value", source))
                    .map_err(|source| StepError::Expression {
                        step: step_id.to_string(),
                        source,
                    })?,
                None => source.clone(),
            };
            record.insert(mapping.to.to_string(), value);
        }
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::dataset_from_value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mapping(from: Option<&str>, to: &str, transform: Option<&str>) -> FieldMapping {
        FieldMapping {
            from: from.map(String::from),
            to: to.to_string(),
            transform: transform.map(String::from),
        }
    }

    #[test]
    fn test_map_renames_and_projects() {
        let data =
            dataset_from_value(json!([{"firstName": "John", "lastName": "Doe", "age": 25, "extra": true}]))
                .unwrap();
        let config = MapConfig {
            field_mappings: vec![
                mapping(Some("firstName"), "first_name", None),
                mapping(Some("lastName"), "last_name", None),
                mapping(Some("age"), "years_old", Some("value * 1")),
            ],
        };
        let out = apply("m", &config, &data).unwrap();
        assert_eq!(
            serde_json::Value::Object(out[0].clone()),
            json!({"first_name": "John", "last_name": "Doe", "years_old": 25})
        );
    }

    #[test]
    fn test_map_field_order_follows_mappings() {
        let data = dataset_from_value(json!([{"a": 1, "b": 2}])).unwrap();
        let config = MapConfig {
            field_mappings: vec![mapping(Some("b"), "second", None), mapping(Some("a"), "first", None)],
        };
        let out = apply("m", &config, &data).unwrap();
        let keys: Vec<&String> = out[0].keys().collect();
        assert_eq!(keys, vec!["second", "first"]);
    }

    #[test]
    fn test_map_missing_source_and_constant_transform() {
        let data = dataset_from_value(json!([{"a": 1}])).unwrap();
        let config = MapConfig {
            field_mappings: vec![
                mapping(Some("missing"), "copied", None),
                mapping(None, "constant", Some("'fixed'")),
                mapping(None, "nothing", None),
            ],
        };
        let out = apply("m", &config, &data).unwrap();
        assert_eq!(out[0]["copied"], Value::Null);
        assert_eq!(out[0]["constant"], json!("fixed"));
        assert_eq!(out[0]["nothing"], Value::Null);
    }

    #[test]
    fn test_map_string_transform() {
        let data = dataset_from_value(json!([{"email": "  Ada@Example.COM "}])).unwrap();
        let config = MapConfig {
            field_mappings: vec![mapping(Some("email"), "email", Some("lower(trim(value))"))],
        };
        let out = apply("m", &config, &data).unwrap();
        assert_eq!(out[0]["email"], json!("ada@example.com"));
    }

    #[test]
    fn test_map_bad_transform_is_expression_error() {
        let config = MapConfig {
            field_mappings: vec![mapping(Some("a"), "b", Some("value +"))],
        };
        assert_eq!(apply("m", &config, &[]).unwrap_err().kind(), "expression");
    }

    #[test]
    fn test_map_row_binding_is_not_visible() {
        let data = dataset_from_value(json!([{"a": 1}])).unwrap();
        let config = MapConfig {
            field_mappings: vec![mapping(Some("a"), "b", Some("row.a"))],
        };
        assert_eq!(apply("m", &config, &data).unwrap_err().kind(), "expression");
    }
}
