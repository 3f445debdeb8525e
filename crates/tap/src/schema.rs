//! Schema inference over sampled rows
//!
//! The inferred field set is the union of field names across the sample;
//! a field missing from some rows is still included and every field is
//! nullable. Per-field types are chosen by the narrowest interpretation
//! that fits every observed value. Values decode as strings, so each
//! property also records the conversion the loader should apply.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::config::parse_timestamp;
use crate::format::Row;

/// Metadata fields attached to every emitted record, describing where
/// the row came from.
pub const LINEAGE_FIELDS: &[(&str, &str)] = &[
    ("_email_source_address", "string"),
    ("_email_source_file", "string"),
    ("_email_source_lineno", "integer"),
];

/// Narrowest type that fits every observed value of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Number,
    DateTime,
    String,
}

impl FieldType {
    fn as_str(self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::DateTime => "date-time",
            FieldType::String => "string",
        }
    }
}

/// Infer a field's type from its observed values: all integral →
/// integer, else all numeric → number, else all timestamps →
/// date-time, else string. An empty value set is a plain string.
pub fn infer_field_type<'a>(values: impl Iterator<Item = &'a str>) -> FieldType {
    let mut any = false;
    let mut all_integral = true;
    let mut all_numeric = true;
    let mut all_timestamps = true;

    for value in values {
        any = true;
        all_integral = all_integral && value.parse::<i64>().is_ok();
        all_numeric = all_numeric && value.parse::<f64>().is_ok();
        all_timestamps = all_timestamps && parse_timestamp(value).is_ok();
    }

    if !any {
        return FieldType::String;
    }
    if all_integral {
        FieldType::Integer
    } else if all_numeric {
        FieldType::Number
    } else if all_timestamps {
        FieldType::DateTime
    } else {
        FieldType::String
    }
}

/// Build the property map for a sample of rows. Every property is
/// `{"type": ["null", t], "_conversion_type": t}`.
pub fn infer_properties(rows: &[Row]) -> Map<String, Value> {
    // BTreeMap keeps the field order stable across runs
    let mut by_field: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for row in rows {
        for (field, value) in row {
            let values = by_field.entry(field.as_str()).or_default();
            if let Value::String(s) = value {
                values.push(s.as_str());
            }
        }
    }

    by_field
        .into_iter()
        .map(|(field, values)| {
            let field_type = infer_field_type(values.into_iter()).as_str();
            (
                field.to_string(),
                json!({"type": ["null", field_type], "_conversion_type": field_type}),
            )
        })
        .collect()
}

/// Merge explicit per-field overrides over inferred properties.
/// Objects merge recursively, key by key; anything else replaces.
pub fn merge_overrides(properties: &mut Map<String, Value>, overrides: &Value) {
    if let Value::Object(overrides) = overrides {
        for (key, value) in overrides {
            match (properties.get_mut(key), value) {
                (Some(Value::Object(existing)), Value::Object(_)) => {
                    merge_overrides(existing, value);
                }
                _ => {
                    properties.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Append the lineage metadata properties.
pub fn add_lineage_properties(properties: &mut Map<String, Value>) {
    for (field, field_type) in LINEAGE_FIELDS {
        properties.insert(
            field.to_string(),
            json!({"type": ["null", field_type], "_conversion_type": field_type}),
        );
    }
}

/// Full object schema for a table: inferred from the sample, explicit
/// overrides merged over it, lineage properties appended.
pub fn generate_schema(rows: &[Row], overrides: Option<&Value>) -> Value {
    let mut properties = infer_properties(rows);
    if let Some(overrides) = overrides {
        merge_overrides(&mut properties, overrides);
    }
    add_lineage_properties(&mut properties);
    json!({"type": "object", "properties": properties})
}
