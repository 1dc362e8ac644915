//! Declared column type -> portable field kind.
//!
//! Matching is substring-based on the lower-cased declared type and the families are
//! tried in a fixed order; the first hit wins regardless of where the token sits in
//! the type string. Anything unrecognised is carried as a string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ColumnDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    String,
    Bytes,
    Json,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::Json => "json",
        }
    }
}

/// Column default as seen by the record schema.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// No default: the field is required unless nullable.
    Unset,
    Null,
    Value(Value),
}

impl DefaultValue {
    pub fn is_set(&self) -> bool { !matches!(self, DefaultValue::Unset) }

    pub fn to_json(&self) -> Option<Value> {
        match self {
            DefaultValue::Unset => None,
            DefaultValue::Null => Some(Value::Null),
            DefaultValue::Value(v) => Some(v.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub kind: FieldKind,
    pub nullable: bool,
    pub default: DefaultValue,
    pub max_length: Option<u32>,
    pub description: String,
}

const INTEGER_FAMILY: &[&str] = &["int", "integer", "bigint", "smallint", "tinyint"];
const FLOAT_FAMILY: &[&str] = &["float", "double", "decimal", "numeric"];
const TEXT_FAMILY: &[&str] = &["varchar", "char", "text", "longtext", "mediumtext", "tinytext"];
const TEMPORAL_FAMILY: &[&str] = &["date", "time", "datetime", "timestamp"];
const BINARY_FAMILY: &[&str] = &["blob", "binary", "varbinary"];

static VARCHAR_LEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"varchar\((\d+)\)").expect("static regex"));

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify a declared type. Returns the kind plus the `varchar(N)` length when present.
pub fn map_type(declared_type: &str) -> (FieldKind, Option<u32>) {
    let lower = declared_type.to_lowercase();
    if contains_any(&lower, INTEGER_FAMILY) {
        // single-bit integer is the boolean convention
        if lower.contains("tinyint(1)") {
            return (FieldKind::Boolean, None);
        }
        return (FieldKind::Integer, None);
    }
    if contains_any(&lower, FLOAT_FAMILY) {
        return (FieldKind::Float, None);
    }
    if contains_any(&lower, TEXT_FAMILY) {
        let max_length = VARCHAR_LEN
            .captures(&lower)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        return (FieldKind::String, max_length);
    }
    if contains_any(&lower, TEMPORAL_FAMILY) {
        return (FieldKind::String, None);
    }
    if lower.contains("boolean") {
        return (FieldKind::Boolean, None);
    }
    if lower.contains("json") {
        return (FieldKind::Json, None);
    }
    if contains_any(&lower, BINARY_FAMILY) {
        return (FieldKind::Bytes, None);
    }
    (FieldKind::String, None)
}

/// Best-effort conversion of a catalog default into the field's kind. Never fails:
/// an unparseable default is kept as its raw string.
pub fn parse_default(raw: Option<&str>, kind: FieldKind, nullable: bool) -> DefaultValue {
    let raw = match raw {
        Some(r) if r != "NULL" => r,
        _ => return if nullable { DefaultValue::Null } else { DefaultValue::Unset },
    };
    let parsed = match kind {
        FieldKind::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
        FieldKind::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        FieldKind::Boolean => raw.trim().parse::<i64>().ok().map(|n| Value::Bool(n != 0)),
        FieldKind::String | FieldKind::Bytes | FieldKind::Json => Some(Value::String(raw.to_string())),
    };
    DefaultValue::Value(parsed.unwrap_or_else(|| Value::String(raw.to_string())))
}

/// Full descriptor for one catalog column.
pub fn describe_field(column: &ColumnDescriptor) -> FieldDescriptor {
    let (kind, max_length) = map_type(&column.declared_type);
    FieldDescriptor {
        kind,
        nullable: column.nullable,
        default: parse_default(column.default_raw.as_deref(), kind, column.nullable),
        max_length,
        description: format!("Column: {} ({})", column.name, column.declared_type),
    }
}

#[cfg(test)]
#[path = "typemap_tests.rs"]
mod typemap_tests;
