//! Row validation against a record schema.
//!
//! A row either coerces into a typed record (schema field order, schema keys only)
//! or is served as it came from the store. A row is never dropped for failing.

use serde_json::{Number, Value};
use tracing::warn;

use super::RecordSchema;
use crate::catalog::Row;
use crate::error::RowValidationError;
use crate::typemap::{DefaultValue, FieldDescriptor, FieldKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Validated {
    Typed(Row),
    /// Failed coercion; carried unchanged.
    Raw(Row),
}

impl Validated {
    pub fn is_typed(&self) -> bool { matches!(self, Validated::Typed(_)) }

    pub fn into_value(self) -> Value {
        match self {
            Validated::Typed(r) | Validated::Raw(r) => Value::Object(r),
        }
    }
}

pub fn coerce_row(schema: &RecordSchema, row: &Row) -> Result<Row, RowValidationError> {
    let mut out = Row::new();
    for (name, fd) in &schema.fields {
        let value = match row.get(name) {
            Some(v) => coerce_value(name, fd, v)?,
            None => match &fd.default {
                DefaultValue::Value(v) => v.clone(),
                DefaultValue::Null => Value::Null,
                DefaultValue::Unset if fd.nullable => Value::Null,
                DefaultValue::Unset => return Err(RowValidationError::Missing { field: name.clone() }),
            },
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}

/// Coerce every row, degrading failures to their raw form.
pub fn validate_rows(schema: &RecordSchema, rows: Vec<Row>) -> Vec<Validated> {
    rows.into_iter()
        .map(|row| match coerce_row(schema, &row) {
            Ok(typed) => Validated::Typed(typed),
            Err(e) => {
                warn!(target: "tableserve::http", table = %schema.table_name, "Validation error for {}: {}", schema.table_name, e);
                Validated::Raw(row)
            }
        })
        .collect()
}

fn type_name(v: &Value) -> String {
    match v {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string '{}'", s),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

fn coerce_value(field: &str, fd: &FieldDescriptor, v: &Value) -> Result<Value, RowValidationError> {
    if v.is_null() {
        return if fd.nullable { Ok(Value::Null) } else { Err(RowValidationError::NullNotAllowed { field: field.to_string() }) };
    }
    let mismatch = || RowValidationError::Mismatch { field: field.to_string(), expected: fd.kind.as_str(), got: type_name(v) };
    match fd.kind {
        FieldKind::Integer => as_integer(v).map(Value::from).ok_or_else(mismatch),
        FieldKind::Float => as_float(v).and_then(Number::from_f64).map(Value::Number).ok_or_else(mismatch),
        FieldKind::Boolean => as_bool(v).map(Value::Bool).ok_or_else(mismatch),
        FieldKind::String => {
            let s = match v {
                Value::String(s) => s.clone(),
                // lossy: anything else is carried as its textual form
                other => other.to_string(),
            };
            if let Some(max) = fd.max_length {
                let len = s.chars().count();
                if len > max as usize {
                    return Err(RowValidationError::TooLong { field: field.to_string(), len, max });
                }
            }
            Ok(Value::String(s))
        }
        FieldKind::Bytes => match v {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Array(items) => {
                let bytes: Option<Vec<u8>> = items.iter().map(|b| b.as_u64().and_then(|n| u8::try_from(n).ok())).collect();
                bytes.map(|b| Value::String(String::from_utf8_lossy(&b).into_owned())).ok_or_else(mismatch)
            }
            _ => Err(mismatch()),
        },
        FieldKind::Json => match v {
            Value::String(s) => Ok(serde_json::from_str::<Value>(s).unwrap_or_else(|_| Value::String(s.clone()))),
            other => Ok(other.clone()),
        },
    }
}

fn as_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64().filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64).map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" | "y" | "on" => Some(true),
            "f" | "false" | "0" | "no" | "n" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
#[path = "coerce_tests.rs"]
mod coerce_tests;
