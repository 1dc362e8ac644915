//! Record schemas: one per table, built from catalog column metadata.
//!
//! A schema is plain data (ordered field name -> descriptor). Rows are checked against
//! it at request time by [`coerce::coerce_row`]. The [`SchemaRegistry`] holding every
//! built schema is assembled during startup and frozen before any request sees it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::catalog::ColumnDescriptor;
use crate::error::SchemaBuildError;
use crate::tprintln;
use crate::typemap::{describe_field, FieldDescriptor, FieldKind};

pub mod coerce;

pub use coerce::{coerce_row, validate_rows, Validated};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub table_name: String,
    /// Display identifier, e.g. `order_items` -> `OrderItems`.
    pub model_name: String,
    /// Catalog column order.
    pub fields: Vec<(String, FieldDescriptor)>,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Document form served by the table schema endpoint.
    pub fn to_json(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|(name, f)| {
                let mut obj = serde_json::Map::new();
                obj.insert("name".into(), json!(name));
                obj.insert("kind".into(), json!(f.kind.as_str()));
                obj.insert("nullable".into(), json!(f.nullable));
                if let Some(d) = f.default.to_json() {
                    obj.insert("default".into(), d);
                }
                if let Some(n) = f.max_length {
                    obj.insert("maxLength".into(), json!(n));
                }
                obj.insert("description".into(), json!(f.description));
                Value::Object(obj)
            })
            .collect();
        json!({"tableName": self.table_name, "modelName": self.model_name, "fields": fields})
    }

    /// OpenAPI 3.0 object schema for one record of this table. Non-nullable fields
    /// without a default are required.
    pub fn to_openapi_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = vec![];

        for (name, f) in &self.fields {
            let mut prop = match f.kind {
                FieldKind::Integer => json!({"type": "integer", "format": "int64"}),
                FieldKind::Float => json!({"type": "number", "format": "double"}),
                FieldKind::Boolean => json!({"type": "boolean"}),
                FieldKind::String | FieldKind::Bytes => json!({"type": "string"}),
                // any JSON value
                FieldKind::Json => json!({}),
            };
            prop["description"] = json!(f.description);
            if f.nullable {
                prop["nullable"] = Value::Bool(true);
            }
            if let Some(n) = f.max_length {
                prop["maxLength"] = json!(n);
            }
            if let Some(d) = f.default.to_json() {
                prop["default"] = d;
            }
            if !f.nullable && !f.default.is_set() {
                required.push(name.clone());
            }
            properties.insert(name.clone(), prop);
        }

        let mut schema = json!({
            "title": self.model_name,
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }
}

/// Split on `_` and capitalise each segment. Only used for display identifiers.
pub fn display_name(table: &str) -> String {
    table
        .split('_')
        .map(|seg| {
            let mut chars = seg.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Build the record schema for `table`. A table without columns is rejected, as is a
/// column list repeating a name.
pub fn build(table: &str, columns: &[ColumnDescriptor]) -> Result<RecordSchema, SchemaBuildError> {
    if columns.is_empty() {
        return Err(SchemaBuildError::NoColumns { table: table.to_string() });
    }
    let mut seen: HashSet<&str> = HashSet::with_capacity(columns.len());
    let mut fields = Vec::with_capacity(columns.len());
    for c in columns {
        if !seen.insert(c.name.as_str()) {
            return Err(SchemaBuildError::DuplicateField { table: table.to_string(), field: c.name.clone() });
        }
        let fd = describe_field(c);
        tprintln!("[SCHEMA] {}.{}: '{}' -> {:?} nullable={} max_length={:?}", table, c.name, c.declared_type, fd.kind, fd.nullable, fd.max_length);
        fields.push((c.name.clone(), fd));
    }
    Ok(RecordSchema { table_name: table.to_string(), model_name: display_name(table), fields })
}

/// Collects schemas during startup. Inserting a table twice replaces the earlier schema.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: BTreeMap<String, Arc<RecordSchema>>,
}

impl SchemaRegistryBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, schema: RecordSchema) -> Option<Arc<RecordSchema>> {
        self.schemas.insert(schema.table_name.clone(), Arc::new(schema))
    }

    pub fn freeze(self) -> SchemaRegistry {
        SchemaRegistry { schemas: self.schemas }
    }
}

/// Read-only snapshot of every synthesized table schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<RecordSchema>>,
}

impl SchemaRegistry {
    pub fn empty() -> Self { Self::default() }

    pub fn get(&self, table: &str) -> Option<Arc<RecordSchema>> {
        self.schemas.get(table).cloned()
    }

    pub fn contains(&self, table: &str) -> bool { self.schemas.contains_key(table) }

    pub fn len(&self) -> usize { self.schemas.len() }

    pub fn is_empty(&self) -> bool { self.schemas.is_empty() }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<RecordSchema>)> {
        self.schemas.iter().map(|(k, v)| (k.as_str(), v))
    }
}
