//! Endpoint synthesis: catalog tables -> record schemas -> `GET /{table}` routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{AppState, RESERVED_PATHS};
use crate::catalog::{fetch_rows, select_all_sql, CatalogReader, Connection};
use crate::error::{AppResult, CatalogError, SchemaBuildError};
use crate::schema::{self, validate_rows, RecordSchema, SchemaRegistry, SchemaRegistryBuilder, Validated};

/// A catalog table that got no endpoint, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct Synthesis {
    /// Every listed table, in catalog order, including skipped ones.
    pub tables: Vec<String>,
    pub registry: SchemaRegistry,
    pub skipped: Vec<SkippedTable>,
}

/// Whether `table` can be served as the single literal path segment `/{table}`.
pub fn check_routable(table: &str) -> Result<(), &'static str> {
    if table.is_empty() || table == "." || table == ".." {
        return Err("name is not a usable path segment");
    }
    if RESERVED_PATHS.contains(&table) {
        return Err("name collides with a built-in route");
    }
    if !table.is_ascii() {
        return Err("name contains non-ASCII characters; only ASCII table names get an endpoint");
    }
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || "_-.~$".contains(c)) {
        return Err("name contains characters that cannot be routed literally");
    }
    Ok(())
}

/// List tables and build one schema per table. Listing failures abort the whole pass;
/// a failure on one table only skips that table.
pub async fn synthesize(conn: &mut dyn Connection, reader: &CatalogReader) -> Result<Synthesis, CatalogError> {
    let tables = reader.list_tables(conn).await?;
    let mut builder = SchemaRegistryBuilder::new();
    let mut skipped = Vec::new();
    for table in &tables {
        if let Err(reason) = check_routable(table) {
            warn!(target: "tableserve::synth", table = %table, "Warning: No model generated for table {}: {}", table, reason);
            skipped.push(SkippedTable { table: table.clone(), reason: reason.to_string() });
            continue;
        }
        let built = match reader.describe_columns(conn, table).await {
            Ok(cols) => schema::build(table, &cols),
            Err(source) => Err(SchemaBuildError::Catalog { table: table.clone(), source }),
        };
        match built {
            Ok(s) => {
                debug!(target: "tableserve::synth", table = %table, fields = s.fields.len(), model = %s.model_name, "schema built");
                builder.insert(s);
            }
            Err(e) => {
                warn!(target: "tableserve::synth", table = %e.table(), "Warning: No model generated for table {}: {}", table, e);
                skipped.push(SkippedTable { table: table.clone(), reason: e.to_string() });
            }
        }
    }
    Ok(Synthesis { tables, registry: builder.freeze(), skipped })
}

/// The per-table routes to mount. Registering a table again replaces its endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointSet {
    endpoints: BTreeMap<String, Arc<RecordSchema>>,
}

impl EndpointSet {
    pub fn new() -> Self { Self::default() }

    pub fn from_registry(registry: &SchemaRegistry) -> Self {
        let mut set = Self::new();
        for (_, schema) in registry.iter() {
            set.register(Arc::clone(schema));
        }
        set
    }

    /// Returns true when an earlier endpoint for the same table was replaced.
    pub fn register(&mut self, schema: Arc<RecordSchema>) -> bool {
        let replaced = self.endpoints.insert(schema.table_name.clone(), schema).is_some();
        if replaced {
            debug!(target: "tableserve::synth", "endpoint re-registered; last registration wins");
        }
        replaced
    }

    pub fn len(&self) -> usize { self.endpoints.len() }

    pub fn is_empty(&self) -> bool { self.endpoints.is_empty() }

    pub fn paths(&self) -> Vec<String> {
        self.endpoints.keys().map(|t| format!("/{}", t)).collect()
    }

    pub fn mount(self, mut router: Router<AppState>) -> Router<AppState> {
        for (table, schema) in self.endpoints {
            let path = format!("/{}", table);
            router = router.route(
                &path,
                get(move |State(state): State<AppState>| {
                    let schema = Arc::clone(&schema);
                    async move { serve_table(state, schema).await }
                }),
            );
            info!(target: "tableserve::synth", "registered GET {}", path);
        }
        router
    }
}

/// Full scan of one table. Rows that do not fit the schema are returned raw; store
/// failures fail the whole request.
pub async fn serve_table(state: AppState, schema: Arc<RecordSchema>) -> AppResult<Json<Vec<Value>>> {
    let sql = select_all_sql(&schema.table_name);
    let rows = fetch_rows(state.connector.as_ref(), state.settings.connect_retry, &sql)
        .await
        .inspect_err(|e| error!(target: "tableserve::http", table = %schema.table_name, "{}", e))?;
    let validated = validate_rows(&schema, rows);
    let degraded = validated.iter().filter(|v| !v.is_typed()).count();
    debug!(target: "tableserve::http", table = %schema.table_name, rows = validated.len(), degraded, "served table");
    Ok(Json(validated.into_iter().map(Validated::into_value).collect()))
}
