//!
//! tableserve catalog access
//! -------------------------
//! The backing store is reached only through the [`Connector`] / [`Connection`]
//! pair: connect, run a statement and get untyped rows back, ping, close. On top of
//! that sit the catalog reader (table listing and per-table column metadata from
//! `information_schema`), bounded connection retry, and the scoped
//! acquire-query-release helper used by request handlers.
//!
//! Implementations:
//! - [`postgres::PgConnector`] talks to PostgreSQL through tokio-postgres.
//! - [`memory::MemoryCatalog`] is an in-process store answering the same statements.

use std::collections::BTreeSet;
use std::time::Duration;

use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::{AppError, CatalogError, ConnectError, QueryError};

pub mod memory;
pub mod postgres;

/// One result row: column name -> raw value, in result column order.
pub type Row = serde_json::Map<String, Value>;

/// Column metadata as reported by the catalog, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub default_raw: Option<String>,
}

pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, ConnectError>>;

    /// Human-readable target for logs. Must not include credentials.
    fn describe(&self) -> String;
}

/// A live connection. `close` is the orderly release; dropping a connection without
/// closing it must release it as well, since request futures can be abandoned
/// mid-statement.
pub trait Connection: Send {
    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, QueryError>>;

    fn ping(&mut self) -> BoxFuture<'_, bool>;

    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Fixed-delay retry applied when establishing a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts; zero is treated as one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { attempts: 3, delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    pub fn once() -> Self { RetryPolicy { attempts: 1, delay: Duration::ZERO } }
}

pub async fn connect_with_retry(connector: &dyn Connector, policy: RetryPolicy) -> Result<Box<dyn Connection>, ConnectError> {
    let attempts = policy.attempts.max(1);
    let mut last: Option<ConnectError> = None;
    for attempt in 1..=attempts {
        match connector.connect().await {
            Ok(conn) => {
                if attempt > 1 {
                    debug!(target: "tableserve::catalog", attempt, "connected after retry");
                }
                return Ok(conn);
            }
            Err(e) => {
                warn!(target: "tableserve::catalog", attempt, attempts, target_db = %connector.describe(), "connect failed: {}", e);
                last = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| ConnectError("no connection attempt made".into())))
}

/// Acquire a connection, run one statement, release the connection. The release
/// happens whether or not the statement succeeded; if this future is dropped before
/// completion the connection is released by its own drop.
pub async fn fetch_rows(connector: &dyn Connector, policy: RetryPolicy, sql: &str) -> Result<Vec<Row>, AppError> {
    let mut conn = connect_with_retry(connector, policy).await?;
    let result = conn.query(sql).await;
    conn.close().await;
    Ok(result?)
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn list_tables_sql(schema: &str) -> String {
    format!(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = {} AND table_type = 'BASE TABLE' ORDER BY table_name",
        quote_literal(schema)
    )
}

pub fn describe_columns_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT column_name, data_type, character_maximum_length, is_nullable, column_default FROM information_schema.columns WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
        quote_literal(schema),
        quote_literal(table)
    )
}

pub fn select_all_sql(table: &str) -> String {
    format!("SELECT * FROM {}", quote_ident(table))
}

/// Declared type string for a catalog column. Character types with a known length are
/// rendered in the short `varchar(N)` / `char(N)` form so the length survives.
pub fn render_declared_type(data_type: &str, char_max_len: Option<u64>) -> String {
    match (data_type.to_ascii_lowercase().as_str(), char_max_len) {
        ("character varying", Some(n)) => format!("varchar({})", n),
        ("character", Some(n)) => format!("char({})", n),
        _ => data_type.to_string(),
    }
}

static CAST_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?)::[A-Za-z_][A-Za-z0-9_ ]*(\[\])?$").expect("static regex"));

/// Strip a trailing `::type` cast and unquote a string literal, so catalog defaults such
/// as `'draft'::character varying` or `NULL::text` read as `draft` / `NULL`. Expressions
/// (`nextval(...)`, `now()`) are left as they are.
pub fn normalize_default(raw: &str) -> String {
    let body = match CAST_SUFFIX.captures(raw) {
        Some(c) => c.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw,
    };
    let body = body.trim();
    if body.len() >= 2 && body.starts_with('\'') && body.ends_with('\'') {
        return body[1..body.len() - 1].replace("''", "'");
    }
    let unparen = body.strip_prefix('(').and_then(|b| b.strip_suffix(')')).unwrap_or(body);
    unparen.to_string()
}

/// Textual view of a catalog value. Drivers report everything as text; in-process
/// stores may hand back numbers.
fn value_text(v: Option<&Value>) -> Option<String> {
    match v {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Reads table and column metadata. Issues one statement per call and caches nothing.
#[derive(Debug, Clone)]
pub struct CatalogReader {
    schema: String,
    excluded: BTreeSet<String>,
}

impl CatalogReader {
    pub fn new(schema: impl Into<String>, excluded: BTreeSet<String>) -> Self {
        Self { schema: schema.into(), excluded }
    }

    pub fn from_config(cfg: &CatalogConfig) -> Self {
        Self::new(cfg.schema.clone(), cfg.excluded_tables.clone())
    }

    /// Table names in catalog order, minus exact (case-sensitive) exclusions.
    pub async fn list_tables(&self, conn: &mut dyn Connection) -> Result<Vec<String>, CatalogError> {
        let rows = conn.query(&list_tables_sql(&self.schema)).await.map_err(CatalogError::ListTables)?;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name = value_text(row.get("table_name"))
                .ok_or_else(|| CatalogError::ListTables(QueryError("catalog row without table_name".into())))?;
            if self.excluded.contains(&name) {
                debug!(target: "tableserve::catalog", table = %name, "excluded by configuration");
                continue;
            }
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
        Ok(out)
    }

    pub async fn describe_columns(&self, conn: &mut dyn Connection, table: &str) -> Result<Vec<ColumnDescriptor>, CatalogError> {
        let wrap = |source: QueryError| CatalogError::DescribeColumns { table: table.to_string(), source };
        let rows = conn.query(&describe_columns_sql(&self.schema, table)).await.map_err(wrap)?;
        let mut cols = Vec::with_capacity(rows.len());
        for row in rows {
            let name = value_text(row.get("column_name"))
                .ok_or_else(|| wrap(QueryError("catalog row without column_name".into())))?;
            let data_type = value_text(row.get("data_type")).unwrap_or_default();
            let char_len = value_text(row.get("character_maximum_length")).and_then(|s| s.parse::<u64>().ok());
            let nullable = value_text(row.get("is_nullable")).map(|s| s.eq_ignore_ascii_case("YES")).unwrap_or(false);
            cols.push(ColumnDescriptor {
                name,
                declared_type: render_declared_type(&data_type, char_len),
                nullable,
                default_raw: value_text(row.get("column_default")).map(|d| normalize_default(&d)),
            });
        }
        Ok(cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;

    fn col(name: &str, ty: &str, nullable: bool) -> ColumnDescriptor {
        ColumnDescriptor { name: name.into(), declared_type: ty.into(), nullable, default_raw: None }
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
        assert_eq!(select_all_sql("line_items"), "SELECT * FROM \"line_items\"");
    }

    #[test]
    fn character_types_render_with_length() {
        assert_eq!(render_declared_type("character varying", Some(50)), "varchar(50)");
        assert_eq!(render_declared_type("character", Some(2)), "char(2)");
        assert_eq!(render_declared_type("character varying", None), "character varying");
        assert_eq!(render_declared_type("integer", None), "integer");
    }

    #[test]
    fn catalog_defaults_lose_casts_and_quotes() {
        assert_eq!(normalize_default("'draft'::character varying"), "draft");
        assert_eq!(normalize_default("'it''s'::text"), "it's");
        assert_eq!(normalize_default("NULL::character varying"), "NULL");
        assert_eq!(normalize_default("0"), "0");
        assert_eq!(normalize_default("(-1)"), "-1");
        assert_eq!(normalize_default("'{}'::jsonb"), "{}");
        assert_eq!(normalize_default("nextval('orders_id_seq'::regclass)"), "nextval('orders_id_seq'::regclass)");
        assert_eq!(normalize_default("CURRENT_TIMESTAMP"), "CURRENT_TIMESTAMP");
    }

    #[tokio::test]
    async fn list_tables_drops_exclusions_case_sensitively() {
        let cat = MemoryCatalog::new();
        cat.add_table("orders", vec![col("id", "int", false)]);
        cat.add_table("audit_log", vec![col("id", "int", false)]);
        cat.add_table("Audit_Log", vec![col("id", "int", false)]);
        let reader = CatalogReader::new("public", ["audit_log".to_string()].into_iter().collect());
        let mut conn = cat.connect().await.unwrap();
        let tables = reader.list_tables(conn.as_mut()).await.unwrap();
        assert_eq!(tables, vec!["Audit_Log".to_string(), "orders".to_string()]);
        conn.close().await;
    }

    #[tokio::test]
    async fn describe_columns_keeps_declaration_order() {
        let cat = MemoryCatalog::new();
        cat.add_table("orders", vec![
            col("id", "int", false),
            ColumnDescriptor { name: "note".into(), declared_type: "varchar(50)".into(), nullable: true, default_raw: Some("NULL".into()) },
            col("total", "decimal", false),
        ]);
        let reader = CatalogReader::new("public", BTreeSet::new());
        let mut conn = cat.connect().await.unwrap();
        let cols = reader.describe_columns(conn.as_mut(), "orders").await.unwrap();
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "note", "total"]);
        assert_eq!(cols[1].declared_type, "varchar(50)");
        assert!(cols[1].nullable);
        assert_eq!(cols[1].default_raw.as_deref(), Some("NULL"));
        conn.close().await;
    }

    #[tokio::test]
    async fn query_failures_surface_as_catalog_errors() {
        let cat = MemoryCatalog::new();
        cat.add_table("orders", vec![col("id", "int", false)]);
        cat.fail_queries_on("orders");
        let reader = CatalogReader::new("public", BTreeSet::new());
        let mut conn = cat.connect().await.unwrap();
        let err = reader.describe_columns(conn.as_mut(), "orders").await.unwrap_err();
        assert!(matches!(err, CatalogError::DescribeColumns { ref table, .. } if table == "orders"));
        conn.close().await;
    }

    #[tokio::test]
    async fn connect_retry_is_bounded() {
        let cat = MemoryCatalog::new();
        cat.set_reachable(false);
        let policy = RetryPolicy { attempts: 3, delay: Duration::from_millis(1) };
        assert!(connect_with_retry(&cat, policy).await.is_err());
        assert_eq!(cat.connect_attempts(), 3);

        let cat = MemoryCatalog::new();
        cat.fail_next_connects(2);
        let conn = connect_with_retry(&cat, policy).await.unwrap();
        assert_eq!(cat.connect_attempts(), 3);
        conn.close().await;

        let cat = MemoryCatalog::new();
        cat.set_reachable(false);
        let zero = RetryPolicy { attempts: 0, delay: Duration::ZERO };
        assert!(connect_with_retry(&cat, zero).await.is_err());
        assert_eq!(cat.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn fetch_rows_releases_connection_on_failure() {
        let cat = MemoryCatalog::new();
        cat.add_table("orders", vec![col("id", "int", false)]);
        cat.fail_queries_on("orders");
        let err = fetch_rows(&cat, RetryPolicy::once(), &select_all_sql("orders")).await.unwrap_err();
        assert_eq!(err.http_status(), 500);
        assert_eq!(cat.open_connections(), 0);

        let err = fetch_rows(&cat, RetryPolicy::once(), &select_all_sql("missing")).await.unwrap_err();
        assert!(err.message().contains("missing"));
        assert_eq!(cat.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetch_still_releases_its_connection() {
        let cat = MemoryCatalog::new();
        cat.add_table("orders", vec![col("id", "int", false)]);
        cat.set_stalled(true);
        let sql = select_all_sql("orders");
        let fetch = fetch_rows(&cat, RetryPolicy::once(), &sql);
        assert!(tokio::time::timeout(Duration::from_millis(50), fetch).await.is_err());
        assert_eq!(cat.connect_attempts(), 1);
        assert_eq!(cat.open_connections(), 0);
    }
}
