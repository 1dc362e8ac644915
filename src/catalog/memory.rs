//! In-process catalog store.
//!
//! Answers the statements the catalog reader and table endpoints issue (table listing,
//! column listing, `SELECT * FROM "t"`, `SELECT 1`) from tables held in memory. Can be
//! made unreachable, made to refuse a number of connects, made to fail statements
//! touching a given table, or stalled so that pings and statements never answer.
//! Connection bookkeeping lets callers check that every acquired connection was
//! released, whether through `close` or by being dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use super::{ColumnDescriptor, Connection, Connector, Row};
use crate::error::{ConnectError, QueryError};

static TABLES_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SELECT table_name FROM information_schema\.tables\b").expect("static regex")
});
static COLUMNS_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SELECT .* FROM information_schema\.columns WHERE .*table_name = '((?:[^']|'')*)'").expect("static regex")
});
static SELECT_ALL_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^SELECT \* FROM "((?:[^"]|"")*)"\s*;?$"#).expect("static regex")
});

#[derive(Debug, Clone)]
struct MemoryTable {
    name: String,
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
}

#[derive(Debug)]
struct MemoryState {
    tables: Vec<MemoryTable>,
    reachable: bool,
    refuse_connects: usize,
    failing_tables: HashSet<String>,
    stalled: bool,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<MemoryState>,
    connect_attempts: AtomicUsize,
    open: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    inner: Arc<Shared>,
}

impl Default for MemoryCatalog {
    fn default() -> Self { Self::new() }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        MemoryCatalog {
            inner: Arc::new(Shared {
                state: RwLock::new(MemoryState {
                    tables: Vec::new(),
                    reachable: true,
                    refuse_connects: 0,
                    failing_tables: HashSet::new(),
                    stalled: false,
                }),
                connect_attempts: AtomicUsize::new(0),
                open: AtomicUsize::new(0),
            }),
        }
    }

    /// Create or replace a table definition. Existing rows of a replaced table are dropped.
    pub fn add_table(&self, name: &str, columns: Vec<ColumnDescriptor>) {
        let mut st = self.inner.state.write();
        let table = MemoryTable { name: name.to_string(), columns, rows: Vec::new() };
        match st.tables.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = table,
            None => st.tables.push(table),
        }
    }

    /// Append a row. Accepts any JSON object; rows are not checked against the columns.
    pub fn insert_row(&self, table: &str, row: Value) {
        let mut st = self.inner.state.write();
        if let (Some(t), Value::Object(map)) = (st.tables.iter_mut().find(|t| t.name == table), row) {
            t.rows.push(map);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.state.write().reachable = reachable;
    }

    /// Refuse the next `n` connects, then accept again.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.state.write().refuse_connects = n;
    }

    /// Every statement that touches `table` (column listing or scan) fails.
    pub fn fail_queries_on(&self, table: &str) {
        self.inner.state.write().failing_tables.insert(table.to_string());
    }

    /// While stalled, connects still succeed but pings and statements never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.state.write().stalled = stalled;
    }

    fn is_stalled(&self) -> bool { self.inner.state.read().stalled }

    pub fn connect_attempts(&self) -> usize { self.inner.connect_attempts.load(Ordering::SeqCst) }

    pub fn open_connections(&self) -> usize { self.inner.open.load(Ordering::SeqCst) }

    fn execute(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        let sql = sql.trim();
        let st = self.inner.state.read();
        if !st.reachable {
            return Err(QueryError("server closed the connection unexpectedly".into()));
        }
        if sql.eq_ignore_ascii_case("SELECT 1") {
            let mut row = Row::new();
            row.insert("?column?".into(), Value::String("1".into()));
            return Ok(vec![row]);
        }
        if TABLES_SQL.is_match(sql) {
            let mut names: Vec<&str> = st.tables.iter().map(|t| t.name.as_str()).collect();
            names.sort_unstable();
            return Ok(names
                .into_iter()
                .map(|n| {
                    let mut row = Row::new();
                    row.insert("table_name".into(), Value::String(n.to_string()));
                    row
                })
                .collect());
        }
        if let Some(caps) = COLUMNS_SQL.captures(sql) {
            let name = caps[1].replace("''", "'");
            if st.failing_tables.contains(&name) {
                return Err(QueryError(format!("permission denied for table {}", name)));
            }
            let Some(table) = st.tables.iter().find(|t| t.name == name) else { return Ok(Vec::new()); };
            return Ok(table.columns.iter().map(column_row).collect());
        }
        if let Some(caps) = SELECT_ALL_SQL.captures(sql) {
            let name = caps[1].replace("\"\"", "\"");
            if st.failing_tables.contains(&name) {
                return Err(QueryError(format!("permission denied for table {}", name)));
            }
            return match st.tables.iter().find(|t| t.name == name) {
                Some(t) => Ok(t.rows.clone()),
                None => Err(QueryError(format!("relation \"{}\" does not exist", name))),
            };
        }
        Err(QueryError(format!("unsupported statement: {}", sql)))
    }
}

fn column_row(c: &ColumnDescriptor) -> Row {
    let mut row = Row::new();
    row.insert("column_name".into(), Value::String(c.name.clone()));
    row.insert("data_type".into(), Value::String(c.declared_type.clone()));
    row.insert("character_maximum_length".into(), Value::Null);
    row.insert("is_nullable".into(), Value::String(if c.nullable { "YES" } else { "NO" }.into()));
    row.insert("column_default".into(), c.default_raw.clone().map(Value::String).unwrap_or(Value::Null));
    row
}

impl Connector for MemoryCatalog {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, ConnectError>> {
        async move {
            self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
            {
                let mut st = self.inner.state.write();
                if !st.reachable {
                    return Err(ConnectError("connection refused".into()));
                }
                if st.refuse_connects > 0 {
                    st.refuse_connects -= 1;
                    return Err(ConnectError("connection refused".into()));
                }
            }
            self.inner.open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryConnection { catalog: self.clone(), released: false }) as Box<dyn Connection>)
        }
        .boxed()
    }

    fn describe(&self) -> String { "memory".to_string() }
}

pub struct MemoryConnection {
    catalog: MemoryCatalog,
    released: bool,
}

impl MemoryConnection {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.catalog.inner.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn stall_if_requested(&self) {
        if self.catalog.is_stalled() {
            futures_util::future::pending::<()>().await;
        }
    }
}

impl Connection for MemoryConnection {
    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, QueryError>> {
        async move {
            self.stall_if_requested().await;
            self.catalog.execute(sql)
        }
        .boxed()
    }

    fn ping(&mut self) -> BoxFuture<'_, bool> {
        async move {
            self.stall_if_requested().await;
            self.catalog.execute("SELECT 1").is_ok()
        }
        .boxed()
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, ()> {
        self.release();
        async {}.boxed()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}
