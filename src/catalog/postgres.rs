//! PostgreSQL connector over tokio-postgres.
//!
//! Uses the simple-query protocol, so every value comes back as text (or NULL) and
//! lands in the row as a JSON string/null. Typing those values is the record
//! schema's job, not the driver's.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use tracing::debug;

use super::{Connection, Connector, Row};
use crate::config::CatalogConfig;
use crate::error::{ConnectError, QueryError};

pub struct PgConnector {
    config: Config,
    desc: String,
}

impl PgConnector {
    pub fn new(cfg: &CatalogConfig) -> Self {
        let mut config = Config::new();
        config
            .host(&cfg.host)
            .port(cfg.port)
            .user(&cfg.user)
            .password(cfg.password.as_bytes())
            .dbname(&cfg.db_name)
            .application_name("tableserve")
            .connect_timeout(Duration::from_secs(5));
        let desc = format!("postgres://{}@{}:{}/{}", cfg.user, cfg.host, cfg.port, cfg.db_name);
        Self { config, desc }
    }
}

impl Connector for PgConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, ConnectError>> {
        async move {
            let (client, connection) = self.config.connect(NoTls).await.map_err(|e| ConnectError(e.to_string()))?;
            // drive the connection in background until the client goes away
            let driver = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(target: "tableserve::catalog", "postgres connection ended: {}", e);
                }
            });
            Ok(Box::new(PgConnection { client, driver }) as Box<dyn Connection>)
        }
        .boxed()
    }

    fn describe(&self) -> String { self.desc.clone() }
}

/// Dropping the connection drops the client, which ends the spawned driver task; `close`
/// additionally waits briefly for that task to finish.
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl Connection for PgConnection {
    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, QueryError>> {
        async move {
            let msgs = self.client.simple_query(sql).await.map_err(|e| QueryError(e.to_string()))?;
            let mut rows = Vec::new();
            for m in msgs {
                if let SimpleQueryMessage::Row(r) = m {
                    let mut row = Row::new();
                    for (i, col) in r.columns().iter().enumerate() {
                        let v = match r.get(i) {
                            Some(s) => Value::String(s.to_string()),
                            None => Value::Null,
                        };
                        row.insert(col.name().to_string(), v);
                    }
                    rows.push(row);
                }
            }
            Ok(rows)
        }
        .boxed()
    }

    fn ping(&mut self) -> BoxFuture<'_, bool> {
        async move { self.client.simple_query("SELECT 1").await.is_ok() }.boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        async move {
            let PgConnection { client, driver } = *self;
            drop(client);
            if tokio::time::timeout(Duration::from_secs(1), driver).await.is_err() {
                debug!(target: "tableserve::catalog", "postgres connection did not shut down within 1s");
            }
        }
        .boxed()
    }
}
