//! Process configuration resolved from environment variables.
//!
//! Keys are matched case-insensitively (`DB_HOST`, `db_host`, ...). Only `DB_NAME`
//! is required; everything else falls back to the defaults below. The core only
//! ever sees the resolved [`CatalogConfig`].

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::catalog::RetryPolicy;

pub const DEFAULT_TITLE: &str = "Dynamic Database API";
pub const DEFAULT_DESCRIPTION: &str = "Automatically generated REST API for database tables";
pub const DEFAULT_VERSION: &str = "1.0.0";

/// What the catalog layer needs to reach the store and decide which tables to expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    /// Namespace the table listing is scoped to.
    pub schema: String,
    pub excluded_tables: BTreeSet<String>,
}

impl CatalogConfig {
    pub fn is_excluded(&self, table: &str) -> bool { self.excluded_tables.contains(table) }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub catalog: CatalogConfig,
    pub title: String,
    pub description: String,
    pub version: String,
    pub http_port: u16,
    /// Availability gate window.
    pub db_wait: Duration,
    pub db_poll: Duration,
    /// Upper bound on a single health check or live catalog listing.
    pub probe_timeout: Duration,
    /// Bounded retry used whenever a single connection is established.
    pub connect_retry: RetryPolicy,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Resolve settings from an arbitrary key/value source. Later duplicates win.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
        let get = |k: &str| vars.get(k).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let db_name = get("db_name").ok_or_else(|| anyhow!("DB_NAME environment variable not set"))?;
        let catalog = CatalogConfig {
            host: get("db_host").unwrap_or_else(|| "localhost".to_string()),
            port: parse_num(get("db_port"), "DB_PORT", 5432u16)?,
            user: get("db_user").unwrap_or_else(|| "root".to_string()),
            password: vars.get("db_password").cloned().unwrap_or_else(|| "password".to_string()),
            db_name,
            schema: get("db_schema").unwrap_or_else(|| "public".to_string()),
            excluded_tables: parse_excluded_tables(get("excluded_tables").as_deref().unwrap_or("")),
        };

        Ok(Settings {
            catalog,
            title: get("title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: get("description").unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            version: get("version").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            http_port: parse_num(get("http_port"), "HTTP_PORT", 8000u16)?,
            db_wait: Duration::from_secs(parse_num(get("db_wait_secs"), "DB_WAIT_SECS", 60u64)?),
            db_poll: Duration::from_millis(parse_num(get("db_poll_ms"), "DB_POLL_MS", 2000u64)?),
            probe_timeout: Duration::from_millis(parse_num(get("db_probe_timeout_ms"), "DB_PROBE_TIMEOUT_MS", 5000u64)?),
            connect_retry: RetryPolicy {
                attempts: parse_num(get("db_connect_attempts"), "DB_CONNECT_ATTEMPTS", 3u32)?,
                delay: Duration::from_millis(parse_num(get("db_connect_delay_ms"), "DB_CONNECT_DELAY_MS", 500u64)?),
            },
        })
    }
}

fn parse_num<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(s) => s.parse::<T>().with_context(|| format!("invalid value for {}: '{}'", key, s)),
        None => Ok(default),
    }
}

/// Comma-separated list; entries are trimmed and empty entries dropped. Matching
/// against table names stays exact and case-sensitive.
pub fn parse_excluded_tables(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
