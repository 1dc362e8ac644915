//!
//! tableserve server binary
//! ------------------------
//! Command-line entry point. Configuration comes from environment variables (see
//! `tableserve::config`); a few CLI flags override them.

use anyhow::Result;
use std::env;
use tracing_subscriber::{fmt, EnvFilter};

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn parse_port_arg(args: &[String], flag: &str) -> Result<Option<u16>> {
    match arg_value(args, flag) {
        Some(v) => v.parse::<u16>().map(Some).map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", flag, v, e)),
        None => Ok(None),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("tableserve Server\n\nUSAGE:\n  tableserve_server [--http-port N] [--db-host HOST] [--db-port N] [--db-name NAME] [--exclude t1,t2]\n\nOPTIONS:\n  --http-port N       HTTP API port (env: HTTP_PORT, default 8000)\n  --db-host HOST      Database host (env: DB_HOST, default localhost)\n  --db-port N         Database port (env: DB_PORT, default 5432)\n  --db-name NAME      Database name (env: DB_NAME, required)\n  --exclude LIST      Comma-separated tables to hide (env: EXCLUDED_TABLES)\n\nOther settings: DB_USER, DB_PASSWORD, DB_SCHEMA, TITLE, DESCRIPTION, VERSION,\n  DB_WAIT_SECS, DB_POLL_MS, DB_PROBE_TIMEOUT_MS,\n  DB_CONNECT_ATTEMPTS, DB_CONNECT_DELAY_MS\n");
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();

    // CLI arguments override environment
    let mut vars: Vec<(String, String)> = env::vars().collect();
    if let Some(name) = arg_value(&args, "--db-name") { vars.push(("DB_NAME".into(), name)); }
    if let Some(host) = arg_value(&args, "--db-host") { vars.push(("DB_HOST".into(), host)); }
    if let Some(list) = arg_value(&args, "--exclude") { vars.push(("EXCLUDED_TABLES".into(), list)); }
    if let Some(p) = parse_port_arg(&args, "--db-port")? { vars.push(("DB_PORT".into(), p.to_string())); }
    if let Some(p) = parse_port_arg(&args, "--http-port")? { vars.push(("HTTP_PORT".into(), p.to_string())); }

    let settings = tableserve::config::Settings::from_vars(vars)?;
    tracing::info!(
        target: "startup",
        "RUST_LOG='{}', http_port={}",
        env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string()),
        settings.http_port
    );
    tableserve::server::run_with_settings(settings).await
}
