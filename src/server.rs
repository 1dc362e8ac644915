//!
//! tableserve HTTP server
//! ----------------------
//! Axum-based read-only API synthesized from the database catalog.
//!
//! Responsibilities:
//! - Startup: wait for the database (availability gate), then synthesize one record
//!   schema and one `GET /{table}` endpoint per catalog table. If the database never
//!   answers, or listing tables fails, the server still starts with no data endpoints.
//! - Introspection-independent surface: `/`, `/health`, `/tables`, `/tables/{table}`,
//!   `/openapi.json`.
//! - Per-request: one connection per request, full scan, per-row coercion against the
//!   table's schema with raw fallback.
//! - CORS: any origin, GET only.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::availability::wait_until_reachable;
use crate::catalog::postgres::PgConnector;
use crate::catalog::{connect_with_retry, CatalogReader, Connector};
use crate::config::Settings;
use crate::error::{AppError, AppResult, CatalogError};
use crate::schema::SchemaRegistry;

pub mod openapi;
pub mod synth;

pub use openapi::generate_openapi;
pub use synth::{synthesize, EndpointSet, Synthesis};

/// Paths owned by the built-in surface; tables with these names are not routed.
pub const RESERVED_PATHS: &[&str] = &["health", "tables", "openapi.json"];

/// Shared server state injected into all handlers.
///
/// The registry is built once at startup and never written afterwards, so handlers
/// read it without locking.
#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<dyn Connector>,
    pub settings: Arc<Settings>,
    pub registry: Arc<SchemaRegistry>,
}

impl AppState {
    pub fn new(connector: Arc<dyn Connector>, settings: Settings, registry: SchemaRegistry) -> Self {
        Self { connector, settings: Arc::new(settings), registry: Arc::new(registry) }
    }
}

/// Gate, then synthesize. Every failure here degrades to an empty registry.
pub async fn startup_synthesis(connector: &dyn Connector, settings: &Settings) -> SchemaRegistry {
    info!(target: "startup", "Waiting for database connection...");
    if !wait_until_reachable(connector, settings.db_wait, settings.db_poll).await {
        warn!(target: "startup", "Database not available - starting without dynamic endpoints");
        return SchemaRegistry::empty();
    }
    let mut conn = match connect_with_retry(connector, settings.connect_retry).await {
        Ok(c) => c,
        Err(e) => {
            error!(target: "startup", "Error creating dynamic endpoints: {}", e);
            return SchemaRegistry::empty();
        }
    };
    let reader = CatalogReader::from_config(&settings.catalog);
    let result = synthesize(conn.as_mut(), &reader).await;
    conn.close().await;
    match result {
        Ok(s) => {
            info!(target: "startup", generated = s.registry.len(), skipped = s.skipped.len(), "Dynamic endpoints created successfully");
            s.registry
        }
        Err(e) => {
            error!(target: "startup", "Error creating dynamic endpoints: {}", e);
            SchemaRegistry::empty()
        }
    }
}

/// Assemble the full router: built-in routes, one route per synthesized table, CORS and
/// request tracing.
pub fn build_app(state: AppState) -> Router {
    let endpoints = EndpointSet::from_registry(&state.registry);
    let router = Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/tables", get(tables_info))
        .route("/tables/{table_name}", get(table_schema))
        .route("/openapi.json", get(openapi_document));
    endpoints
        .mount(router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods([Method::GET]).allow_headers(Any))
}

pub async fn run_with_settings(settings: Settings) -> anyhow::Result<()> {
    info!(
        target: "startup",
        "tableserve starting: title='{}', version={}, db={}@{}:{}/{}, schema={}, excluded={:?}",
        settings.title, settings.version, settings.catalog.user, settings.catalog.host, settings.catalog.port,
        settings.catalog.db_name, settings.catalog.schema, settings.catalog.excluded_tables
    );
    let connector: Arc<dyn Connector> = Arc::new(PgConnector::new(&settings.catalog));
    let registry = startup_synthesis(connector.as_ref(), &settings).await;
    for table in registry.tables() {
        info!(target: "startup", "GET /{}", table);
    }

    let http_port = settings.http_port;
    let app = build_app(AppState::new(connector, settings, registry));

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("While binding {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    let endpoints: Vec<String> = state.registry.tables().map(|t| format!("/{}", t)).collect();
    Json(serde_json::json!({
        "title": state.settings.title,
        "description": state.settings.description,
        "version": state.settings.version,
        "endpoints": endpoints,
        "openapi": "/openapi.json",
    }))
}

async fn openapi_document(State(state): State<AppState>) -> Json<Value> {
    Json(generate_openapi(&state.settings, &state.registry))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    database: &'static str,
    models_generated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

async fn check_database(state: &AppState) -> Result<(), String> {
    let mut conn = connect_with_retry(state.connector.as_ref(), state.settings.connect_retry)
        .await
        .map_err(|e| e.to_string())?;
    let alive = conn.ping().await;
    conn.close().await;
    if alive { Ok(()) } else { Err("ping failed".to_string()) }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let models_generated = state.registry.len();
    let limit = state.settings.probe_timeout;
    let failure = match tokio::time::timeout(limit, check_database(&state)).await {
        Ok(Ok(())) => None,
        Ok(Err(reason)) => Some(reason),
        Err(_) => Some(format!("database did not answer within {:?}", limit)),
    };
    match failure {
        None => (StatusCode::OK, Json(HealthReport { status: "healthy", database: "connected", models_generated, detail: None })),
        Some(reason) => {
            warn!(target: "tableserve::http", "health check failed: {}", reason);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    status: "unhealthy",
                    database: "disconnected",
                    models_generated,
                    detail: Some(format!("Service unhealthy: {}", reason)),
                }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableInfo {
    table_name: String,
    endpoint: String,
    model_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TablesReport {
    total_tables: usize,
    tables: Vec<TableInfo>,
}

async fn list_live_tables(state: &AppState) -> Result<Vec<String>, CatalogError> {
    let mut conn = connect_with_retry(state.connector.as_ref(), state.settings.connect_retry).await?;
    let reader = CatalogReader::from_config(&state.settings.catalog);
    let result = reader.list_tables(conn.as_mut()).await;
    conn.close().await;
    result
}

async fn tables_info(State(state): State<AppState>) -> impl IntoResponse {
    let limit = state.settings.probe_timeout;
    let names = match tokio::time::timeout(limit, list_live_tables(&state)).await {
        Ok(Ok(names)) => names,
        Ok(Err(e)) => {
            warn!(target: "tableserve::http", "Error getting tables info: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!(target: "tableserve::http", "Error getting tables info: catalog did not answer within {:?}", limit);
            Vec::new()
        }
    };
    let tables: Vec<TableInfo> = names
        .into_iter()
        .map(|name| {
            let schema = state.registry.get(&name);
            TableInfo {
                endpoint: format!("/{}", name),
                model_available: schema.is_some(),
                model_name: schema.as_ref().map(|s| s.model_name.clone()),
                fields: schema.as_ref().map(|s| s.field_names()),
                table_name: name,
            }
        })
        .collect();
    Json(TablesReport { total_tables: tables.len(), tables })
}

async fn table_schema(State(state): State<AppState>, Path(table_name): Path<String>) -> AppResult<Json<Value>> {
    match state.registry.get(&table_name) {
        Some(schema) => Ok(Json(schema.to_json())),
        None => Err(AppError::not_found("model_not_found", format!("No model found for table: {}", table_name))),
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
