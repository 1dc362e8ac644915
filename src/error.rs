//! Unified application error model and mapping helpers.
//! Domain errors (catalog, schema build, row validation) are `thiserror` enums raised
//! by the core; `AppError` is what the HTTP surface renders.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Establishing a catalog connection failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to connect to database: {0}")]
pub struct ConnectError(pub String);

/// A statement failed on an established connection.
#[derive(Debug, Clone, thiserror::Error)]
#[error("query failed: {0}")]
pub struct QueryError(pub String);

#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("no catalog connection available: {0}")]
    Connect(#[from] ConnectError),
    #[error("failed to get table names: {0}")]
    ListTables(#[source] QueryError),
    #[error("failed to get columns for table {table}: {source}")]
    DescribeColumns { table: String, #[source] source: QueryError },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaBuildError {
    #[error("failed to create model for table {table}: table has no columns")]
    NoColumns { table: String },
    #[error("failed to create model for table {table}: duplicate field '{field}'")]
    DuplicateField { table: String, field: String },
    #[error("failed to create model for table {table}: {source}")]
    Catalog { table: String, #[source] source: CatalogError },
}

impl SchemaBuildError {
    pub fn table(&self) -> &str {
        match self {
            SchemaBuildError::NoColumns { table }
            | SchemaBuildError::DuplicateField { table, .. }
            | SchemaBuildError::Catalog { table, .. } => table.as_str(),
        }
    }
}

/// Raised when a row cannot be coerced into its table's record schema. Never leaves
/// the request handler: the row is served raw instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowValidationError {
    #[error("field '{field}' is required")]
    Missing { field: String },
    #[error("field '{field}' does not accept null")]
    NullNotAllowed { field: String },
    #[error("field '{field}': expected {expected}, got {got}")]
    Mismatch { field: String, expected: &'static str, got: String },
    #[error("field '{field}': length {len} exceeds max_length {max}")]
    TooLong { field: String, len: usize, max: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    NotFound { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::NotFound { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::NotFound { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn not_found(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn internal(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::NotFound { .. } => 404,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<ConnectError> for AppError {
    fn from(err: ConnectError) -> Self {
        AppError::Internal { code: "database_error".into(), message: format!("Database error: {}", err) }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError::Internal { code: "database_error".into(), message: format!("Database error: {}", err) }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        AppError::Internal { code: "catalog_error".into(), message: err.to_string() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({"status":"error","code": self.code_str(),"message": self.message()}))).into_response()
    }
}
