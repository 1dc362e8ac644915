use super::*;
use crate::catalog::memory::MemoryCatalog;
use crate::catalog::ColumnDescriptor;
use crate::schema::SchemaRegistryBuilder;
use axum::body::Body;
use axum::http::Request;
use serde_json::json;
use tower::ServiceExt;

fn settings() -> Settings {
    Settings::from_vars([
        ("DB_NAME", "shop"),
        ("EXCLUDED_TABLES", "secrets"),
        ("DB_CONNECT_ATTEMPTS", "1"),
        ("DB_CONNECT_DELAY_MS", "0"),
    ])
    .unwrap()
}

fn col(name: &str, ty: &str, nullable: bool) -> ColumnDescriptor {
    ColumnDescriptor { name: name.into(), declared_type: ty.into(), nullable, default_raw: None }
}

fn catalog() -> MemoryCatalog {
    let cat = MemoryCatalog::new();
    cat.add_table("orders", vec![col("id", "int", false), col("total", "decimal", false)]);
    cat.add_table("secrets", vec![col("id", "int", false)]);
    cat.insert_row("orders", json!({"id": 1, "total": 2.5}));
    cat
}

fn app_for(cat: &MemoryCatalog, registry: SchemaRegistry) -> Router {
    build_app(AppState::new(Arc::new(cat.clone()), settings(), registry))
}

fn orders_registry() -> SchemaRegistry {
    let mut b = SchemaRegistryBuilder::new();
    b.insert(crate::schema::build("orders", &[col("id", "int", false), col("total", "decimal", false)]).unwrap());
    b.freeze()
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let resp = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

#[tokio::test]
async fn health_reports_connected_store_and_model_count() {
    let cat = catalog();
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "database": "connected", "modelsGenerated": 1}));
    assert_eq!(cat.open_connections(), 0);
}

#[tokio::test]
async fn health_is_503_when_store_is_down() {
    let cat = catalog();
    cat.set_reachable(false);
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["modelsGenerated"], 1);
    assert!(body["detail"].as_str().unwrap().starts_with("Service unhealthy"));
}

#[tokio::test]
async fn tables_lists_live_catalog_minus_exclusions() {
    let cat = catalog();
    cat.add_table("pending", vec![col("id", "int", false)]);
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalTables"], 2);
    let tables = body["tables"].as_array().unwrap();
    assert_eq!(tables[0], json!({
        "tableName": "orders",
        "endpoint": "/orders",
        "modelAvailable": true,
        "modelName": "Orders",
        "fields": ["id", "total"],
    }));
    assert_eq!(tables[1], json!({"tableName": "pending", "endpoint": "/pending", "modelAvailable": false}));
}

#[tokio::test]
async fn table_schema_document_and_unknown_table() {
    let cat = catalog();
    let app = app_for(&cat, orders_registry());
    let (status, body) = get_json(app.clone(), "/tables/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tableName"], "orders");
    assert_eq!(body["fields"][1]["kind"], "float");

    let (status, body) = get_json(app, "/tables/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No model found for table: nope");
}

#[tokio::test]
async fn table_endpoint_serves_typed_rows() {
    let cat = catalog();
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 1, "total": 2.5}]));
    assert_eq!(cat.open_connections(), 0);
}

#[tokio::test]
async fn empty_table_is_an_empty_array() {
    let cat = MemoryCatalog::new();
    cat.add_table("orders", vec![col("id", "int", false), col("total", "decimal", false)]);
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn query_failure_is_a_500_and_releases_the_connection() {
    let cat = catalog();
    cat.fail_queries_on("orders");
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/orders").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().starts_with("Database error:"));
    assert_eq!(cat.open_connections(), 0);
}

#[tokio::test]
async fn service_info_reports_metadata() {
    let cat = catalog();
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], crate::config::DEFAULT_TITLE);
    assert_eq!(body["version"], crate::config::DEFAULT_VERSION);
    assert_eq!(body["endpoints"], json!(["/orders"]));
    assert_eq!(body["openapi"], "/openapi.json");
}

#[tokio::test]
async fn cors_allows_any_origin_for_get() {
    let cat = catalog();
    let resp = app_for(&cat, orders_registry())
        .oneshot(Request::builder().uri("/orders").header("origin", "https://example.org").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
}

#[tokio::test]
async fn startup_synthesis_degrades_when_store_never_answers() {
    let cat = catalog();
    cat.set_reachable(false);
    let mut s = settings();
    s.db_wait = std::time::Duration::from_millis(20);
    s.db_poll = std::time::Duration::from_millis(5);
    let registry = startup_synthesis(&cat, &s).await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn startup_synthesis_builds_non_excluded_tables() {
    let cat = catalog();
    let registry = startup_synthesis(&cat, &settings()).await;
    assert_eq!(registry.tables().collect::<Vec<_>>(), vec!["orders"]);
    assert_eq!(cat.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn health_gives_up_on_a_stalled_store() {
    let cat = catalog();
    cat.set_stalled(true);
    let started = tokio::time::Instant::now();
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("did not answer"));
    assert!(started.elapsed() <= settings().probe_timeout + std::time::Duration::from_millis(100));
    assert_eq!(cat.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn tables_listing_gives_up_on_a_stalled_store() {
    let cat = catalog();
    cat.set_stalled(true);
    let (status, body) = get_json(app_for(&cat, orders_registry()), "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"totalTables": 0, "tables": []}));
    assert_eq!(cat.open_connections(), 0);
}

#[tokio::test]
async fn openapi_document_describes_each_table_endpoint() {
    let cat = catalog();
    let (status, doc) = get_json(app_for(&cat, orders_registry()), "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["info"]["title"], crate::config::DEFAULT_TITLE);
    let paths = doc["paths"].as_object().unwrap();
    assert_eq!(paths.keys().collect::<Vec<_>>(), vec!["/orders"]);
    let op = &doc["paths"]["/orders"]["get"];
    assert_eq!(op["summary"], "Get all orders records");
    assert_eq!(op["tags"], json!(["orders"]));
    let response = &op["responses"]["200"]["content"]["application/json"]["schema"];
    assert_eq!(response["type"], "array");
    assert_eq!(response["items"]["$ref"], "#/components/schemas/Orders");
    let model = &doc["components"]["schemas"]["Orders"];
    assert_eq!(model["properties"]["id"]["type"], "integer");
    assert_eq!(model["properties"]["total"]["type"], "number");
    assert_eq!(model["required"], json!(["id", "total"]));
}
