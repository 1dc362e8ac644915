//! OpenAPI document for the synthesized surface, served at `/openapi.json`.

use serde_json::{json, Map, Value};

use crate::config::Settings;
use crate::schema::{RecordSchema, SchemaRegistry};

/// Build the OpenAPI 3.0 document: one `GET /{table}` operation per synthesized table,
/// each answering with an array of the table's model.
pub fn generate_openapi(settings: &Settings, registry: &SchemaRegistry) -> Value {
    let mut paths = Map::new();
    let mut components = Map::new();

    for (table_name, schema) in registry.iter() {
        let component = component_name(&components, schema);
        components.insert(component.clone(), schema.to_openapi_schema());
        let (path, operations) = table_openapi_path(table_name, schema, &component);
        paths.insert(path, operations);
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": settings.title,
            "version": settings.version,
            "description": settings.description,
        },
        "paths": paths,
        "components": { "schemas": components },
    })
}

/// Model names can collide (`orders` and `ORDERS` both display as `Orders`); the
/// later table falls back to its own name.
fn component_name(components: &Map<String, Value>, schema: &RecordSchema) -> String {
    if components.contains_key(&schema.model_name) {
        schema.table_name.clone()
    } else {
        schema.model_name.clone()
    }
}

fn table_openapi_path(table_name: &str, schema: &RecordSchema, component: &str) -> (String, Value) {
    (
        format!("/{}", table_name),
        json!({
            "get": {
                "summary": format!("Get all {} records", table_name),
                "operationId": format!("get_{}", table_name),
                "tags": [table_name],
                "responses": {
                    "200": {
                        "description": format!("All {} records", schema.model_name),
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "array",
                                    "items": {"$ref": format!("#/components/schemas/{}", component)}
                                }
                            }
                        }
                    },
                    "500": {"description": "Database error"}
                }
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDescriptor;
    use crate::schema::{build, SchemaRegistryBuilder};

    fn col(name: &str, ty: &str) -> ColumnDescriptor {
        ColumnDescriptor { name: name.into(), declared_type: ty.into(), nullable: false, default_raw: None }
    }

    #[test]
    fn one_path_per_table_with_model_component() {
        let mut b = SchemaRegistryBuilder::new();
        b.insert(build("order_items", &[col("id", "int")]).unwrap());
        b.insert(build("orders", &[col("id", "int")]).unwrap());
        let settings = Settings::from_vars([("DB_NAME", "shop"), ("TITLE", "Shop API")]).unwrap();
        let doc = generate_openapi(&settings, &b.freeze());

        assert_eq!(doc["info"]["title"], "Shop API");
        assert_eq!(doc["paths"].as_object().unwrap().len(), 2);
        let op = &doc["paths"]["/order_items"]["get"];
        assert_eq!(op["summary"], "Get all order_items records");
        assert_eq!(op["tags"], json!(["order_items"]));
        assert_eq!(
            op["responses"]["200"]["content"]["application/json"]["schema"]["items"]["$ref"],
            "#/components/schemas/OrderItems"
        );
        assert_eq!(doc["components"]["schemas"]["OrderItems"]["properties"]["id"]["type"], "integer");
    }

    #[test]
    fn colliding_model_names_keep_both_components() {
        let mut b = SchemaRegistryBuilder::new();
        b.insert(build("ORDERS", &[col("id", "int")]).unwrap());
        b.insert(build("orders", &[col("id", "int"), col("total", "decimal")]).unwrap());
        let settings = Settings::from_vars([("DB_NAME", "shop")]).unwrap();
        let doc = generate_openapi(&settings, &b.freeze());
        let schemas = doc["components"]["schemas"].as_object().unwrap();
        assert_eq!(schemas.len(), 2);
        assert_eq!(
            doc["paths"]["/orders"]["get"]["responses"]["200"]["content"]["application/json"]["schema"]["items"]["$ref"],
            "#/components/schemas/orders"
        );
    }
}
