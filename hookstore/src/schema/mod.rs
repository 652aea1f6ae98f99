// Schema documents: structural keywords plus ordered `updating` hook rules

mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_str, parse_schema_value};
pub use types::{Fields, HookSpec, JsonType, PropertySchema, Schema, SchemaRecord, TypeSpec};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const AUTHORS: &str = r#"
properties:
  name: { type: string, minLength: 3, maxLength: 20 }
  email: { type: string, format: email }
  password: { type: string, minLength: 4, maxLength: 16 }
  created_at: { type: string }
  updated_at: { type: string }
required: [name, email, password]
updating:
  _id: { type: increment }
  name: { type: unique }
  email: { type: [unique] }
  password: { type: hash, cost: 3 }
  created_at: { type: timestamp_inserted, format: "%Y/%m/%d %H:%M:%S" }
  updated_at: { type: timestamp_updated }
"#;

    #[test]
    fn test_parse_yaml_schema() {
        let schema = parse_schema_str(AUTHORS).unwrap();
        assert_eq!(schema.required, vec!["name", "email", "password"]);
        assert!(!schema.additional_properties);

        let name = schema.properties.get("name").unwrap();
        assert_eq!(name.type_spec, Some(TypeSpec::One(JsonType::String)));
        assert_eq!(name.min_length, Some(3));
        assert_eq!(
            schema.properties.get("email").unwrap().format.as_deref(),
            Some("email")
        );
    }

    #[test]
    fn test_updating_keeps_declaration_order() {
        let schema = parse_schema_str(AUTHORS).unwrap();
        let order: Vec<&str> = schema.updating.names().collect();
        assert_eq!(
            order,
            vec!["_id", "name", "email", "password", "created_at", "updated_at"]
        );
    }

    #[test]
    fn test_hook_spec_args() {
        let schema = parse_schema_str(AUTHORS).unwrap();
        let password = schema.updating.get("password").unwrap();
        assert_eq!(password.hooks, vec!["hash"]);
        assert_eq!(password.arg_u64("cost"), Some(3));
        assert!(password.arg("type").is_none());

        let email = schema.updating.get("email").unwrap();
        assert_eq!(email.hooks, vec!["unique"]);
    }

    #[test]
    fn test_parse_json_schema_with_nested_items() {
        let schema = parse_schema_str(
            r#"{
                "properties": {"authors": {"type": "array", "items": {"type": "integer"}}},
                "updating": {"authors": {"type": "array", "items": {"type": ["exists"], "collection": "authors"}}}
            }"#,
        )
        .unwrap();

        let authors = schema.updating.get("authors").unwrap();
        assert_eq!(authors.hooks, vec!["array"]);
        let items = authors.items.as_deref().unwrap();
        assert_eq!(items.hooks, vec!["exists"]);
        assert_eq!(items.arg_str("collection"), Some("authors"));
    }

    #[test]
    fn test_rule_without_type_is_rejected() {
        assert!(parse_schema_str("updating:\n  name: { salt: 3 }\n").is_err());
        assert!(parse_schema_str("updating:\n  name: { type: 3 }\n").is_err());
    }

    #[test]
    fn test_unknown_json_type_is_rejected() {
        assert!(parse_schema_str("properties:\n  name: { type: text }\n").is_err());
    }

    #[test]
    fn test_schema_record_round_trip_shape() {
        let record = SchemaRecord {
            name: "books".into(),
            schema: Schema {
                updating: [(
                    "authors".to_string(),
                    HookSpec::new(&["array"]).with_items(HookSpec::new(&["exists"]).with_arg("collection", "authors")),
                )]
                .into_iter()
                .collect(),
                ..Schema::default()
            },
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "books",
                "schema": {
                    "properties": {},
                    "additionalProperties": false,
                    "updating": {
                        "authors": {"type": "array", "items": {"type": "exists", "collection": "authors"}}
                    }
                }
            })
        );
        let back: SchemaRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_open_schema() {
        let schema = Schema::open();
        assert!(schema.additional_properties);
        assert!(schema.properties.is_empty());
        assert!(schema.updating.is_empty());

        let parsed = parse_schema_value(json!({"additionalProperties": true})).unwrap();
        assert_eq!(parsed, schema);
    }
}
