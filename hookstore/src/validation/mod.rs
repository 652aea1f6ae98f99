use crate::document::{Document, ID_FIELD};
use crate::error::{HookstoreError, Result};
use crate::query::compare_values;
use crate::schema::{Fields, JsonType, PropertySchema, Schema};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// A reason a record was rejected.
///
/// Both kinds are reported as data, never as a `HookstoreError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    /// Shape mismatch against the schema's structural keywords.
    Structural { path: String, message: String },
    /// A hook rejected the value at `field` (which may carry an array index,
    /// e.g. `authors/1`).
    Hook {
        field: String,
        hook: String,
        message: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Structural { path, message } => write!(f, "/{path}: {message}"),
            ValidationError::Hook {
                field,
                hook,
                message,
            } => write!(f, "/{field} [{hook}]: {message}"),
        }
    }
}

/// Insert checks `required`; update checks a patch, so nothing is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Insert,
    Update,
}

const FORMATS: &[&str] = &["email", "date", "date-time", "time", "uri", "uuid"];

/// Structural checker for one schema, with its `pattern`s compiled up front.
#[derive(Debug, Clone)]
pub struct StructuralValidator {
    schema: Schema,
    patterns: HashMap<String, Regex>,
}

impl StructuralValidator {
    /// Compile every `pattern` and check every `format` the schema uses.
    pub fn compile(schema: &Schema) -> Result<Self> {
        let mut patterns = HashMap::new();
        for (name, prop) in schema.properties.iter() {
            collect_patterns(name, prop, &mut patterns)?;
        }
        Ok(StructuralValidator {
            schema: schema.clone(),
            patterns,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Fill in `default` values for missing or null top-level properties.
    pub fn apply_defaults(&self, doc: &mut Document) {
        for (name, prop) in self.schema.properties.iter() {
            let has_value = doc.get(name).map(|v| !v.is_null()).unwrap_or(false);
            if !has_value {
                if let Some(default) = &prop.default {
                    doc.insert(name.to_string(), default.clone());
                }
            }
        }
    }

    /// Check `doc`, returning every structural problem found.
    pub fn validate(&self, doc: &Document, mode: Mode) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let required: &[String] = match mode {
            Mode::Insert => &self.schema.required,
            Mode::Update => &[],
        };
        self.check_object(
            "",
            doc,
            &self.schema.properties,
            required,
            self.schema.additional_properties,
            true,
            &mut errors,
        );
        errors
    }

    #[allow(clippy::too_many_arguments)]
    fn check_object(
        &self,
        path: &str,
        object: &Document,
        properties: &Fields<PropertySchema>,
        required: &[String],
        additional: bool,
        top_level: bool,
        errors: &mut Vec<ValidationError>,
    ) {
        for name in required {
            if !object.contains_key(name) {
                errors.push(structural(path, format!("must have required property '{name}'")));
            }
        }

        for (key, value) in object {
            let child = join(path, key);
            match properties.get(key) {
                Some(prop) => self.check_value(&child, value, prop, errors),
                None if additional || (top_level && key == ID_FIELD) => {}
                None => errors.push(structural(
                    &child,
                    "must NOT have additional properties".to_string(),
                )),
            }
        }
    }

    fn check_value(&self, path: &str, value: &Value, prop: &PropertySchema, errors: &mut Vec<ValidationError>) {
        if let Some(spec) = &prop.type_spec {
            let types = spec.types();
            if !types.iter().any(|t| has_type(value, *t)) {
                let expected: Vec<&str> = types.iter().map(JsonType::as_str).collect();
                errors.push(structural(path, format!("must be {}", expected.join(","))));
                return;
            }
        }

        if let Some(allowed) = &prop.enum_values {
            if !allowed.iter().any(|candidate| same_value(candidate, value)) {
                errors.push(structural(path, "must be equal to one of the allowed values".to_string()));
            }
        }

        match value {
            Value::String(s) => self.check_string(path, s, prop, errors),
            Value::Number(n) => {
                let n = n.as_f64().unwrap_or(0.0);
                if let Some(min) = prop.minimum {
                    if n < min {
                        errors.push(structural(path, format!("must be >= {min}")));
                    }
                }
                if let Some(max) = prop.maximum {
                    if n > max {
                        errors.push(structural(path, format!("must be <= {max}")));
                    }
                }
            }
            Value::Array(items) => {
                if let Some(item_schema) = &prop.items {
                    for (i, item) in items.iter().enumerate() {
                        self.check_value(&join(path, &i.to_string()), item, item_schema, errors);
                    }
                }
            }
            Value::Object(map) => {
                if prop.properties.is_some() || !prop.required.is_empty() || prop.additional_properties.is_some() {
                    let empty = Fields::new();
                    self.check_object(
                        path,
                        map,
                        prop.properties.as_ref().unwrap_or(&empty),
                        &prop.required,
                        prop.additional_properties.unwrap_or(true),
                        false,
                        errors,
                    );
                }
            }
            Value::Bool(_) | Value::Null => {}
        }
    }

    fn check_string(&self, path: &str, s: &str, prop: &PropertySchema, errors: &mut Vec<ValidationError>) {
        let length = s.chars().count() as u64;
        if let Some(min) = prop.min_length {
            if length < min {
                errors.push(structural(path, format!("must NOT have fewer than {min} characters")));
            }
        }
        if let Some(max) = prop.max_length {
            if length > max {
                errors.push(structural(path, format!("must NOT have more than {max} characters")));
            }
        }
        if let Some(pattern) = &prop.pattern {
            if let Some(re) = self.patterns.get(pattern) {
                if !re.is_match(s) {
                    errors.push(structural(path, format!("must match pattern \"{pattern}\"")));
                }
            }
        }
        if let Some(format) = &prop.format {
            if !matches_format(format, s) {
                errors.push(structural(path, format!("must match format \"{format}\"")));
            }
        }
    }
}

fn collect_patterns(path: &str, prop: &PropertySchema, patterns: &mut HashMap<String, Regex>) -> Result<()> {
    if let Some(pattern) = &prop.pattern {
        if !patterns.contains_key(pattern) {
            let re = Regex::new(pattern)
                .map_err(|e| HookstoreError::Schema(format!("invalid pattern for '{path}': {e}")))?;
            patterns.insert(pattern.clone(), re);
        }
    }
    if let Some(format) = &prop.format {
        if !FORMATS.contains(&format.as_str()) {
            return Err(HookstoreError::Schema(format!(
                "unknown format \"{format}\" for '{path}'"
            )));
        }
    }
    if let Some(items) = &prop.items {
        collect_patterns(&join(path, "items"), items, patterns)?;
    }
    if let Some(nested) = &prop.properties {
        for (name, child) in nested.iter() {
            collect_patterns(&join(path, name), child, patterns)?;
        }
    }
    Ok(())
}

fn structural(path: &str, message: String) -> ValidationError {
    ValidationError::Structural {
        path: path.to_string(),
        message,
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}

fn has_type(value: &Value, expected: JsonType) -> bool {
    match expected {
        JsonType::String => value.is_string(),
        JsonType::Number => value.is_number(),
        JsonType::Integer => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0),
            _ => false,
        },
        JsonType::Boolean => value.is_boolean(),
        JsonType::Array => value.is_array(),
        JsonType::Object => value.is_object(),
        JsonType::Null => value.is_null(),
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(Some(a), Some(b)) == Ordering::Equal,
        _ => a == b,
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+$").expect("valid email regex"))
}

fn uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:\S+$").expect("valid uri regex"))
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("valid uuid regex")
    })
}

/// Date-times accept RFC 3339 as well as a bare `YYYY-MM-DD HH:MM:SS`
/// (the default timestamp hook format).
fn matches_format(format: &str, s: &str) -> bool {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
    match format {
        "email" => email_regex().is_match(s),
        "date" => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "date-time" => {
            DateTime::parse_from_rfc3339(s).is_ok()
                || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        }
        "time" => NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok(),
        "uri" => uri_regex().is_match(s),
        "uuid" => uuid_regex().is_match(s),
        _ => true,
    }
}
