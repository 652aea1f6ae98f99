use crate::document::Document;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// A validation schema for one collection.
///
/// `properties` and `updating` keep their declaration order: hooks run field
/// by field in the order written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub properties: Fields<PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default)]
    pub additional_properties: bool,
    #[serde(default, skip_serializing_if = "Fields::is_empty")]
    pub updating: Fields<HookSpec>,
}

impl Schema {
    /// Schema accepting any document and running no hooks.
    pub fn open() -> Self {
        Schema {
            additional_properties: true,
            ..Default::default()
        }
    }
}

/// A stored `{name, schema}` entry of the reserved schema collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub name: String,
    pub schema: Schema,
}

/// JSON type keyword values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Array => "array",
            JsonType::Object => "object",
            JsonType::Null => "null",
        }
    }
}

/// `type: string` or `type: [string, "null"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    One(JsonType),
    Many(Vec<JsonType>),
}

impl TypeSpec {
    pub fn types(&self) -> &[JsonType] {
        match self {
            TypeSpec::One(t) => std::slice::from_ref(t),
            TypeSpec::Many(ts) => ts,
        }
    }
}

/// Structural keywords for a single property (or array item).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_spec: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Fields<PropertySchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Nested objects accept undeclared keys unless this is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// One `updating` rule: `{type: name | [names], items?: {...}, ...args}`.
///
/// Every key besides `type` and `items` is passed to the hooks as an argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Document", into = "Document")]
pub struct HookSpec {
    pub hooks: Vec<String>,
    pub items: Option<Box<HookSpec>>,
    pub args: Document,
}

impl HookSpec {
    pub fn new(hooks: &[&str]) -> Self {
        HookSpec {
            hooks: hooks.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_items(mut self, items: HookSpec) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(Value::as_u64)
    }
}

impl TryFrom<Document> for HookSpec {
    type Error = String;

    fn try_from(mut raw: Document) -> Result<Self, Self::Error> {
        let hooks = match raw.remove("type") {
            Some(Value::String(name)) => vec![name],
            Some(Value::Array(names)) => names
                .into_iter()
                .map(|name| match name {
                    Value::String(s) => Ok(s),
                    other => Err(format!("hook names must be strings, got {other}")),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(format!("'type' must be a hook name or a list of names, got {other}")),
            None => return Err("updating rule is missing 'type'".to_string()),
        };
        let items = match raw.remove("items") {
            Some(Value::Object(nested)) => Some(Box::new(HookSpec::try_from(nested)?)),
            Some(other) => return Err(format!("'items' must be an object, got {other}")),
            None => None,
        };
        Ok(HookSpec {
            hooks,
            items,
            args: raw,
        })
    }
}

impl From<HookSpec> for Document {
    fn from(spec: HookSpec) -> Self {
        let mut out = Document::new();
        let kind = match spec.hooks.as_slice() {
            [single] => Value::String(single.clone()),
            many => Value::Array(many.iter().cloned().map(Value::String).collect()),
        };
        out.insert("type".to_string(), kind);
        if let Some(items) = spec.items {
            out.insert("items".to_string(), Value::Object((*items).into()));
        }
        out.extend(spec.args);
        out
    }
}

/// Name-keyed entries in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields<V>(Vec<(String, V)>);

impl<V> Default for Fields<V> {
    fn default() -> Self {
        Fields(Vec::new())
    }
}

impl<V> Fields<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: V) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V> FromIterator<(String, V)> for Fields<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        fields
    }
}

impl<V: Serialize> Serialize for Fields<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Fields<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for FieldsVisitor<V> {
            type Value = Fields<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut fields = Fields::new();
                while let Some((name, value)) = access.next_entry::<String, V>()? {
                    fields.insert(name, value);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor(PhantomData))
    }
}
