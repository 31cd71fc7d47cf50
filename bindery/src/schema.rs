//! Type classification and type-erased decoding.
//!
//! Every declared type is described by a [`TypeSpec`]: its JSON schema as
//! produced by `schemars`, plus a decoder that turns a structural value into
//! the concrete Rust type. Classification and documentation read the schema;
//! request binding runs the decoder. Both come from the same declaration, so
//! they cannot drift apart.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use serde_path_to_error::Segment;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::FieldError;

/// A bound argument value, owned by the request that produced it.
pub type Bound = Box<dyn Any + Send>;

type Decoder = Arc<dyn Fn(Value, &str) -> Result<Bound, Vec<FieldError>> + Send + Sync>;

/// Documentation data-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    Number,
    String,
    Boolean,
    Array,
    BinaryString,
    Object,
}

impl DataType {
    /// Reads the tag off a (non-nullable) schema node.
    pub fn of_schema(schema: &Value) -> DataType {
        match schema_type(schema) {
            Some("integer") => DataType::Integer,
            Some("number") => DataType::Number,
            Some("boolean") => DataType::Boolean,
            Some("array") => DataType::Array,
            Some("string") if schema.get("format").and_then(Value::as_str) == Some("binary") => {
                DataType::BinaryString
            }
            Some("string") => DataType::String,
            _ => DataType::Object,
        }
    }

    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Number | DataType::String | DataType::Boolean
        )
    }

    /// Minimal schema fragment for documentation.
    pub fn schema(self) -> Value {
        let mut node = Map::new();
        match self {
            DataType::BinaryString => {
                node.insert("type".into(), "string".into());
                node.insert("format".into(), "binary".into());
            }
            other => {
                node.insert("type".into(), other.as_str().into());
            }
        }
        Value::Object(node)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Number => "number",
            DataType::String | DataType::BinaryString => "string",
            DataType::Boolean => "boolean",
            DataType::Array => "array",
            DataType::Object => "object",
        }
    }

    /// Coerces a raw textual value (path segment, query value, form field)
    /// into the structural value of this scalar type.
    pub fn coerce(self, raw: &str) -> Result<Value, (String, String)> {
        match self {
            DataType::Integer => {
                let raw = raw.trim();
                if let Ok(n) = raw.parse::<i64>() {
                    Ok(Value::from(n))
                } else if let Ok(n) = raw.parse::<u64>() {
                    Ok(Value::from(n))
                } else {
                    Err(type_error("integer"))
                }
            }
            DataType::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| type_error("number")),
            DataType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(type_error("boolean")),
            },
            DataType::String => Ok(Value::String(raw.to_string())),
            _ => Err(type_error(self.as_str())),
        }
    }
}

/// The single non-null `type` of a schema node; flattens `type: [T, "null"]`.
pub fn schema_type(node: &Value) -> Option<&str> {
    match node.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => {
            let mut non_null = types.iter().filter_map(Value::as_str).filter(|t| *t != "null");
            let first = non_null.next();
            if non_null.next().is_some() {
                None
            } else {
                first
            }
        }
        _ => None,
    }
}

fn type_error(expected: &str) -> (String, String) {
    (
        format!("value is not a valid {expected}"),
        format!("type_error.{expected}"),
    )
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a declared type means for binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Scalar bound from a path segment or query value.
    Scalar { data_type: DataType, nullable: bool },
    /// Object schema bound from the request body.
    Structural,
    Unsupported,
}

/// Classifies a root schema.
pub fn classify(schema: &Value) -> Classification {
    let (node, nullable) = unwrap_nullable(schema);
    let node = resolve_local_ref(node, schema);
    let data_type = DataType::of_schema(node);
    if data_type.is_scalar() {
        return Classification::Scalar {
            data_type,
            nullable,
        };
    }
    if !nullable
        && schema_type(node) == Some("object")
        && node.get("properties").is_some_and(Value::is_object)
    {
        return Classification::Structural;
    }
    Classification::Unsupported
}

/// Strips `null` alternatives from a schema node, reporting whether any were present.
///
/// Handles the three spellings schema generators use: `type: [T, "null"]`,
/// `anyOf/oneOf: [S, {type: null}]` and `nullable: true`.
pub fn unwrap_nullable(schema: &Value) -> (&Value, bool) {
    if let Some(types) = schema.get("type").and_then(Value::as_array) {
        let non_null: Vec<&Value> = types.iter().filter(|t| *t != "null").collect();
        if non_null.len() == 1 && non_null.len() < types.len() {
            return (schema, true);
        }
    }
    for key in ["anyOf", "oneOf"] {
        if let Some(variants) = schema.get(key).and_then(Value::as_array) {
            let non_null: Vec<&Value> = variants
                .iter()
                .filter(|v| v.get("type").and_then(Value::as_str) != Some("null"))
                .collect();
            if non_null.len() == 1 && non_null.len() < variants.len() {
                return (non_null[0], true);
            }
        }
    }
    let nullable = schema
        .get("nullable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    (schema, nullable)
}

/// Copy of a node with `type: [T, "null"]` flattened to `T` and `nullable` dropped.
pub fn normalized(node: &Value) -> Value {
    let mut node = node.clone();
    if let Some(obj) = node.as_object_mut() {
        if let Some(Value::Array(types)) = obj.get("type").cloned() {
            let non_null: Vec<Value> = types.into_iter().filter(|t| t != "null").collect();
            if non_null.len() == 1 {
                obj.insert("type".into(), non_null[0].clone());
            }
        }
        obj.remove("nullable");
    }
    node
}

/// Name of the definition a `$ref` points at, if the node is a reference.
pub fn ref_name(node: &Value) -> Option<&str> {
    node.get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.rsplit('/').next())
}

/// Follows a `$ref` into the root's own definitions table.
pub fn resolve_local_ref<'a>(node: &'a Value, root: &'a Value) -> &'a Value {
    match ref_name(node).and_then(|name| definitions(root).and_then(|defs| defs.get(name))) {
        Some(def) => def,
        None => node,
    }
}

/// The nested definitions table of a root schema.
pub fn definitions(root: &Value) -> Option<&Map<String, Value>> {
    root.get("$defs")
        .or_else(|| root.get("definitions"))
        .and_then(Value::as_object)
}

/// Points every `$ref` at the document's components table.
pub fn rewrite_refs(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get_mut("$ref") {
                for prefix in ["#/$defs/", "#/definitions/"] {
                    if let Some(name) = reference.strip_prefix(prefix) {
                        *reference = component_ref(name);
                        break;
                    }
                }
            }
            for child in map.values_mut() {
                rewrite_refs(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}

pub fn component_ref(name: &str) -> String {
    format!("#/components/schemas/{name}")
}

/// Splits a root schema into the component body and its hoisted definitions.
pub fn split_root(root: &Value) -> (Value, Map<String, Value>) {
    let mut body = root.clone();
    let mut defs = Map::new();
    if let Some(obj) = body.as_object_mut() {
        obj.remove("$schema");
        for key in ["$defs", "definitions"] {
            if let Some(Value::Object(found)) = obj.remove(key) {
                defs.extend(found);
            }
        }
    }
    rewrite_refs(&mut body);
    for def in defs.values_mut() {
        rewrite_refs(def);
    }
    (body, defs)
}

/// Declared type of a parameter: schema for documentation and a decoder for binding.
#[derive(Clone)]
pub struct TypeSpec {
    type_name: &'static str,
    schema: Value,
    decode: Decoder,
}

impl TypeSpec {
    /// Describes `T` using its `serde` and `schemars` implementations.
    pub fn of<T>() -> Self
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
    {
        Self::build::<T>(Arc::new(|value, loc| {
            decode_value::<T>(value, loc).map(|v| Box::new(v) as Bound)
        }))
    }

    /// Like [`TypeSpec::of`], additionally running the `validator` rules of `T`.
    pub fn validated<T>() -> Self
    where
        T: DeserializeOwned + JsonSchema + Validate + Send + 'static,
    {
        Self::build::<T>(Arc::new(|value, loc| {
            let decoded = decode_value::<T>(value, loc)?;
            decoded
                .validate()
                .map_err(|errors| validator_errors(&errors, loc))?;
            Ok(Box::new(decoded) as Bound)
        }))
    }

    fn build<T: JsonSchema>(decode: Decoder) -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
        Self {
            type_name: std::any::type_name::<T>(),
            schema,
            decode,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The root schema, including its nested definitions.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn classify(&self) -> Classification {
        classify(&self.schema)
    }

    /// Schema title, falling back to the short Rust type name.
    pub fn title(&self) -> String {
        self.schema
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| short_type_name(self.type_name).to_string())
    }

    /// Checks required fields, then decodes. `loc` prefixes every error location.
    pub fn decode(&self, value: Value, loc: &str) -> Result<Bound, Vec<FieldError>> {
        let missing = self.missing_fields(&value, loc);
        if !missing.is_empty() {
            return Err(missing);
        }
        (self.decode)(value, loc)
    }

    /// Structural check only: is `value` a valid instance of this type?
    pub fn check(&self, value: &Value, loc: &str) -> Result<(), Vec<FieldError>> {
        self.decode(value.clone(), loc).map(|_| ())
    }

    fn missing_fields(&self, value: &Value, loc: &str) -> Vec<FieldError> {
        let Some(required) = self.schema.get("required").and_then(Value::as_array) else {
            return Vec::new();
        };
        let Some(object) = value.as_object() else {
            return Vec::new();
        };
        required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| object.get(*field).is_none_or(Value::is_null))
            .map(|field| FieldError::missing([loc, field]))
            .collect()
    }
}

impl fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSpec")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn decode_value<T: DeserializeOwned>(value: Value, loc: &str) -> Result<T, Vec<FieldError>> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(|e| {
        let mut path = vec![loc.to_string()];
        for segment in e.path().iter() {
            match segment {
                Segment::Seq { index } => path.push(index.to_string()),
                Segment::Map { key } => path.push(key.clone()),
                Segment::Enum { variant } => path.push(variant.clone()),
                _ => {}
            }
        }
        vec![FieldError::new(
            path,
            e.inner().to_string(),
            "value_error.deserialize",
        )]
    })
}

fn validator_errors(errors: &ValidationErrors, loc: &str) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect_validator_errors(errors, &[loc.to_string()], &mut out);
    out.sort_by(|a, b| a.loc.cmp(&b.loc));
    out
}

/// Flattens nested struct and list errors, extending `prefix` at each level.
fn collect_validator_errors(errors: &ValidationErrors, prefix: &[String], out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let mut loc = prefix.to_vec();
        loc.push(field.to_string());
        match kind {
            ValidationErrorsKind::Field(list) => {
                out.extend(list.iter().map(|e| {
                    let msg = e
                        .message
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| format!("failed `{}` validation", e.code));
                    FieldError::new(loc.clone(), msg, format!("value_error.{}", e.code))
                }));
            }
            ValidationErrorsKind::Struct(inner) => collect_validator_errors(inner, &loc, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    let mut item_loc = loc.clone();
                    item_loc.push(index.to_string());
                    collect_validator_errors(inner, &item_loc, out);
                }
            }
        }
    }
}

/// `alloc::vec::Vec<my_app::Pet>` -> `Vec<my_app::Pet>`, `my_app::Pet` -> `Pet`.
pub fn short_type_name(full: &str) -> &str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
