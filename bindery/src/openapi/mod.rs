//! Composed API document types.
//!
//! Only the subset of OpenAPI 3 the binder emits: JSON, url-encoded,
//! multipart and binary bodies, path and query parameters, and one
//! security-scheme table.

mod endpoint;
mod ui;

pub use endpoint::{openapi_json, redoc, swagger_ui};

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// The emitted document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenApiSpec {
    pub openapi: String,
    pub info: Info,
    pub paths: BTreeMap<String, PathItem>,
    pub components: Components,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Info {
    pub title: String,
    pub version: String,
}

/// Operations of one path, keyed by lowercase method.
pub type PathItem = BTreeMap<String, Operation>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: String,
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    pub responses: BTreeMap<String, Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Vec<BTreeMap<String, Vec<String>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestBody {
    pub content: BTreeMap<String, MediaTypeObject>,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaTypeObject {
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<BTreeMap<String, MediaTypeObject>>,
}

impl Response {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            content: None,
        }
    }

    pub fn json(description: impl Into<String>, schema: Value) -> Self {
        Self {
            description: description.into(),
            content: Some(BTreeMap::from([(
                "application/json".to_string(),
                MediaTypeObject { schema },
            )])),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    pub schemas: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_schemes: Option<BTreeMap<String, SecurityScheme>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityScheme {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flows: Option<BTreeMap<String, OAuthFlow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthFlow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    pub scopes: BTreeMap<String, String>,
}

/// Shared schema of every `422` response.
pub fn validation_error_schema() -> Value {
    serde_json::json!({
        "title": "HTTPValidationError",
        "type": "object",
        "properties": {
            "detail": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "loc": { "type": "array", "items": { "type": "string" } },
                        "msg": { "type": "string" },
                        "type": { "type": "string" }
                    },
                    "required": ["loc", "msg", "type"]
                }
            }
        }
    })
}
