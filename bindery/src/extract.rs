//! Request-side values: the host-neutral incoming request and the bound argument set.

use std::any::type_name;
use std::collections::HashMap;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, FieldError};
use crate::multipart::{self, MultipartConfig};
use crate::schema::Bound;

/// Values captured from the matched path pattern, keyed by placeholder name.
pub type PathParams = HashMap<String, String>;

/// Typed JSON payload, returned from handlers as a reply body.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One submitted multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Parsed request payload, as handed over by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<FormPart>),
    Raw { content_type: String, data: Bytes },
}

impl Body {
    /// Parses a raw payload according to its declared content type.
    /// Multipart payloads beyond `limits` fail with 413.
    pub fn parse(
        content_type: Option<&str>,
        data: Bytes,
        limits: &MultipartConfig,
    ) -> Result<Self, Error> {
        if data.is_empty() && content_type.is_none() {
            return Ok(Body::Empty);
        }
        let content_type = content_type.unwrap_or("application/octet-stream");
        let essence = mime_essence(content_type);
        match essence.as_str() {
            "application/json" => {
                if data.is_empty() {
                    return Ok(Body::Empty);
                }
                serde_json::from_slice(&data).map(Body::Json).map_err(|e| {
                    Error::validation_errors(vec![FieldError::new(
                        ["body"],
                        format!("invalid JSON: {e}"),
                        "value_error.jsondecode",
                    )])
                })
            }
            "application/x-www-form-urlencoded" => serde_urlencoded::from_bytes(&data)
                .map(Body::Form)
                .map_err(|e| {
                    Error::validation_errors(vec![FieldError::new(
                        ["body"],
                        format!("invalid form body: {e}"),
                        "value_error.form",
                    )])
                }),
            "multipart/form-data" => multipart::parse_body(content_type, &data, limits)
                .map(Body::Multipart)
                .map_err(|e| {
                    if e.is_limit() {
                        return Error::new(413, e.to_string());
                    }
                    Error::validation_errors(vec![FieldError::new(
                        ["body"],
                        e.to_string(),
                        "value_error.multipart",
                    )])
                }),
            _ => Ok(Body::Raw {
                content_type: content_type.to_string(),
                data,
            }),
        }
    }

    /// Content type this body was submitted with, for error messages.
    pub fn kind(&self) -> &str {
        match self {
            Body::Empty => "empty",
            Body::Json(_) => "application/json",
            Body::Form(_) => "application/x-www-form-urlencoded",
            Body::Multipart(_) => "multipart/form-data",
            Body::Raw { content_type, .. } => content_type,
        }
    }
}

/// `text/plain; charset=utf-8` -> `text/plain`.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Everything the binder needs from one incoming request.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub path: String,
    pub path_params: PathParams,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Body,
}

impl IncomingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            path_params: PathParams::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Builds the request from an `http` request whose body is already collected.
    pub fn from_http(
        req: Request<Bytes>,
        path_params: PathParams,
        limits: &MultipartConfig,
    ) -> Result<Self, Error> {
        let (parts, data) = req.into_parts();
        let query = match parts.uri.query() {
            Some(q) => serde_urlencoded::from_str(q).map_err(|e| {
                Error::validation_errors(vec![FieldError::new(
                    ["query"],
                    format!("invalid query string: {e}"),
                    "value_error.query",
                )])
            })?,
            None => Vec::new(),
        };
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let body = Body::parse(content_type, data, limits)?;
        Ok(Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            path_params,
            query,
            headers: parts.headers,
            body,
        })
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        self.body = Body::Json(serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// First value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The fully bound argument set handed to a handler or dependency callable.
///
/// Each value is moved out exactly once with [`Arguments::take`].
#[derive(Default)]
pub struct Arguments {
    values: HashMap<String, Bound>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Bound) {
        self.values.insert(name.into(), value);
    }

    /// Moves the bound value named `name` out, as `T`.
    ///
    /// A missing name or a type other than the declared one is a programming
    /// error in the handler and surfaces as an internal error.
    pub fn take<T: 'static>(&mut self, name: &str) -> Result<T, Error> {
        let value = self
            .values
            .remove(name)
            .ok_or_else(|| Error::internal(format!("argument `{name}` was not bound")))?;
        value.downcast::<T>().map(|v| *v).map_err(|_| {
            Error::internal(format!(
                "argument `{name}` is not a `{}`",
                type_name::<T>()
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        f.debug_struct("Arguments").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arguments_take_moves_value_out() {
        let mut args = Arguments::new();
        args.insert("limit", Box::new(10_i64));
        assert_eq!(args.take::<i64>("limit").unwrap(), 10);
        assert!(args.take::<i64>("limit").is_err());
    }

    #[test]
    fn test_arguments_take_wrong_type_is_internal() {
        let mut args = Arguments::new();
        args.insert("limit", Box::new(10_i64));
        let err = args.take::<String>("limit").unwrap_err();
        assert_eq!(err.status, 500);
    }

    #[test]
    fn test_body_parse_json() {
        let body = Body::parse(Some("application/json"), Bytes::from(r#"{"a":1}"#), &MultipartConfig::default()).unwrap();
        assert_eq!(body, Body::Json(json!({ "a": 1 })));
    }

    #[test]
    fn test_body_parse_malformed_json_is_validation_error() {
        let err = Body::parse(Some("application/json"), Bytes::from("{nope"), &MultipartConfig::default()).unwrap_err();
        assert_eq!(err.status, 422);
    }

    #[test]
    fn test_body_parse_url_encoded() {
        let body = Body::parse(
            Some("application/x-www-form-urlencoded"),
            Bytes::from("username=ada&password=secret"),
            &MultipartConfig::default(),
        )
        .unwrap();
        assert_eq!(
            body,
            Body::Form(vec![
                ("username".into(), "ada".into()),
                ("password".into(), "secret".into())
            ])
        );
    }

    #[test]
    fn test_body_parse_other_content_is_raw() {
        let body = Body::parse(Some("image/png; q=1"), Bytes::from_static(b"\x89PNG"), &MultipartConfig::default()).unwrap();
        match body {
            Body::Raw { content_type, data } => {
                assert_eq!(content_type, "image/png; q=1");
                assert_eq!(&data[..], b"\x89PNG");
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_from_http_collects_query_and_headers() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/pets?limit=5&tag=a&tag=b")
            .header("authorization", "Bearer abc")
            .body(Bytes::new())
            .unwrap();
        let incoming = IncomingRequest::from_http(req, PathParams::new(), &MultipartConfig::default()).unwrap();
        assert_eq!(incoming.path, "/pets");
        assert_eq!(incoming.query_value("limit"), Some("5"));
        assert_eq!(incoming.query_value("tag"), Some("a"));
        assert_eq!(incoming.header_value("authorization"), Some("Bearer abc"));
        assert_eq!(incoming.body, Body::Empty);
    }

    #[test]
    fn test_multipart_over_limit_is_413() {
        let data = multipart::encode(
            "XyZ",
            &[FormPart::file("f", "f.bin", "application/octet-stream", vec![0u8; 16])],
        );
        let err = Body::parse(
            Some("multipart/form-data; boundary=XyZ"),
            Bytes::from(data),
            &MultipartConfig::new().max_file_size(8),
        )
        .unwrap_err();
        assert_eq!(err.status, 413);
    }

    #[test]
    fn test_mime_essence() {
        assert_eq!(mime_essence("Text/Plain; charset=utf-8"), "text/plain");
    }
}
