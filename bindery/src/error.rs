use std::fmt;

use http::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};

/// Body detail returned for every internal failure. The real cause is only logged.
pub const INTERNAL_ERROR_DETAIL: &str = "Something went wrong internally.";

/// One offending field in a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Location of the field, e.g. `["query", "limit"]` or `["body", "owner"]`.
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new<I, S>(loc: I, msg: impl Into<String>, kind: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            loc: loc.into_iter().map(Into::into).collect(),
            msg: msg.into(),
            kind: kind.into(),
        }
    }

    /// A required value was not supplied.
    pub fn missing<I, S>(loc: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(loc, "field required", "value_error.missing")
    }
}

/// Per-request failure: carries the status code and what the caller is allowed to see.
#[derive(Debug)]
pub struct Error {
    pub status: u16,
    pub message: String,
    pub errors: Vec<FieldError>,
}

impl Error {
    /// Creates an error with an explicit status. An empty message falls back
    /// to the canonical reason phrase of the status.
    pub fn new(status: u16, msg: impl Into<String>) -> Self {
        let message = msg.into();
        let message = if message.is_empty() {
            reason_phrase(status)
        } else {
            message
        };
        Self {
            status,
            message,
            errors: Vec::new(),
        }
    }

    pub fn from_status(status: u16) -> Self {
        Self::new(status, "")
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(400, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(401, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(403, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(404, msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(422, msg)
    }

    /// 422 carrying structured field errors.
    pub fn validation_errors(errors: Vec<FieldError>) -> Self {
        Self {
            status: 422,
            message: reason_phrase(422),
            errors,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(500, msg)
    }

    pub fn is_internal(&self) -> bool {
        self.status >= 500
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// The JSON body sent to the caller.
    pub fn to_body(&self) -> Value {
        if self.is_internal() {
            json!({ "detail": INTERNAL_ERROR_DETAIL })
        } else if !self.errors.is_empty() {
            json!({ "detail": self.errors })
        } else {
            json!({ "detail": self.message })
        }
    }
}

fn reason_phrase(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error")
        .to_string()
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "{}", self.message)
        } else {
            let fields: Vec<String> = self.errors.iter().map(|e| e.loc.join(".")).collect();
            write!(f, "{}: {}", self.message, fields.join(", "))
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Start-up failures. Any of these must abort registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The path pattern could not be parsed.
    InvalidPath { path: String, reason: String },
    /// A placeholder in the path has no scalar parameter bound to it.
    UnresolvedPlaceholder { handler: String, placeholder: String },
    /// A path-bound parameter declared a default value.
    DefaultOnPathParameter { handler: String, param: String },
    /// The same parameter name was declared twice.
    DuplicateParameter { handler: String, param: String },
    /// More than one parameter wants the request body.
    DuplicateBody { handler: String, param: String },
    /// The declared type maps to no binding kind.
    UnsupportedType {
        handler: String,
        param: String,
        type_name: String,
    },
    /// A form field type could not be decomposed.
    UnreducibleField {
        handler: String,
        param: String,
        field: String,
    },
    /// A form pattern is not a valid regular expression.
    InvalidPattern { handler: String, pattern: String },
    /// Two schemas share a definition name but not a shape.
    SchemaCollision { name: String },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath { path, reason } => write!(f, "invalid path `{path}`: {reason}"),
            Self::UnresolvedPlaceholder {
                handler,
                placeholder,
            } => write!(
                f,
                "path placeholder `{placeholder}` of `{handler}` is not bound to a scalar parameter"
            ),
            Self::DefaultOnPathParameter { handler, param } => write!(
                f,
                "path parameter `{param}` of `{handler}` must not declare a default"
            ),
            Self::DuplicateParameter { handler, param } => {
                write!(f, "parameter `{param}` of `{handler}` is declared twice")
            }
            Self::DuplicateBody { handler, param } => write!(
                f,
                "more than one request body found for `{handler}` (second: `{param}`)"
            ),
            Self::UnsupportedType {
                handler,
                param,
                type_name,
            } => write!(
                f,
                "unsupported type `{type_name}` for parameter `{param}` of `{handler}`"
            ),
            Self::UnreducibleField {
                handler,
                param,
                field,
            } => write!(
                f,
                "field `{field}` of form `{param}` in `{handler}` has an unsupported type"
            ),
            Self::InvalidPattern { handler, pattern } => {
                write!(f, "invalid form pattern `{pattern}` for `{handler}`")
            }
            Self::SchemaCollision { name } => write!(
                f,
                "schema definition `{name}` is declared twice with different shapes"
            ),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Failures while assembling the composed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// `generate` was called on a blueprint instead of the top-level API.
    NotTopLevel { blueprint: String },
    /// A route requires authentication but no auth scheme is configured.
    MissingAuthScheme { path: String, method: String },
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotTopLevel { blueprint } => write!(
                f,
                "cannot generate a document from blueprint `{blueprint}`; extend the top-level API with it instead"
            ),
            Self::MissingAuthScheme { path, method } => write!(
                f,
                "{method} {path} requires authentication but no auth scheme is configured"
            ),
        }
    }
}

impl std::error::Error for DocumentError {}
