//! Parameter declarations: the binding table entries a route is built from.

use std::fmt;

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::dependency::{Dependency, Security};
use crate::schema::TypeSpec;

/// Body encoding of a form parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    UrlEncoded,
    Multipart,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::UrlEncoded => "application/x-www-form-urlencoded",
            MediaType::Multipart => "multipart/form-data",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Form wrapper options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
    pub media_type: MediaType,
    /// Lower bound on the submitted payload size, in bytes.
    pub min_length: Option<usize>,
    /// Upper bound on the submitted payload size, in bytes.
    pub max_length: Option<usize>,
    /// Every submitted text field must match this pattern.
    pub pattern: Option<String>,
}

impl FormSpec {
    pub fn url_encoded() -> Self {
        Self::with_media_type(MediaType::UrlEncoded)
    }

    pub fn multipart() -> Self {
        Self::with_media_type(MediaType::Multipart)
    }

    fn with_media_type(media_type: MediaType) -> Self {
        Self {
            media_type,
            min_length: None,
            max_length: None,
            pattern: None,
        }
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// Raw file body options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub mime_type: String,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

impl FileSpec {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            min_length: None,
            max_length: None,
        }
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// An uploaded file: a raw file body, or a file part of a multipart form.
///
/// Documented as a binary string. Use it as a field type inside multipart
/// form schemas, or receive it from a [`Param::file`] binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub filename: Option<String>,
    pub content_type: String,
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
}

/// File bytes cross the structural value as one base64 string.
mod base64_data {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

impl UploadFile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl JsonSchema for UploadFile {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "UploadFile".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "string",
            "format": "binary"
        })
    }
}

/// One entry of a route's binding table.
///
/// The variant decides nothing by itself: scalar-versus-body classification of
/// [`Param::of`] happens at registration, against the route's path pattern.
#[derive(Clone)]
pub enum Param {
    Typed {
        spec: TypeSpec,
        default: Option<Value>,
    },
    Form {
        spec: TypeSpec,
        form: FormSpec,
    },
    File(FileSpec),
    Depends(Dependency),
    Security(Security),
}

impl Param {
    /// A declared type without a default.
    pub fn of<T>() -> Self
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
    {
        Param::Typed {
            spec: TypeSpec::of::<T>(),
            default: None,
        }
    }

    /// A declared type with a default, bound when the request omits it.
    pub fn with_default<T>(default: T) -> Self
    where
        T: Serialize + DeserializeOwned + JsonSchema + Send + 'static,
    {
        Param::Typed {
            spec: TypeSpec::of::<T>(),
            default: Some(serde_json::to_value(default).unwrap_or(Value::Null)),
        }
    }

    /// A structural type whose `validator` rules run after decoding.
    pub fn validated<T>() -> Self
    where
        T: DeserializeOwned + JsonSchema + Validate + Send + 'static,
    {
        Param::Typed {
            spec: TypeSpec::validated::<T>(),
            default: None,
        }
    }

    /// A form body decoded into `T`.
    pub fn form<T>(form: FormSpec) -> Self
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
    {
        Param::Form {
            spec: TypeSpec::of::<T>(),
            form,
        }
    }

    /// A form body decoded into `T`, with `T`'s `validator` rules applied.
    pub fn validated_form<T>(form: FormSpec) -> Self
    where
        T: DeserializeOwned + JsonSchema + Validate + Send + 'static,
    {
        Param::Form {
            spec: TypeSpec::validated::<T>(),
            form,
        }
    }

    /// A raw file body, bound as [`UploadFile`].
    pub fn file(spec: FileSpec) -> Self {
        Param::File(spec)
    }

    pub fn depends(dependency: Dependency) -> Self {
        Param::Depends(dependency)
    }

    pub fn security(security: Security) -> Self {
        Param::Security(security)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Typed { spec, default } => f
                .debug_struct("Typed")
                .field("type", &spec.type_name())
                .field("default", default)
                .finish(),
            Param::Form { spec, form } => f
                .debug_struct("Form")
                .field("type", &spec.type_name())
                .field("media_type", &form.media_type)
                .finish(),
            Param::File(spec) => f.debug_tuple("File").field(spec).finish(),
            Param::Depends(dep) => f.debug_tuple("Depends").field(&dep.name()).finish(),
            Param::Security(sec) => f
                .debug_tuple("Security")
                .field(&sec.scheme().scheme)
                .finish(),
        }
    }
}

/// Standard OAuth2 password-flow login form.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct OAuth2PasswordRequestForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl OAuth2PasswordRequestForm {
    /// The url-encoded form binding for this schema.
    pub fn param() -> Param {
        Param::form::<Self>(FormSpec::url_encoded())
    }
}
