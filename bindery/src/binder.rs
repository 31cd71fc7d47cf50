//! Request-time binding: executes a route's [`ValidationPlan`] against one request.
//!
//! Binding runs in three steps and stops at the first failing one:
//! path and query values (all errors reported together), then the body,
//! then dependencies in declaration order.

use serde_json::{Map, Value};
use tracing::debug;

use crate::analyzer::{BindingKind, FieldKind, FormField, FormPlan, ValidationPlan};
use crate::error::{Error, FieldError};
use crate::extract::{Arguments, Body, IncomingRequest, mime_essence};
use crate::params::{FileSpec, MediaType, UploadFile};
use crate::schema::{Bound, DataType, TypeSpec};

/// Binds every parameter of `plan` from `request`.
pub(crate) async fn bind(plan: &ValidationPlan, request: &IncomingRequest) -> Result<Arguments, Error> {
    let mut args = Arguments::new();

    let mut errors = Vec::new();
    for binding in &plan.bindings {
        let name = binding.name.as_str();
        let bound = match &binding.kind {
            BindingKind::Path { spec, data_type } => match request.path_params.get(name) {
                Some(raw) => match urlencoding::decode(raw) {
                    Ok(text) => bind_scalar(spec, *data_type, &text, "path", name),
                    Err(_) => Err(vec![FieldError::new(
                        ["path", name],
                        "path segment is not valid UTF-8 after percent-decoding",
                        "value_error.str.encoding",
                    )]),
                },
                None => Err(vec![FieldError::missing(["path", name])]),
            },
            BindingKind::Query {
                spec,
                data_type,
                default,
                nullable,
            } => match (request.query_value(name), default) {
                (Some(raw), _) => bind_scalar(spec, *data_type, raw, "query", name),
                (None, Some(default)) => decode_at(spec, default.clone(), "query", name),
                (None, None) if *nullable => decode_at(spec, Value::Null, "query", name),
                (None, None) => Err(vec![FieldError::missing(["query", name])]),
            },
            _ => continue,
        };
        match bound {
            Ok(value) => args.insert(name, value),
            Err(errs) => errors.extend(errs),
        }
    }
    if !errors.is_empty() {
        debug!(path = %request.path, errors = errors.len(), "request parameters failed validation");
        return Err(Error::validation_errors(errors));
    }

    for binding in &plan.bindings {
        let name = binding.name.as_str();
        let bound = match &binding.kind {
            BindingKind::Json { spec } => bind_json(spec, &request.body),
            BindingKind::Form(form) => bind_form(form, &request.body),
            BindingKind::File(file) => bind_file(file, name, &request.body),
            _ => continue,
        };
        match bound {
            Ok(value) => args.insert(name, value),
            Err(errors) => {
                debug!(path = %request.path, param = name, "request body failed validation");
                return Err(Error::validation_errors(errors));
            }
        }
    }

    for binding in &plan.bindings {
        let value = match &binding.kind {
            BindingKind::Dependency(dep) => dep.resolve(request).await?,
            BindingKind::Security(sec) => Box::new(sec.extract(request)?) as Bound,
            _ => continue,
        };
        args.insert(binding.name.as_str(), value);
    }

    Ok(args)
}

fn bind_scalar(
    spec: &TypeSpec,
    data_type: DataType,
    raw: &str,
    place: &str,
    name: &str,
) -> Result<Bound, Vec<FieldError>> {
    let value = data_type
        .coerce(raw)
        .map_err(|(msg, kind)| vec![FieldError::new([place, name], msg, kind)])?;
    decode_at(spec, value, place, name)
}

/// Decodes with every error location prefixed by `place`.
fn decode_at(spec: &TypeSpec, value: Value, place: &str, name: &str) -> Result<Bound, Vec<FieldError>> {
    spec.decode(value, name).map_err(|errors| {
        errors
            .into_iter()
            .map(|mut e| {
                e.loc.insert(0, place.to_string());
                e
            })
            .collect()
    })
}

fn bind_json(spec: &TypeSpec, body: &Body) -> Result<Bound, Vec<FieldError>> {
    match body {
        Body::Json(value) => spec.decode(value.clone(), "body"),
        Body::Empty => Err(vec![FieldError::missing(["body"])]),
        other => Err(vec![unexpected_content(other, "application/json")]),
    }
}

fn unexpected_content(body: &Body, expected: &str) -> FieldError {
    FieldError::new(
        ["body"],
        format!("expected {expected} body, got {}", body.kind()),
        "value_error.content_type",
    )
}

/// One submitted form value.
enum Submitted<'a> {
    Text(&'a str),
    File(UploadFile),
}

fn bind_form(plan: &FormPlan, body: &Body) -> Result<Bound, Vec<FieldError>> {
    let submitted = submitted_fields(plan.media_type, body)?;

    let size: usize = submitted
        .iter()
        .map(|(_, value)| match value {
            Submitted::Text(text) => text.len(),
            Submitted::File(file) => file.len(),
        })
        .sum();
    if plan.min_length.is_some_and(|min| size < min) || plan.max_length.is_some_and(|max| size > max) {
        return Err(vec![FieldError::new(
            ["body"],
            "form payload size is out of bounds",
            "value_error.form_size",
        )]);
    }

    let mut errors = Vec::new();
    if let Some(pattern) = &plan.pattern {
        for (name, value) in &submitted {
            if let Submitted::Text(text) = value {
                if !pattern.is_match(text) {
                    errors.push(FieldError::new(
                        ["body", *name],
                        format!("string does not match regex \"{}\"", pattern.as_str()),
                        "value_error.str.regex",
                    ));
                }
            }
        }
    }

    let mut object = Map::new();
    for field in &plan.fields {
        let values: Vec<&Submitted<'_>> = submitted
            .iter()
            .filter(|(name, _)| *name == field.name)
            .map(|(_, value)| value)
            .collect();
        match rebuild_field(field, &values) {
            Ok(Some(value)) => {
                object.insert(field.name.clone(), value);
            }
            Ok(None) => {}
            Err(error) => errors.push(error),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    plan.spec.decode(Value::Object(object), "body")
}

fn submitted_fields(media_type: MediaType, body: &Body) -> Result<Vec<(&str, Submitted<'_>)>, Vec<FieldError>> {
    match (media_type, body) {
        (_, Body::Empty) => Ok(Vec::new()),
        (MediaType::UrlEncoded, Body::Form(pairs)) => Ok(pairs
            .iter()
            .map(|(name, value)| (name.as_str(), Submitted::Text(value.as_str())))
            .collect()),
        (MediaType::Multipart, Body::Multipart(parts)) => parts
            .iter()
            .map(|part| {
                if part.is_file() {
                    let file = UploadFile {
                        filename: part.filename.clone(),
                        content_type: part
                            .content_type
                            .clone()
                            .unwrap_or_else(|| "application/octet-stream".to_string()),
                        data: part.data.to_vec(),
                    };
                    Ok((part.name.as_str(), Submitted::File(file)))
                } else {
                    part.as_text()
                        .map(|text| (part.name.as_str(), Submitted::Text(text)))
                        .ok_or_else(|| {
                            vec![FieldError::new(
                                ["body", part.name.as_str()],
                                "field is not valid UTF-8",
                                "value_error.str.encoding",
                            )]
                        })
                }
            })
            .collect(),
        (media_type, other) => Err(vec![unexpected_content(other, media_type.as_str())]),
    }
}

/// Rebuilds one field's structural value from its flat submissions.
/// `Ok(None)` leaves the field absent so decoding reports it if required.
fn rebuild_field<'a>(
    field: &FormField,
    values: &[&Submitted<'a>],
) -> Result<Option<Value>, FieldError> {
    let name = field.name.as_str();
    let text_error = |msg: String, kind: String| FieldError::new(["body", name], msg, kind);
    let texts = || -> Result<Vec<&'a str>, FieldError> {
        values
            .iter()
            .map(|value| match value {
                Submitted::Text(text) => Ok(*text),
                Submitted::File(_) => Err(FieldError::new(
                    ["body", name],
                    "expected a text field, got a file",
                    "type_error.str",
                )),
            })
            .collect()
    };
    let files = || -> Result<Vec<Value>, FieldError> {
        values
            .iter()
            .map(|value| match value {
                Submitted::File(file) => serde_json::to_value(file)
                    .map_err(|e| FieldError::new(["body", name], e.to_string(), "value_error.file")),
                Submitted::Text(_) => Err(FieldError::new(
                    ["body", name],
                    "expected a file upload",
                    "type_error.file",
                )),
            })
            .collect()
    };
    let parse_json = |text: &str| {
        serde_json::from_str::<Value>(text)
            .map_err(|e| text_error(format!("invalid JSON: {e}"), "value_error.jsondecode".to_string()))
    };

    if values.is_empty() {
        return Ok(None);
    }
    let single = matches!(field.kind, FieldKind::Scalar(_) | FieldKind::Object(_) | FieldKind::File);
    if single && values.len() > 1 {
        return Err(text_error(
            format!("expected a single value, got {}", values.len()),
            "value_error.multiple".to_string(),
        ));
    }

    let value = match &field.kind {
        FieldKind::Scalar(data_type) => {
            let text = texts()?[0];
            data_type.coerce(text).map_err(|(msg, kind)| text_error(msg, kind))?
        }
        FieldKind::ScalarArray(data_type) => {
            let items = texts()?
                .into_iter()
                .map(|text| data_type.coerce(text).map_err(|(msg, kind)| text_error(msg, kind)))
                .collect::<Result<Vec<_>, _>>()?;
            Value::Array(items)
        }
        FieldKind::Object(_) => parse_json(texts()?[0])?,
        FieldKind::ObjectArray(_) => {
            let mut items = Vec::new();
            for text in texts()? {
                match parse_json(text)? {
                    Value::Array(many) => items.extend(many),
                    one => items.push(one),
                }
            }
            Value::Array(items)
        }
        FieldKind::File => files()?.swap_remove(0),
        FieldKind::FileArray => Value::Array(files()?),
    };
    Ok(Some(value))
}

fn bind_file(spec: &FileSpec, name: &str, body: &Body) -> Result<Bound, Vec<FieldError>> {
    let (content_type, data) = match body {
        Body::Raw { content_type, data } => (content_type.clone(), data.to_vec()),
        Body::Json(value) => (
            "application/json".to_string(),
            serde_json::to_vec(value).unwrap_or_default(),
        ),
        Body::Empty => return Err(vec![FieldError::missing(["body", name])]),
        other => (other.kind().to_string(), Vec::new()),
    };

    if mime_essence(&content_type) != mime_essence(&spec.mime_type) {
        return Err(vec![FieldError::new(
            ["body", name],
            "Invalid file type received.",
            "value_error.file_type",
        )]);
    }
    let len = data.len();
    if spec.min_length.is_some_and(|min| len < min) || spec.max_length.is_some_and(|max| len > max) {
        return Err(vec![FieldError::new(
            ["body", name],
            "Invalid file size received.",
            "value_error.file_size",
        )]);
    }

    Ok(Box::new(UploadFile {
        filename: None,
        content_type,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{PathPattern, analyze};
    use crate::extract::FormPart;
    use crate::params::{FormSpec, Param};
    use bytes::Bytes;
    use http::Method;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Vaccine {
        name: String,
        year: i32,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct PetUpload {
        name: String,
        tags: Option<Vec<String>>,
        vaccines: Vec<Vaccine>,
        photo: Option<UploadFile>,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Login {
        username: String,
        password: String,
    }

    fn plan(path: &str, params: Vec<(&str, Param)>) -> ValidationPlan {
        let pattern = PathPattern::parse(path).unwrap();
        let params: Vec<(String, Param)> = params.into_iter().map(|(n, p)| (n.to_string(), p)).collect();
        analyze(&pattern, "handler", &params).unwrap().plan
    }

    #[tokio::test]
    async fn test_path_and_query_errors_are_reported_together() {
        let plan = plan(
            "/pets/:pet_id",
            vec![("pet_id", Param::of::<i64>()), ("limit", Param::of::<u32>())],
        );
        let request = IncomingRequest::new(Method::GET, "/pets/x").path_param("pet_id", "x");
        let err = bind(&plan, &request).await.unwrap_err();
        assert_eq!(err.status, 422);
        let locs: Vec<Vec<String>> = err.errors.iter().map(|e| e.loc.clone()).collect();
        assert_eq!(
            locs,
            vec![
                vec!["path".to_string(), "pet_id".to_string()],
                vec!["query".to_string(), "limit".to_string()]
            ]
        );
        assert_eq!(err.errors[1].kind, "value_error.missing");
    }

    #[tokio::test]
    async fn test_query_default_and_optional() {
        let plan = plan(
            "/pets",
            vec![
                ("limit", Param::with_default::<u32>(10)),
                ("tag", Param::of::<Option<String>>()),
            ],
        );
        let mut args = bind(&plan, &IncomingRequest::new(Method::GET, "/pets")).await.unwrap();
        assert_eq!(args.take::<u32>("limit").unwrap(), 10);
        assert_eq!(args.take::<Option<String>>("tag").unwrap(), None);
    }

    #[tokio::test]
    async fn test_url_encoded_form_binds() {
        let plan = plan("/login", vec![("form", Param::form::<Login>(FormSpec::url_encoded()))]);
        let request = IncomingRequest::new(Method::POST, "/login").body(Body::Form(vec![
            ("username".into(), "ada".into()),
            ("password".into(), "pw".into()),
        ]));
        let mut args = bind(&plan, &request).await.unwrap();
        let login = args.take::<Login>("form").unwrap();
        assert_eq!(login.username, "ada");
        assert_eq!(login.password, "pw");
    }

    #[tokio::test]
    async fn test_form_pattern_applies_to_text_fields() {
        let plan = plan(
            "/login",
            vec![(
                "form",
                Param::form::<Login>(FormSpec::url_encoded().pattern("^[a-z]+$")),
            )],
        );
        let request = IncomingRequest::new(Method::POST, "/login").body(Body::Form(vec![
            ("username".into(), "ada".into()),
            ("password".into(), "P4ss".into()),
        ]));
        let err = bind(&plan, &request).await.unwrap_err();
        assert_eq!(err.errors[0].loc, vec!["body", "password"]);
        assert_eq!(err.errors[0].kind, "value_error.str.regex");
    }

    #[tokio::test]
    async fn test_form_size_bounds() {
        let plan = plan(
            "/login",
            vec![("form", Param::form::<Login>(FormSpec::url_encoded().max_length(4)))],
        );
        let request = IncomingRequest::new(Method::POST, "/login").body(Body::Form(vec![
            ("username".into(), "ada".into()),
            ("password".into(), "secret".into()),
        ]));
        let err = bind(&plan, &request).await.unwrap_err();
        assert_eq!(err.errors[0].kind, "value_error.form_size");
    }

    #[tokio::test]
    async fn test_multipart_rebuilds_arrays_and_files() {
        let plan = plan(
            "/pets",
            vec![("form", Param::form::<PetUpload>(FormSpec::multipart()))],
        );
        let request = IncomingRequest::new(Method::POST, "/pets").body(Body::Multipart(vec![
            FormPart::text("name", "Rex"),
            FormPart::text("tags", "good"),
            FormPart::text("tags", "boy"),
            FormPart::text("vaccines", r#"{"name":"rabies","year":2020}"#),
            FormPart::text("vaccines", r#"{"name":"parvo","year":2021}"#),
            FormPart::file("photo", "rex.png", "image/png", Bytes::from_static(b"\x89PNG")),
        ]));
        let mut args = bind(&plan, &request).await.unwrap();
        let pet = args.take::<PetUpload>("form").unwrap();
        assert_eq!(pet.name, "Rex");
        assert_eq!(pet.tags, Some(vec!["good".to_string(), "boy".to_string()]));
        assert_eq!(pet.vaccines.len(), 2);
        assert_eq!(pet.vaccines[1].name, "parvo");
        let photo = pet.photo.unwrap();
        assert_eq!(photo.filename.as_deref(), Some("rex.png"));
        assert_eq!(photo.data, b"\x89PNG");
    }

    #[tokio::test]
    async fn test_multipart_missing_required_field() {
        let plan = plan(
            "/pets",
            vec![("form", Param::form::<PetUpload>(FormSpec::multipart()))],
        );
        let request = IncomingRequest::new(Method::POST, "/pets")
            .body(Body::Multipart(vec![FormPart::text("name", "Rex")]));
        let err = bind(&plan, &request).await.unwrap_err();
        assert_eq!(err.errors, vec![FieldError::missing(["body", "vaccines"])]);
    }

    #[tokio::test]
    async fn test_file_checks_mime_and_length() {
        let plan = plan(
            "/avatar",
            vec![("image", Param::file(FileSpec::new("image/png").max_length(4)))],
        );

        let wrong_type = IncomingRequest::new(Method::POST, "/avatar").body(Body::Raw {
            content_type: "image/jpeg".into(),
            data: Bytes::from_static(b"abc"),
        });
        let err = bind(&plan, &wrong_type).await.unwrap_err();
        assert_eq!(err.errors[0].msg, "Invalid file type received.");

        let too_big = IncomingRequest::new(Method::POST, "/avatar").body(Body::Raw {
            content_type: "image/png".into(),
            data: Bytes::from_static(b"abcdef"),
        });
        let err = bind(&plan, &too_big).await.unwrap_err();
        assert_eq!(err.errors[0].msg, "Invalid file size received.");

        let ok = IncomingRequest::new(Method::POST, "/avatar").body(Body::Raw {
            content_type: "image/png".into(),
            data: Bytes::from_static(b"abc"),
        });
        let mut args = bind(&plan, &ok).await.unwrap();
        assert_eq!(args.take::<UploadFile>("image").unwrap().data, b"abc");
    }
}
