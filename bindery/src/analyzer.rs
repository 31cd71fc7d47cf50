//! Registration-time analysis of a route's binding table.
//!
//! [`analyze`] turns the declared parameters and the path pattern into the
//! documentation fragment for the operation and the [`ValidationPlan`] the
//! binder follows at request time. Form schemas are decomposed once, and both
//! the documented properties and the plan's field kinds come from that single
//! decomposition.

use std::collections::{BTreeMap, HashSet};

use heck::ToTitleCase;
use http::Method;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::auth::AuthScheme;
use crate::dependency::{Dependency, Security};
use crate::error::RegistrationError;
use crate::extract::PathParams;
use crate::openapi::{MediaTypeObject, Parameter, ParameterLocation, RequestBody};
use crate::params::{FileSpec, FormSpec, MediaType, Param};
use crate::schema::{
    Classification, DataType, TypeSpec, component_ref, definitions, normalized, ref_name,
    schema_type, split_root, unwrap_nullable,
};

/// A route path pattern.
///
/// Placeholders may be spelled `:name`, `{name}`, `<name>` or
/// `<converter:name>`; the document always uses `{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RegistrationError> {
        let invalid = |reason: &str| RegistrationError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };
        if !raw.starts_with('/') {
            return Err(invalid("must start with `/`"));
        }

        let mut segments = Vec::new();
        let mut names = HashSet::new();
        for part in raw.split('/').filter(|s| !s.is_empty()) {
            let placeholder = if let Some(name) = part.strip_prefix(':') {
                Some(name)
            } else if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner)
            } else if let Some(inner) = part.strip_prefix('<').and_then(|p| p.strip_suffix('>')) {
                Some(inner.rsplit_once(':').map_or(inner, |(_, name)| name))
            } else {
                None
            };

            match placeholder {
                Some(name) => {
                    if name.is_empty()
                        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        return Err(invalid("placeholder names must be identifiers"));
                    }
                    if !names.insert(name.to_string()) {
                        return Err(invalid("placeholder names must be unique"));
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => {
                    if part.contains(['{', '}', '<', '>']) {
                        return Err(invalid("unbalanced placeholder"));
                    }
                    segments.push(Segment::Static(part.to_string()));
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Static(_) => None,
        })
    }

    pub fn has_placeholder(&self, name: &str) -> bool {
        self.placeholders().any(|p| p == name)
    }

    /// The pattern in document syntax, e.g. `/pets/{pet_id}`.
    pub fn openapi_path(&self) -> String {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Static(text) => text.clone(),
                Segment::Param(name) => format!("{{{name}}}"),
            })
            .collect();
        format!("/{}", parts.join("/"))
    }

    /// Matches a concrete request path, capturing placeholder values.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = PathParams::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Static(text) if text == part => {}
                Segment::Static(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

/// How one multipart/url-encoded field is reconstructed from the flat submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(DataType),
    ScalarArray(DataType),
    /// JSON-encoded object of the named definition.
    Object(String),
    ObjectArray(String),
    File,
    FileArray,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Request-time instructions for one form binding.
#[derive(Debug, Clone)]
pub(crate) struct FormPlan {
    pub(crate) spec: TypeSpec,
    pub(crate) media_type: MediaType,
    pub(crate) min_length: Option<usize>,
    pub(crate) max_length: Option<usize>,
    pub(crate) pattern: Option<Regex>,
    pub(crate) fields: Vec<FormField>,
}

#[derive(Debug, Clone)]
pub(crate) enum BindingKind {
    Path {
        spec: TypeSpec,
        data_type: DataType,
    },
    Query {
        spec: TypeSpec,
        data_type: DataType,
        default: Option<Value>,
        nullable: bool,
    },
    Json {
        spec: TypeSpec,
    },
    Form(FormPlan),
    File(FileSpec),
    Dependency(Dependency),
    Security(Security),
}

#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub(crate) name: String,
    pub(crate) kind: BindingKind,
}

/// Ordered binding instructions for one route, built once at registration.
#[derive(Debug, Clone, Default)]
pub struct ValidationPlan {
    pub(crate) bindings: Vec<Binding>,
}

impl ValidationPlan {
    /// Field kinds of the form binding, if the route has one.
    pub fn form_fields(&self) -> Option<&[FormField]> {
        self.bindings.iter().find_map(|b| match &b.kind {
            BindingKind::Form(plan) => Some(plan.fields.as_slice()),
            _ => None,
        })
    }

    /// Whether any binding reads from the request itself (not only dependencies).
    pub fn reads_request(&self) -> bool {
        self.bindings.iter().any(|b| {
            !matches!(
                b.kind,
                BindingKind::Dependency(_) | BindingKind::Security(_)
            )
        })
    }

    /// Auth schemes this route extracts credentials with, directly or through a dependency.
    pub fn auth_schemes(&self) -> Vec<&AuthScheme> {
        self.bindings
            .iter()
            .flat_map(|b| match &b.kind {
                BindingKind::Security(sec) => vec![sec.scheme()],
                BindingKind::Dependency(dep) => dep.auth_schemes(),
                _ => Vec::new(),
            })
            .collect()
    }
}

/// Output of [`analyze`].
#[derive(Debug, Clone)]
pub(crate) struct Analysis {
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) request_body: Option<RequestBody>,
    pub(crate) components: BTreeMap<String, Value>,
    pub(crate) plan: ValidationPlan,
}

/// Classifies every declared parameter of `handler` against `pattern`.
pub(crate) fn analyze(
    pattern: &PathPattern,
    handler: &str,
    params: &[(String, Param)],
) -> Result<Analysis, RegistrationError> {
    let mut seen = HashSet::new();
    let mut body_claimed = false;
    let mut parameters = Vec::new();
    let mut content = BTreeMap::new();
    let mut components = BTreeMap::new();
    let mut bindings = Vec::new();

    let mut claim_body = |param: &str| {
        if body_claimed {
            Err(RegistrationError::DuplicateBody {
                handler: handler.to_string(),
                param: param.to_string(),
            })
        } else {
            body_claimed = true;
            Ok(())
        }
    };

    for (name, param) in params {
        if !seen.insert(name.as_str()) {
            return Err(RegistrationError::DuplicateParameter {
                handler: handler.to_string(),
                param: name.clone(),
            });
        }
        let unsupported = |spec: &TypeSpec| RegistrationError::UnsupportedType {
            handler: handler.to_string(),
            param: name.clone(),
            type_name: spec.type_name().to_string(),
        };

        let kind = match param {
            Param::Typed { spec, default } => match spec.classify() {
                Classification::Scalar {
                    data_type,
                    nullable,
                } => {
                    let schema = parameter_schema(name, spec.schema(), default.as_ref());
                    if pattern.has_placeholder(name) {
                        if default.is_some() {
                            return Err(RegistrationError::DefaultOnPathParameter {
                                handler: handler.to_string(),
                                param: name.clone(),
                            });
                        }
                        parameters.push(Parameter {
                            name: name.clone(),
                            location: ParameterLocation::Path,
                            required: true,
                            schema,
                        });
                        BindingKind::Path {
                            spec: spec.clone(),
                            data_type,
                        }
                    } else {
                        parameters.push(Parameter {
                            name: name.clone(),
                            location: ParameterLocation::Query,
                            required: default.is_none() && !nullable,
                            schema,
                        });
                        BindingKind::Query {
                            spec: spec.clone(),
                            data_type,
                            default: default.clone(),
                            nullable,
                        }
                    }
                }
                Classification::Structural => {
                    claim_body(name)?;
                    let title = spec.title();
                    hoist(&mut components, &title, spec.schema(), true)?;
                    content.insert(
                        "application/json".to_string(),
                        MediaTypeObject {
                            schema: json!({ "$ref": component_ref(&title) }),
                        },
                    );
                    BindingKind::Json { spec: spec.clone() }
                }
                Classification::Unsupported => return Err(unsupported(spec)),
            },
            Param::Form { spec, form } => {
                if spec.classify() != Classification::Structural {
                    return Err(unsupported(spec));
                }
                claim_body(name)?;
                let plan = form_plan(handler, name, spec, form)?;
                let title = spec.title();
                let schema = match form.media_type {
                    MediaType::UrlEncoded => {
                        hoist(&mut components, &title, spec.schema(), true)?;
                        json!({ "$ref": component_ref(&title) })
                    }
                    MediaType::Multipart => {
                        hoist(&mut components, &title, spec.schema(), false)?;
                        decompose(spec.schema())
                            .map(|d| d.schema)
                            .map_err(|field| unreducible(handler, name, field))?
                    }
                };
                content.insert(form.media_type.as_str().to_string(), MediaTypeObject { schema });
                BindingKind::Form(plan)
            }
            Param::File(file) => {
                claim_body(name)?;
                content.insert(
                    file.mime_type.clone(),
                    MediaTypeObject {
                        schema: DataType::BinaryString.schema(),
                    },
                );
                BindingKind::File(file.clone())
            }
            Param::Depends(dep) => BindingKind::Dependency(dep.clone()),
            Param::Security(sec) => BindingKind::Security(sec.clone()),
        };
        bindings.push(Binding {
            name: name.clone(),
            kind,
        });
    }

    for placeholder in pattern.placeholders() {
        let bound = bindings
            .iter()
            .any(|b| b.name == placeholder && matches!(b.kind, BindingKind::Path { .. }));
        if !bound {
            return Err(RegistrationError::UnresolvedPlaceholder {
                handler: handler.to_string(),
                placeholder: placeholder.to_string(),
            });
        }
    }

    let request_body = (!content.is_empty()).then(|| RequestBody {
        content,
        required: true,
    });

    Ok(Analysis {
        parameters,
        request_body,
        components,
        plan: ValidationPlan { bindings },
    })
}

fn unreducible(handler: &str, param: &str, field: String) -> RegistrationError {
    RegistrationError::UnreducibleField {
        handler: handler.to_string(),
        param: param.to_string(),
        field,
    }
}

fn form_plan(
    handler: &str,
    name: &str,
    spec: &TypeSpec,
    form: &FormSpec,
) -> Result<FormPlan, RegistrationError> {
    let decomposition =
        decompose(spec.schema()).map_err(|field| unreducible(handler, name, field))?;
    if form.media_type == MediaType::UrlEncoded {
        if let Some(file_field) = decomposition
            .fields
            .iter()
            .find(|f| matches!(f.kind, FieldKind::File | FieldKind::FileArray))
        {
            return Err(unreducible(handler, name, file_field.name.clone()));
        }
    }
    let pattern = form
        .pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|_| RegistrationError::InvalidPattern {
            handler: handler.to_string(),
            pattern: form.pattern.clone().unwrap_or_default(),
        })?;

    Ok(FormPlan {
        spec: spec.clone(),
        media_type: form.media_type,
        min_length: form.min_length,
        max_length: form.max_length,
        pattern,
        fields: decomposition.fields,
    })
}

/// Registers a root schema's nested definitions, and the root itself when
/// `with_root` is set.
pub(crate) fn hoist(
    components: &mut BTreeMap<String, Value>,
    title: &str,
    root: &Value,
    with_root: bool,
) -> Result<(), RegistrationError> {
    let (body, defs) = split_root(root);
    for (name, def) in defs {
        merge_component(components, name, def)?;
    }
    if with_root {
        merge_component(components, title.to_string(), body)?;
    }
    Ok(())
}

/// Adds a named schema, rejecting a different schema under the same name.
pub(crate) fn merge_component(
    components: &mut BTreeMap<String, Value>,
    name: String,
    schema: Value,
) -> Result<(), RegistrationError> {
    match components.get(&name) {
        Some(existing) if *existing != schema => {
            tracing::error!(schema = %name, "conflicting schema definitions");
            Err(RegistrationError::SchemaCollision { name })
        }
        Some(_) => Ok(()),
        None => {
            components.insert(name, schema);
            Ok(())
        }
    }
}

/// Documentation schema of a path or query parameter.
fn parameter_schema(name: &str, root: &Value, default: Option<&Value>) -> Value {
    let (node, _) = unwrap_nullable(root);
    let mut schema = normalized(node);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.insert("title".into(), Value::String(name.to_title_case()));
        if let Some(default) = default {
            obj.insert("default".into(), default.clone());
        }
    }
    schema
}

/// A form schema flattened into submit-able fields.
#[derive(Debug, Clone)]
pub(crate) struct Decomposition {
    pub(crate) fields: Vec<FormField>,
    pub(crate) schema: Value,
}

/// Decomposes a structural root schema field by field. On failure, returns
/// the name of the first field that cannot be submitted as a form field.
pub(crate) fn decompose(root: &Value) -> Result<Decomposition, String> {
    let properties = root
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(String::new)?;
    let required: Vec<String> = root
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut fields = Vec::new();
    let mut documented = Map::new();
    for (name, property) in properties {
        let (kind, doc) = field_kind(property, root).ok_or_else(|| name.clone())?;
        documented.insert(name.clone(), doc);
        fields.push(FormField {
            name: name.clone(),
            kind,
            required: required.contains(name),
        });
    }

    let mut schema = Map::new();
    schema.insert("type".into(), "object".into());
    schema.insert("properties".into(), Value::Object(documented));
    if !required.is_empty() {
        schema.insert("required".into(), json!(required));
    }
    Ok(Decomposition {
        fields,
        schema: Value::Object(schema),
    })
}

fn field_kind(property: &Value, root: &Value) -> Option<(FieldKind, Value)> {
    let (node, _) = unwrap_nullable(property);

    if let Some(name) = ref_name(node) {
        let def = definitions(root)?.get(name)?;
        if is_object(def) {
            return Some((
                FieldKind::Object(name.to_string()),
                json!({ "$ref": component_ref(name) }),
            ));
        }
        // Non-object definitions (enums, binary strings) stand in for their inline form.
        return field_kind(def, root);
    }

    match DataType::of_schema(node) {
        DataType::Array => {
            let (item, _) = unwrap_nullable(node.get("items")?);
            let item = match ref_name(item) {
                Some(name) => {
                    let def = definitions(root)?.get(name)?;
                    if is_object(def) {
                        return Some((
                            FieldKind::ObjectArray(name.to_string()),
                            json!({ "type": "array", "items": { "$ref": component_ref(name) } }),
                        ));
                    }
                    def
                }
                None => item,
            };
            match DataType::of_schema(item) {
                DataType::BinaryString => Some((
                    FieldKind::FileArray,
                    json!({ "type": "array", "items": DataType::BinaryString.schema() }),
                )),
                data_type if data_type.is_scalar() => Some((
                    FieldKind::ScalarArray(data_type),
                    json!({ "type": "array", "items": normalized(item) }),
                )),
                _ => None,
            }
        }
        DataType::BinaryString => Some((FieldKind::File, DataType::BinaryString.schema())),
        data_type if data_type.is_scalar() => Some((FieldKind::Scalar(data_type), normalized(node))),
        _ => None,
    }
}

fn is_object(schema: &Value) -> bool {
    schema_type(schema) == Some("object")
}

/// `{handler}_{path}__{method}`, with the path reduced to identifier characters.
pub(crate) fn operation_id(handler: &str, openapi_path: &str, method: &Method) -> String {
    let path: String = openapi_path
        .chars()
        .filter(|c| *c != '/')
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "{handler}_{}__{}",
        path.trim_matches('_'),
        method.as_str().to_ascii_lowercase()
    )
}

/// `create_new_pet` -> `Create New Pet`.
pub(crate) fn summary(handler: &str) -> String {
    handler.to_title_case()
}
