//! Route declarations and their compiled, registry-ready form.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::Method;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::analyzer::{self, PathPattern, ValidationPlan, analyze, hoist, merge_component};
use crate::dispatch::{IntoReply, Reply};
use crate::error::{Error, RegistrationError};
use crate::extract::Arguments;
use crate::openapi::{Operation, Response, validation_error_schema};
use crate::params::Param;
use crate::schema::{Classification, TypeSpec, component_ref, split_root};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub(crate) type HandlerFn = Arc<dyn Fn(Arguments) -> BoxFuture<Result<Reply, Error>> + Send + Sync>;

/// A handler paired with its binding table and documentation metadata.
///
/// ```rust,ignore
/// Route::get("/pets/<int:pet_id>", get_pet)
///     .param("pet_id", Param::of::<i64>())
///     .param("user", Param::depends(current_user()))
///     .response::<Pet>(200, "The pet")
///     .tags(["pets"]);
/// ```
pub struct Route {
    method: Method,
    path: String,
    name: String,
    handler: HandlerFn,
    params: Vec<(String, Param)>,
    description: String,
    tags: Vec<String>,
    auth_required: bool,
    responses: BTreeMap<u16, DeclaredResponse>,
}

#[derive(Clone)]
struct DeclaredResponse {
    description: String,
    model: Option<TypeSpec>,
}

impl Route {
    pub fn new<F, Fut, R>(method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: IntoReply + 'static,
    {
        let path = path.into();
        let name = function_name::<F>().unwrap_or_else(|| fallback_name(&method, &path));
        let handler: HandlerFn = Arc::new(move |args| {
            let fut = handler(args);
            Box::pin(async move { fut.await.and_then(IntoReply::into_reply) })
        });
        Self {
            method,
            path,
            name,
            handler,
            params: Vec::new(),
            description: String::new(),
            tags: Vec::new(),
            auth_required: false,
            responses: BTreeMap::new(),
        }
    }

    pub fn get<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: IntoReply + 'static,
    {
        Self::new(Method::GET, path, handler)
    }

    pub fn post<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: IntoReply + 'static,
    {
        Self::new(Method::POST, path, handler)
    }

    pub fn put<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: IntoReply + 'static,
    {
        Self::new(Method::PUT, path, handler)
    }

    pub fn patch<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: IntoReply + 'static,
    {
        Self::new(Method::PATCH, path, handler)
    }

    pub fn delete<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: IntoReply + 'static,
    {
        Self::new(Method::DELETE, path, handler)
    }

    /// Declares one entry of the binding table, in handler order.
    pub fn param(mut self, name: impl Into<String>, param: Param) -> Self {
        self.params.push((name.into(), param));
        self
    }

    /// Overrides the handler name used for the operation id and summary.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Marks the operation as requiring the API's auth scheme in the document.
    pub fn auth_required(mut self) -> Self {
        self.auth_required = true;
        self
    }

    /// Declares the reply type for `status`. Replies with this status are
    /// checked against it before being sent.
    pub fn response<T>(mut self, status: u16, description: impl Into<String>) -> Self
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
    {
        self.responses.insert(
            status,
            DeclaredResponse {
                description: description.into(),
                model: Some(TypeSpec::of::<T>()),
            },
        );
        self
    }

    /// Documents an additional status code.
    pub fn responses(mut self, status: u16, description: impl Into<String>) -> Self {
        self.responses.insert(
            status,
            DeclaredResponse {
                description: description.into(),
                model: None,
            },
        );
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler_name(&self) -> &str {
        &self.name
    }

    /// Analyzes the binding table and builds the operation's documentation.
    pub(crate) fn compile(self) -> Result<RouteEntry, RegistrationError> {
        let pattern = PathPattern::parse(&self.path)?;
        let analysis = analyze(&pattern, &self.name, &self.params)?;
        let mut components = analysis.components;

        let shared_model = self.responses.values().find_map(|r| r.model.clone());
        let shared_schema = shared_model
            .as_ref()
            .map(|spec| response_schema(&mut components, spec))
            .transpose()?;

        let mut responses = BTreeMap::new();
        let mut response_models = BTreeMap::new();
        for (status, declared) in self.responses {
            let schema = match &declared.model {
                Some(spec) => {
                    response_models.insert(status, spec.clone());
                    Some(response_schema(&mut components, spec)?)
                }
                None => shared_schema.clone(),
            };
            let response = match schema {
                Some(schema) => Response::json(declared.description, schema),
                None => Response::described(declared.description),
            };
            responses.insert(status.to_string(), response);
        }
        if responses.is_empty() {
            responses.insert("200".to_string(), Response::described("Successful Response"));
        }
        if analysis.plan.reads_request() {
            merge_component(
                &mut components,
                "HTTPValidationError".to_string(),
                validation_error_schema(),
            )?;
            responses.entry("422".to_string()).or_insert_with(|| {
                Response::json(
                    "Validation Error",
                    json!({ "$ref": component_ref("HTTPValidationError") }),
                )
            });
        }

        let openapi_path = pattern.openapi_path();
        let operation = Operation {
            operation_id: analyzer::operation_id(&self.name, &openapi_path, &self.method),
            summary: analyzer::summary(&self.name),
            description: self.description,
            tags: self.tags,
            parameters: analysis.parameters,
            request_body: analysis.request_body,
            responses,
            security: None,
        };

        tracing::debug!(
            method = %self.method,
            path = %openapi_path,
            handler = %self.name,
            "route compiled"
        );

        Ok(RouteEntry {
            method: self.method,
            pattern,
            name: self.name,
            handler: self.handler,
            plan: analysis.plan,
            response_models,
            operation,
            components,
            auth_required: self.auth_required,
        })
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Documented schema of a declared reply type; definitions go to `components`.
fn response_schema(
    components: &mut BTreeMap<String, Value>,
    spec: &TypeSpec,
) -> Result<Value, RegistrationError> {
    if spec.classify() == Classification::Structural {
        let title = spec.title();
        hoist(components, &title, spec.schema(), true)?;
        return Ok(json!({ "$ref": component_ref(&title) }));
    }
    hoist(components, "", spec.schema(), false)?;
    Ok(split_root(spec.schema()).0)
}

/// `my_app::handlers::create_pet` -> `create_pet`; closures have no usable name.
fn function_name<F>() -> Option<String> {
    let full = std::any::type_name::<F>();
    let last = full.rsplit("::").next()?;
    let valid = !last.is_empty() && last.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| last.to_string())
}

fn fallback_name(method: &Method, path: &str) -> String {
    let mut name = method.as_str().to_ascii_lowercase();
    for part in path.split('/').filter(|s| !s.is_empty()) {
        let part: String = part
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
            .collect();
        let part = part.rsplit(':').next().unwrap_or_default();
        if !part.is_empty() {
            name.push('_');
            name.push_str(part);
        }
    }
    name
}

/// A registered route: everything dispatch and document assembly need.
#[derive(Clone)]
pub(crate) struct RouteEntry {
    pub(crate) method: Method,
    pub(crate) pattern: PathPattern,
    pub(crate) name: String,
    pub(crate) handler: HandlerFn,
    pub(crate) plan: ValidationPlan,
    pub(crate) response_models: BTreeMap<u16, TypeSpec>,
    pub(crate) operation: Operation,
    pub(crate) components: BTreeMap<String, Value>,
    pub(crate) auth_required: bool,
}

impl RouteEntry {
    /// Lowercase method, as used in the document.
    pub(crate) fn method_key(&self) -> String {
        self.method.as_str().to_ascii_lowercase()
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("path", &self.pattern.openapi_path())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
