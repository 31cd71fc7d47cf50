//! The route registry and document assembler.
//!
//! One top-level [`Api`] owns every route, keyed by (document path, method).
//! Blueprints are `Api`s built the same way and merged into the top level
//! exactly once with [`Api::extend`]; only the top level can generate a
//! document or serve requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::auth::AuthScheme;
use crate::config::ApiConfig;
use crate::dependency::Security;
use crate::error::{DocumentError, RegistrationError};
use crate::openapi::{Components, Info, OpenApiSpec, PathItem};
use crate::route::{Route, RouteEntry};
use crate::router::Router;

pub struct Api {
    config: ApiConfig,
    blueprint: Option<String>,
    auth_scheme: Option<Arc<AuthScheme>>,
    routes: BTreeMap<(String, String), Arc<RouteEntry>>,
    components: BTreeMap<String, serde_json::Value>,
}

impl Api {
    /// The top-level aggregator.
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            blueprint: None,
            auth_scheme: None,
            routes: BTreeMap::new(),
            components: BTreeMap::new(),
        }
    }

    /// A named sub-group, to be merged into the top level with [`Api::extend`].
    pub fn blueprint(name: impl Into<String>) -> Self {
        Self {
            blueprint: Some(name.into()),
            ..Self::new(ApiConfig::default())
        }
    }

    /// Sets the scheme documented for routes marked `auth_required`.
    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = Some(Arc::new(scheme));
        self
    }

    pub fn auth_scheme(&self) -> Option<&AuthScheme> {
        self.auth_scheme.as_deref()
    }

    /// A credential extractor bound to this API's auth scheme.
    pub fn security(&self) -> Option<Security> {
        self.auth_scheme.clone().map(Security::new)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn is_blueprint(&self) -> bool {
        self.blueprint.is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Analyzes and stores `route`. A route for the same path and method
    /// replaces the earlier one, together with the definitions only it used;
    /// other methods on the path are kept. On error nothing changes.
    pub fn register(&mut self, route: Route) -> Result<&mut Self, RegistrationError> {
        let entry = route.compile()?;
        let key = (entry.pattern.openapi_path(), entry.method_key());
        let handler = entry.name.clone();

        let mut routes = self.routes.clone();
        let replaced = routes.insert(key.clone(), Arc::new(entry)).is_some();
        self.components = collect_components(&routes)?;
        self.routes = routes;

        debug!(path = %key.0, method = %key.1, handler = %handler, "route registered");
        if replaced {
            debug!("replaced an earlier registration for the same path and method");
        }
        Ok(self)
    }

    /// Builder form of [`Api::register`].
    pub fn route(mut self, route: Route) -> Result<Self, RegistrationError> {
        self.register(route)?;
        Ok(self)
    }

    /// Merges a blueprint's routes, definitions and auth scheme.
    /// On a definition collision nothing changes.
    pub fn extend(&mut self, blueprint: Api) -> Result<&mut Self, RegistrationError> {
        let count = blueprint.routes.len();
        let mut routes = self.routes.clone();
        routes.extend(blueprint.routes);
        self.components = collect_components(&routes)?;
        self.routes = routes;

        if self.auth_scheme.is_none() {
            self.auth_scheme = blueprint.auth_scheme;
        }
        info!(
            blueprint = blueprint.blueprint.as_deref().unwrap_or("<top-level>"),
            routes = count,
            "blueprint merged"
        );
        Ok(self)
    }

    /// Assembles the document. Only valid on the top-level aggregator.
    pub fn generate(&self) -> Result<OpenApiSpec, DocumentError> {
        if let Some(name) = &self.blueprint {
            error!(blueprint = %name, "document generation called on a blueprint");
            return Err(DocumentError::NotTopLevel {
                blueprint: name.clone(),
            });
        }

        let mut schemes: BTreeMap<String, AuthScheme> = BTreeMap::new();
        if let Some(scheme) = &self.auth_scheme {
            schemes.insert(scheme.scheme.clone(), scheme.as_ref().clone());
        }

        let mut paths: BTreeMap<String, PathItem> = BTreeMap::new();
        for ((path, method), entry) in &self.routes {
            let mut operation = entry.operation.clone();

            let mut required: Vec<AuthScheme> =
                entry.plan.auth_schemes().into_iter().cloned().collect();
            if entry.auth_required && required.is_empty() {
                let scheme = self.auth_scheme.as_deref().ok_or_else(|| {
                    error!(path = %path, method = %method, "route requires auth but no scheme is configured");
                    DocumentError::MissingAuthScheme {
                        path: path.clone(),
                        method: method.clone(),
                    }
                })?;
                required.push(scheme.clone());
            }
            if !required.is_empty() {
                let requirement: BTreeMap<String, Vec<String>> = required
                    .iter()
                    .map(|scheme| (scheme.scheme.clone(), Vec::new()))
                    .collect();
                operation.security = Some(vec![requirement]);
                for scheme in required {
                    schemes.entry(scheme.scheme.clone()).or_insert(scheme);
                }
            }

            paths
                .entry(path.clone())
                .or_default()
                .insert(method.clone(), operation);
        }

        let security_schemes = (!schemes.is_empty()).then(|| {
            schemes
                .iter()
                .map(|(name, scheme)| (name.clone(), scheme.to_security_scheme()))
                .collect()
        });

        Ok(OpenApiSpec {
            openapi: self.config.openapi_version.clone(),
            info: Info {
                title: self.config.title.clone(),
                version: self.config.version.clone(),
            },
            paths,
            components: Components {
                schemas: self.components.clone(),
                security_schemes,
            },
        })
    }

    /// Finalizes the document and builds the request router.
    pub fn into_router(self) -> Result<Router, DocumentError> {
        let document = self.generate()?;
        info!(
            title = %self.config.title,
            routes = self.routes.len(),
            "API document generated"
        );
        Ok(Router::new(
            self.config.title,
            self.config.limits,
            self.routes.into_values().collect(),
            Arc::new(document),
        ))
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("title", &self.config.title)
            .field("blueprint", &self.blueprint)
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Definitions used by `routes`, failing on a name defined two ways.
fn collect_components(
    routes: &BTreeMap<(String, String), Arc<RouteEntry>>,
) -> Result<BTreeMap<String, serde_json::Value>, RegistrationError> {
    let mut components = BTreeMap::new();
    for entry in routes.values() {
        for (name, schema) in &entry.components {
            crate::analyzer::merge_component(&mut components, name.clone(), schema.clone())?;
        }
    }
    Ok(components)
}
