//! Dependency nodes and their per-request resolution.
//!
//! A [`Dependency`] wraps an async callable plus the dependencies and
//! security nodes *it* needs. Resolution is depth-first, left to right, and
//! runs again for every request. Nothing is memoized: when two siblings share
//! a nested dependency, that dependency runs once per sibling.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::info;

use crate::auth::AuthScheme;
use crate::error::Error;
use crate::extract::{Arguments, IncomingRequest};
use crate::schema::Bound;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type DependencyFn = Arc<dyn Fn(Arguments) -> BoxFuture<'static, Result<Bound, Error>> + Send + Sync>;

/// A value computed before the handler runs.
#[derive(Clone)]
pub struct Dependency {
    name: String,
    params: Vec<(String, DependencyParam)>,
    call: DependencyFn,
}

/// Something a dependency callable itself depends on.
#[derive(Clone)]
pub enum DependencyParam {
    Depends(Dependency),
    Security(Security),
}

impl Dependency {
    /// Wraps `f`, which receives the resolved values of this node's own
    /// parameters and produces the dependency value.
    pub fn new<F, Fut, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        let call: DependencyFn = Arc::new(move |args| {
            let fut = f(args);
            Box::pin(async move { fut.await.map(|v| Box::new(v) as Bound) })
        });
        Self {
            name: name.into(),
            params: Vec::new(),
            call,
        }
    }

    /// Declares a nested dependency, bound under `name` for this node's callable.
    pub fn depends(mut self, name: impl Into<String>, dependency: Dependency) -> Self {
        self.params
            .push((name.into(), DependencyParam::Depends(dependency)));
        self
    }

    /// Declares a credential, bound under `name` as a `String`.
    pub fn security(mut self, name: impl Into<String>, security: Security) -> Self {
        self.params
            .push((name.into(), DependencyParam::Security(security)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether any node in this dependency's tree extracts credentials.
    pub fn requires_credentials(&self) -> bool {
        !self.auth_schemes().is_empty()
    }

    /// Auth schemes used anywhere in this dependency's tree, depth-first.
    pub fn auth_schemes(&self) -> Vec<&AuthScheme> {
        self.params
            .iter()
            .flat_map(|(_, param)| match param {
                DependencyParam::Depends(dep) => dep.auth_schemes(),
                DependencyParam::Security(sec) => vec![sec.scheme()],
            })
            .collect()
    }

    /// Resolves this node's parameters, then runs its callable.
    pub(crate) fn resolve<'a>(
        &'a self,
        request: &'a IncomingRequest,
    ) -> BoxFuture<'a, Result<Bound, Error>> {
        Box::pin(async move {
            let mut args = Arguments::new();
            for (name, param) in &self.params {
                let value = param.resolve(request).await?;
                args.insert(name.clone(), value);
            }
            (self.call)(args).await
        })
    }
}

impl DependencyParam {
    pub(crate) async fn resolve(&self, request: &IncomingRequest) -> Result<Bound, Error> {
        match self {
            DependencyParam::Depends(dep) => dep.resolve(request).await,
            DependencyParam::Security(sec) => sec.extract(request).map(|t| Box::new(t) as Bound),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&String> = self.params.iter().map(|(name, _)| name).collect();
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("params", &params)
            .finish_non_exhaustive()
    }
}

/// Credential extraction bound to an auth scheme.
#[derive(Debug, Clone)]
pub struct Security {
    scheme: Arc<AuthScheme>,
}

impl Security {
    pub fn new(scheme: Arc<AuthScheme>) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> &AuthScheme {
        &self.scheme
    }

    /// The credential from the request, or 401 when it is missing.
    pub fn extract(&self, request: &IncomingRequest) -> Result<String, Error> {
        self.scheme.extract(&request.headers).ok_or_else(|| {
            info!(
                scheme = %self.scheme.scheme,
                path = %request.path,
                "missing or malformed credential"
            );
            Error::from_status(401)
        })
    }
}
