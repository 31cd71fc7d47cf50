use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use crate::config::BodyLimits;
use crate::dispatch::{Outcome, dispatch};
use crate::extract::{IncomingRequest, PathParams};
use crate::openapi::{self, OpenApiSpec};
use crate::response::{BoxBody, IntoResponse, json_response};
use crate::route::RouteEntry;

pub const OPENAPI_JSON_PATH: &str = "/docs/openapi.json";
pub const SWAGGER_UI_PATH: &str = "/docs";
pub const REDOC_PATH: &str = "/redoc";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Matches requests against the registered routes and serves the documentation endpoints.
///
/// Built once by [`crate::Api::into_router`]; read-only afterwards and shared
/// across connections.
pub struct Router {
    title: String,
    limits: BodyLimits,
    routes: Vec<Arc<RouteEntry>>,
    document: Arc<OpenApiSpec>,
}

enum Matched<'a> {
    Route(&'a RouteEntry, PathParams),
    MethodNotAllowed,
    NotFound,
}

impl Router {
    pub(crate) fn new(
        title: String,
        limits: BodyLimits,
        routes: Vec<Arc<RouteEntry>>,
        document: Arc<OpenApiSpec>,
    ) -> Self {
        Self {
            title,
            limits,
            routes,
            document,
        }
    }

    pub fn limits(&self) -> &BodyLimits {
        &self.limits
    }

    pub fn document(&self) -> &OpenApiSpec {
        &self.document
    }

    fn find(&self, method: &Method, path: &str) -> Matched<'_> {
        let mut path_matched = false;
        for entry in &self.routes {
            if let Some(params) = entry.pattern.matches(path) {
                if entry.method == *method {
                    return Matched::Route(entry, params);
                }
                path_matched = true;
            }
        }
        if path_matched {
            Matched::MethodNotAllowed
        } else {
            Matched::NotFound
        }
    }

    /// Handles a request whose body has already been collected.
    ///
    /// Every response carries a fresh `x-request-id`, also recorded on the
    /// request's tracing span.
    pub async fn handle(&self, req: Request<Bytes>) -> Response<BoxBody> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id
        );
        let mut response = self.respond(req).instrument(span).await;
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    async fn respond(&self, req: Request<Bytes>) -> Response<BoxBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        if method == Method::GET {
            match path.as_str() {
                OPENAPI_JSON_PATH => return openapi::openapi_json(&self.document),
                SWAGGER_UI_PATH => return openapi::swagger_ui(&self.title, OPENAPI_JSON_PATH),
                REDOC_PATH => return openapi::redoc(&self.title, OPENAPI_JSON_PATH),
                _ => {}
            }
        }

        let (entry, params) = match self.find(&method, &path) {
            Matched::Route(entry, params) => (entry, params),
            Matched::MethodNotAllowed => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
            Matched::NotFound => {
                debug!(%method, %path, "no route matched");
                return StatusCode::NOT_FOUND.into_response();
            }
        };

        if req.body().len() > self.limits.max_body_size {
            debug!(size = req.body().len(), max = self.limits.max_body_size, "request body too large");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
        let request = match IncomingRequest::from_http(req, params, &self.limits.multipart) {
            Ok(request) => request,
            Err(err) => return err.into_response(),
        };
        let outcome = dispatch(entry, &request).await;
        json_response(outcome.status, &outcome.body)
    }

    /// Dispatches an already-built request, bypassing HTTP parsing.
    pub async fn call(&self, mut request: IncomingRequest) -> Outcome {
        match self.find(&request.method, &request.path) {
            Matched::Route(entry, params) => {
                request.path_params.extend(params);
                dispatch(entry, &request).await
            }
            Matched::MethodNotAllowed => crate::error::Error::from_status(405).into(),
            Matched::NotFound => crate::error::Error::from_status(404).into(),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("title", &self.title)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}
