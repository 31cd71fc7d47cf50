//! Per-request dispatch: bind, invoke, normalize, and map failures to outcomes.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::binder;
use crate::error::Error;
use crate::extract::{IncomingRequest, Json};
use crate::route::RouteEntry;

/// A normalized handler result: JSON body plus status.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }
}

/// Conversion of a handler's success value into a [`Reply`].
///
/// A bare value replies with `200`; a `(value, status)` pair uses the status as-is.
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, Error>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(self)
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::ok(self))
    }
}

impl IntoReply for (Value, StatusCode) {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::new(self.1, self.0))
    }
}

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Reply, Error> {
        (self, StatusCode::OK).into_reply()
    }
}

impl<T: Serialize> IntoReply for (Json<T>, StatusCode) {
    fn into_reply(self) -> Result<Reply, Error> {
        let (Json(value), status) = self;
        let body = serde_json::to_value(value)
            .map_err(|e| Error::internal(format!("failed to serialize reply: {e}")))?;
        Ok(Reply::new(status, body))
    }
}

/// Terminal result of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: StatusCode,
    pub body: Value,
}

impl From<Error> for Outcome {
    fn from(err: Error) -> Self {
        Self {
            status: err.status_code(),
            body: err.to_body(),
        }
    }
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Self {
            status: reply.status,
            body: reply.body,
        }
    }
}

/// Runs one request through `entry`.
///
/// Binding failures come back as 422, dependency failures with their own
/// status, handler errors verbatim. Panics and response-shape mismatches
/// are logged and reported as a generic 500.
pub(crate) async fn dispatch(entry: &RouteEntry, request: &IncomingRequest) -> Outcome {
    let run = async {
        let args = binder::bind(&entry.plan, request).await?;
        (entry.handler)(args).await
    };

    let reply = match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => {
            if err.is_internal() {
                error!(handler = %entry.name, path = %request.path, error = %err, "handler failed");
            } else {
                debug!(handler = %entry.name, status = err.status, "request rejected");
            }
            return err.into();
        }
        Err(panic) => {
            error!(
                handler = %entry.name,
                path = %request.path,
                panic = %panic_message(panic.as_ref()),
                "handler panicked"
            );
            return Error::internal("handler panicked").into();
        }
    };

    if let Some(model) = entry.response_models.get(&reply.status.as_u16()) {
        if let Err(errors) = model.check(&reply.body, "response") {
            error!(
                handler = %entry.name,
                status = reply.status.as_u16(),
                ?errors,
                "reply does not match the declared response schema"
            );
            return Error::internal("response validation failed").into();
        }
    }

    reply.into()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Pet {
        name: &'static str,
    }

    #[test]
    fn test_bare_value_defaults_to_ok() {
        let reply = Json(Pet { name: "Rex" }).into_reply().unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, json!({ "name": "Rex" }));
    }

    #[test]
    fn test_pair_keeps_status() {
        let reply = (Json(Pet { name: "Rex" }), StatusCode::CREATED)
            .into_reply()
            .unwrap();
        assert_eq!(reply.status, StatusCode::CREATED);
        let reply = (json!(null), StatusCode::NO_CONTENT).into_reply().unwrap();
        assert_eq!(reply.status, StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_error_outcome_hides_internal_detail() {
        let outcome: Outcome = Error::internal("connection refused").into();
        assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.body, json!({ "detail": crate::error::INTERNAL_ERROR_DETAIL }));

        let outcome: Outcome = Error::not_found("User not found").into();
        assert_eq!(outcome.body, json!({ "detail": "User not found" }));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
