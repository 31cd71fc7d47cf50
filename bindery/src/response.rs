//! Conversion of dispatch results into `http` responses.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::Full;
use serde_json::Value;

use crate::error::Error;

pub type BoxBody = Full<Bytes>;

pub trait IntoResponse {
    fn into_response(self) -> Response<BoxBody>;
}

impl IntoResponse for Response<BoxBody> {
    fn into_response(self) -> Response<BoxBody> {
        self
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response<BoxBody> {
        let mut body = serde_json::Map::new();
        body.insert(
            "detail".into(),
            self.canonical_reason().unwrap_or("Unknown").into(),
        );
        json_response(self, &Value::Object(body))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response<BoxBody> {
        json_response(self.status_code(), &self.to_body())
    }
}

/// A JSON response with the given status.
pub fn json_response(status: StatusCode, body: &Value) -> Response<BoxBody> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    with_content_type(status, "application/json", Bytes::from(bytes))
}

pub fn html_response(html: String) -> Response<BoxBody> {
    with_content_type(StatusCode::OK, "text/html; charset=utf-8", Bytes::from(html))
}

fn with_content_type(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<BoxBody> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response<BoxBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_code_into_response() {
        let response = StatusCode::NOT_FOUND.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_json(response).await["detail"], "Not Found");
    }

    #[tokio::test]
    async fn test_internal_error_body_is_generic() {
        let response = Error::internal("db password leaked here").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["detail"],
            crate::error::INTERNAL_ERROR_DETAIL
        );
    }
}
