//! Responses for the documentation endpoints.

use http::{Response, StatusCode};

use super::OpenApiSpec;
use super::ui::{redoc_page, swagger_page};
use crate::response::{BoxBody, html_response, json_response};

/// The composed document as JSON.
pub fn openapi_json(spec: &OpenApiSpec) -> Response<BoxBody> {
    match serde_json::to_value(spec) {
        Ok(doc) => json_response(StatusCode::OK, &doc),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize API document");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({ "detail": crate::error::INTERNAL_ERROR_DETAIL }),
            )
        }
    }
}

/// Swagger UI reading the document from `spec_url`.
pub fn swagger_ui(title: &str, spec_url: &str) -> Response<BoxBody> {
    html_response(swagger_page(title, spec_url))
}

/// ReDoc reading the document from `spec_url`.
pub fn redoc(title: &str, spec_url: &str) -> Response<BoxBody> {
    html_response(redoc_page(title, spec_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::{Components, Info};
    use http::header::CONTENT_TYPE;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;

    fn spec() -> OpenApiSpec {
        OpenApiSpec {
            openapi: "3.0.3".into(),
            info: Info {
                title: "Pets".into(),
                version: "1.0".into(),
            },
            paths: BTreeMap::new(),
            components: Components::default(),
        }
    }

    async fn text(response: Response<BoxBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_openapi_json_returns_document() {
        let response = openapi_json(&spec());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let doc: serde_json::Value = serde_json::from_str(&text(response).await).unwrap();
        assert_eq!(doc["openapi"], "3.0.3");
        assert_eq!(doc["info"]["title"], "Pets");
        assert!(doc.get("paths").is_some());
        assert!(doc["components"].get("schemas").is_some());
    }

    #[tokio::test]
    async fn test_viewers_point_at_document_url() {
        let swagger = text(swagger_ui("Pets", "/docs/openapi.json")).await;
        assert!(swagger.contains(r#"url: "/docs/openapi.json""#));
        assert!(swagger.contains("<title>Pets</title>"));

        let response = redoc("Pets", "/docs/openapi.json");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert!(text(response).await.contains(r#"spec-url="/docs/openapi.json""#));
    }
}
