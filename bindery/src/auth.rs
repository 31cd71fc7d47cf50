//! Auth scheme descriptors and credential extraction.
//!
//! Token issuance is the application's business; this module only describes
//! the scheme for the document and pulls the raw credential out of a request.

use std::collections::BTreeMap;

use http::HeaderMap;

use crate::openapi::{OAuthFlow, SecurityScheme};

/// Process-wide description of how clients authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthScheme {
    /// Name the scheme is registered under in the document.
    pub scheme: String,
    /// OpenAPI scheme type (`oauth2`, `apiKey`, `http`).
    pub kind: String,
    /// OAuth2 flow name, e.g. `password`.
    pub flow: Option<String>,
    pub scopes: BTreeMap<String, String>,
    pub token_url: Option<String>,
    /// Header the credential is read from.
    pub header: String,
    /// Prefix that must precede the credential, stripped on extraction.
    pub token_prefix: Option<String>,
}

impl AuthScheme {
    /// OAuth2 password flow with a bearer token in the `Authorization` header.
    pub fn oauth2_password_bearer(token_url: impl Into<String>) -> Self {
        Self {
            scheme: "OAuth2PasswordBearer".to_string(),
            kind: "oauth2".to_string(),
            flow: Some("password".to_string()),
            scopes: BTreeMap::new(),
            token_url: Some(token_url.into()),
            header: "Authorization".to_string(),
            token_prefix: Some("Bearer ".to_string()),
        }
    }

    /// API key sent verbatim in a header.
    pub fn api_key(scheme: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            kind: "apiKey".to_string(),
            flow: None,
            scopes: BTreeMap::new(),
            token_url: None,
            header: header.into(),
            token_prefix: None,
        }
    }

    pub fn scope(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.scopes.insert(name.into(), description.into());
        self
    }

    /// The credential, with the prefix stripped, or `None` when absent or malformed.
    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        let raw = headers.get(self.header.as_str())?.to_str().ok()?;
        let token = match &self.token_prefix {
            Some(prefix) => strip_prefix_ignore_case(raw, prefix)?,
            None => raw,
        };
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    /// Document entry for `components.securitySchemes`.
    pub fn to_security_scheme(&self) -> SecurityScheme {
        let flows = self.flow.as_ref().map(|flow| {
            BTreeMap::from([(
                flow.clone(),
                OAuthFlow {
                    token_url: self.token_url.clone(),
                    scopes: self.scopes.clone(),
                },
            )])
        });
        let (name, location) = if self.kind == "apiKey" {
            (Some(self.header.clone()), Some("header".to_string()))
        } else {
            (None, None)
        };
        SecurityScheme {
            kind: self.kind.clone(),
            flows,
            name,
            location,
        }
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_static(value));
        map
    }

    #[test]
    fn test_bearer_extract_strips_prefix() {
        let scheme = AuthScheme::oauth2_password_bearer("/login");
        assert_eq!(
            scheme.extract(&headers("authorization", "Bearer abc.def")),
            Some("abc.def".to_string())
        );
        assert_eq!(
            scheme.extract(&headers("authorization", "bearer abc")),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_bearer_extract_rejects_missing_prefix() {
        let scheme = AuthScheme::oauth2_password_bearer("/login");
        assert_eq!(scheme.extract(&headers("authorization", "Basic abc")), None);
        assert_eq!(scheme.extract(&headers("authorization", "Bearer ")), None);
        assert_eq!(scheme.extract(&HeaderMap::new()), None);
    }

    #[test]
    fn test_api_key_has_no_prefix() {
        let scheme = AuthScheme::api_key("ApiKeyAuth", "x-api-key");
        assert_eq!(
            scheme.extract(&headers("x-api-key", "k-123")),
            Some("k-123".to_string())
        );
        let doc = scheme.to_security_scheme();
        assert_eq!(doc.kind, "apiKey");
        assert_eq!(doc.name.as_deref(), Some("x-api-key"));
        assert_eq!(doc.location.as_deref(), Some("header"));
    }

    #[test]
    fn test_oauth2_security_scheme_document() {
        let scheme = AuthScheme::oauth2_password_bearer("/login").scope("pets:write", "Edit pets");
        let doc = serde_json::to_value(scheme.to_security_scheme()).unwrap();
        assert_eq!(doc["type"], "oauth2");
        assert_eq!(doc["flows"]["password"]["tokenUrl"], "/login");
        assert_eq!(doc["flows"]["password"]["scopes"]["pets:write"], "Edit pets");
    }
}
