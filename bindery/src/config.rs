//! Document metadata configuration, loaded from the environment.

use std::env;
use std::fmt;

use crate::multipart::MultipartConfig;

pub const DEFAULT_TITLE: &str = "Bindery API Docs";
pub const DEFAULT_VERSION: &str = "0.1.0";
pub const DEFAULT_OPENAPI_VERSION: &str = "3.0.3";
/// Default cap on a collected request body (64MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Loads `.env` from the working directory, if present.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, reason } => {
                write!(f, "invalid value for {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Size limits applied to request payloads before binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLimits {
    pub max_body_size: usize,
    pub multipart: MultipartConfig,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            multipart: MultipartConfig::default(),
        }
    }
}

/// Metadata of the emitted document, plus the payload limits of the served API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub title: String,
    pub version: String,
    pub openapi_version: String,
    pub limits: BodyLimits,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            version: DEFAULT_VERSION.to_string(),
            openapi_version: DEFAULT_OPENAPI_VERSION.to_string(),
            limits: BodyLimits::default(),
        }
    }
}

impl ApiConfig {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, limits: BodyLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Reads `BINDERY_TITLE`, `BINDERY_VERSION`, `BINDERY_OPENAPI_VERSION`
    /// and `BINDERY_MAX_BODY_SIZE`, falling back to the defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        let defaults = Self::default();
        let mut limits = defaults.limits;
        if let Some(raw) = env::var("BINDERY_MAX_BODY_SIZE").ok().filter(|v| !v.trim().is_empty()) {
            limits.max_body_size = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "BINDERY_MAX_BODY_SIZE".to_string(),
                reason: format!("`{raw}` is not a byte count"),
            })?;
        }
        let config = Self {
            title: env_or("BINDERY_TITLE", defaults.title),
            version: env_or("BINDERY_VERSION", defaults.version),
            openapi_version: env_or("BINDERY_OPENAPI_VERSION", defaults.openapi_version),
            limits,
        };
        if !config.openapi_version.starts_with("3.") {
            return Err(ConfigError::Invalid {
                key: "BINDERY_OPENAPI_VERSION".to_string(),
                reason: format!("`{}` is not an OpenAPI 3 version", config.openapi_version),
            });
        }
        Ok(config)
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        // SAFETY: tests touching the environment are serialized.
        unsafe {
            env::remove_var("BINDERY_TITLE");
            env::remove_var("BINDERY_VERSION");
            env::remove_var("BINDERY_OPENAPI_VERSION");
            env::remove_var("BINDERY_MAX_BODY_SIZE");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear();
        assert_eq!(ApiConfig::from_env().unwrap(), ApiConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear();
        unsafe {
            env::set_var("BINDERY_TITLE", "Pet Store");
            env::set_var("BINDERY_VERSION", "2.1.0");
        }
        let config = ApiConfig::from_env().unwrap();
        assert_eq!(config.title, "Pet Store");
        assert_eq!(config.version, "2.1.0");
        assert_eq!(config.openapi_version, DEFAULT_OPENAPI_VERSION);
        clear();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_non_openapi3_version() {
        clear();
        unsafe {
            env::set_var("BINDERY_OPENAPI_VERSION", "2.0");
        }
        let err = ApiConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("BINDERY_OPENAPI_VERSION"));
        clear();
    }

    #[test]
    #[serial]
    fn test_from_env_max_body_size() {
        clear();
        unsafe {
            env::set_var("BINDERY_MAX_BODY_SIZE", "1024");
        }
        assert_eq!(ApiConfig::from_env().unwrap().limits.max_body_size, 1024);

        unsafe {
            env::set_var("BINDERY_MAX_BODY_SIZE", "lots");
        }
        let err = ApiConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("BINDERY_MAX_BODY_SIZE"));
        clear();
    }
}
