//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Subscriber options. `RUST_LOG` takes precedence over the default level.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: String,
    pub json: bool,
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Installs the global subscriber. Returns `false` if one was already set.
    pub fn init(self) -> bool {
        let registry = tracing_subscriber::registry().with(self.filter());
        let result = if self.json {
            registry
                .with(fmt::layer().json().with_target(self.with_target))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(self.with_target))
                .try_init()
        };
        result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = TracingConfig::new().level("debug").json().with_target(false);
        assert_eq!(config.level, "debug");
        assert!(config.json);
        assert!(!config.with_target);
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let _ = TracingConfig::new().init();
        assert!(!TracingConfig::new().init());
    }
}
