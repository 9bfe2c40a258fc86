//! Logging configuration

use crate::parse::parse_bool;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// JSON format for production/log aggregation
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    /// Parse a format name, falling back to `Pretty` for unknown values
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Log output format
    pub log_format: LogFormat,
    /// Log level filter used when `RUST_LOG` is unset (e.g. "info", "portcullis=debug")
    pub log_filter: String,
    /// Include file and line in log records
    pub with_source_location: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            with_source_location: true,
        }
    }
}

impl ObservabilityConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LOG_FORMAT`: "pretty", "json", or "compact" (default: "pretty")
    /// - `LOG_FILTER`: filter directive used when `RUST_LOG` is unset (default: "info")
    /// - `LOG_SOURCE_LOCATION`: include file/line (default: "true")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key/value source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            log_format: lookup("LOG_FORMAT")
                .map(|s| LogFormat::from_str_loose(&s))
                .unwrap_or(defaults.log_format),
            log_filter: lookup("LOG_FILTER")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.log_filter),
            with_source_location: lookup("LOG_SOURCE_LOCATION")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.with_source_location),
        }
    }

    /// Create a new configuration builder
    pub fn builder() -> ObservabilityConfigBuilder {
        ObservabilityConfigBuilder::default()
    }
}

/// Builder for ObservabilityConfig
#[derive(Debug, Default)]
pub struct ObservabilityConfigBuilder {
    config: ObservabilityConfig,
}

impl ObservabilityConfigBuilder {
    /// Set the log format
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Set the log filter
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Include or omit file/line information
    pub fn with_source_location(mut self, enable: bool) -> Self {
        self.config.with_source_location = enable;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ObservabilityConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_filter, "info");
        assert!(config.with_source_location);
    }

    #[test]
    fn test_from_lookup() {
        let config = ObservabilityConfig::from_lookup(|key| match key {
            "LOG_FORMAT" => Some("JSON".into()),
            "LOG_FILTER" => Some("portcullis=debug".into()),
            "LOG_SOURCE_LOCATION" => Some("off".into()),
            _ => None,
        });
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_filter, "portcullis=debug");
        assert!(!config.with_source_location);
    }

    #[test]
    fn test_unknown_format_falls_back() {
        assert_eq!(LogFormat::from_str_loose("xml"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_loose("compact"), LogFormat::Compact);
    }

    #[test]
    fn test_builder() {
        let config = ObservabilityConfig::builder()
            .log_format(LogFormat::Compact)
            .log_filter("debug")
            .build();

        assert_eq!(config.log_format, LogFormat::Compact);
        assert_eq!(config.log_filter, "debug");
    }
}
