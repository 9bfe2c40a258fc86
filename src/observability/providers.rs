//! Subscriber installation

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::{LogFormat, ObservabilityConfig, ObservabilityError};

/// Build the level filter: `RUST_LOG` wins, then the configured directive.
pub(crate) fn build_filter(config: &ObservabilityConfig) -> Result<EnvFilter, ObservabilityError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ObservabilityError::Config(format!("Invalid log filter: {}", e)))
}

/// Install the global tracing subscriber.
pub(crate) fn init_tracing(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let filter = build_filter(config)?;
    let subscriber = tracing_subscriber::registry().with(filter);
    let source = config.with_source_location;

    let result = match config.log_format {
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(source)
                    .with_line_number(source),
            )
            .try_init(),
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(source)
                    .with_line_number(source),
            )
            .try_init(),
        LogFormat::Compact => subscriber.with(fmt::layer().compact().with_target(true)).try_init(),
    };

    result.map_err(|e| ObservabilityError::Provider(format!("Failed to init tracing: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        // Only meaningful when RUST_LOG does not already supply a filter
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = ObservabilityConfig::builder().log_filter("portcullis=[").build();
        assert!(matches!(build_filter(&config), Err(ObservabilityError::Config(_))));
    }

    #[test]
    fn test_valid_filter_accepted() {
        let config = ObservabilityConfig::builder().log_filter("portcullis=debug,info").build();
        assert!(build_filter(&config).is_ok());
    }
}
