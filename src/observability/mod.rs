//! Observability Infrastructure (AU-2, AU-3, AU-12)
//!
//! The identity core logs through plain `tracing` macros and the
//! [`security_event!`] macro; it never installs a subscriber itself. A host
//! process calls [`init`] once at startup to choose where the records go.
//!
//! # Usage
//!
//! ```ignore
//! use portcullis::observability::{init, LogFormat, ObservabilityConfig};
//!
//! // From environment variables
//! init(ObservabilityConfig::from_env())?;
//!
//! // Or programmatically
//! init(ObservabilityConfig::builder().log_format(LogFormat::Json).build())?;
//! ```

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig, ObservabilityConfigBuilder};
pub use events::{security_event, SecurityEvent, Severity};

use thiserror::Error;
use tracing::info;

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`ObservabilityError::Config`] for an unparsable filter and
/// [`ObservabilityError::Provider`] if a global subscriber is already set.
pub fn init(config: ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(&config)?;

    info!(
        log_format = ?config.log_format,
        log_filter = %config.log_filter,
        "Observability initialized"
    );

    Ok(())
}

/// Observability initialization errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Invalid configuration
    #[error("Observability config error: {0}")]
    Config(String),
    /// Subscriber installation failed
    #[error("Provider error: {0}")]
    Provider(String),
}
