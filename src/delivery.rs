//! Verification code delivery
//!
//! Getting a code to the account holder (email, SMS) is the host's job. The
//! core hands each freshly issued code to a [`CodeDelivery`] and does not
//! wait on the outcome to decide anything: a failed delivery is logged and
//! the code stays valid, so the holder can still redeem it or ask for a
//! resend.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Boxed future returned by [`CodeDelivery::deliver`].
pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>;

/// Delivery channel failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The channel refused or lost the message
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Channel that carries a verification code to an address.
pub trait CodeDelivery: Send + Sync {
    /// Send `code` to `address`
    fn deliver(&self, address: &str, code: &str) -> DeliveryFuture<'_>;
}

/// Delivery that only writes a log record.
///
/// The code itself is left out of the record unless `reveal_codes` is set,
/// which is meant for local development where no mail transport exists.
#[derive(Debug, Clone, Default)]
pub struct LogDelivery {
    reveal_codes: bool,
}

impl LogDelivery {
    /// Log deliveries without the code
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the plaintext code in the log record
    pub fn reveal_codes(mut self, reveal: bool) -> Self {
        self.reveal_codes = reveal;
        self
    }
}

impl CodeDelivery for LogDelivery {
    fn deliver(&self, address: &str, code: &str) -> DeliveryFuture<'_> {
        if self.reveal_codes {
            tracing::info!(address, code, "Verification code (development delivery)");
        } else {
            tracing::info!(address, "Verification code ready for delivery");
        }
        Box::pin(async { Ok(()) })
    }
}
