//! Tunables of the rental domain.

use std::time::Duration;

/// How long a reserved bike waits for its payment.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Rental domain settings.
///
/// Reads from environment variables:
/// - `RENTAL_PAYMENT_TIMEOUT_SECS` — seconds a reservation waits for payment (default: `600`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalPolicy {
    pub payment_timeout: Duration,

    /// Snapshot bike state once this many events were folded.
    pub snapshot_every: u64,
}

impl Default for RentalPolicy {
    fn default() -> Self {
        Self {
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
            snapshot_every: 50,
        }
    }
}

impl RentalPolicy {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            payment_timeout: std::env::var("RENTAL_PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_timeout),
            ..defaults
        }
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }
}
