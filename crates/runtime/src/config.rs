//! Runtime configuration.

/// Default number of load-decide-append attempts per command.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tuning for [`AggregateRuntime`](crate::AggregateRuntime).
///
/// Reads from environment variables:
/// - `COMMAND_MAX_ATTEMPTS` — attempts before a conflict is surfaced (default: `3`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// How many times a command is loaded, decided and appended before a
    /// persistent concurrency conflict is returned to the caller.
    pub max_attempts: u32,
}

impl RuntimeConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            max_attempts: std::env::var("COMMAND_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(RuntimeConfig::default().max_attempts, 3);
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        assert_eq!(RuntimeConfig::default().with_max_attempts(0).max_attempts, 1);
        assert_eq!(RuntimeConfig::default().with_max_attempts(7).max_attempts, 7);
    }
}
