//! Engine configuration.

use chrono::Duration;

/// Default guest session lifetime: one day.
pub const DEFAULT_GUEST_SESSION_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// Default user session lifetime: thirty days.
pub const DEFAULT_USER_SESSION_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// Default expiry sweep interval: fifteen minutes.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15 * 60;

/// Settings shared by the engine and the merge coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a guest cart lives after its last change.
    pub guest_session_max_age: Duration,
    /// How long a user session lives after its last cart change.
    pub user_session_max_age: Duration,
    /// Sweep expired guest carts before every quantity change.
    pub sweep_on_write: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            guest_session_max_age: Duration::seconds(DEFAULT_GUEST_SESSION_MAX_AGE_SECS),
            user_session_max_age: Duration::seconds(DEFAULT_USER_SESSION_MAX_AGE_SECS),
            sweep_on_write: false,
        }
    }
}

impl EngineConfig {
    pub fn with_guest_session_max_age(mut self, max_age: Duration) -> Self {
        self.guest_session_max_age = max_age;
        self
    }

    pub fn with_sweep_on_write(mut self, enabled: bool) -> Self {
        self.sweep_on_write = enabled;
        self
    }
}
