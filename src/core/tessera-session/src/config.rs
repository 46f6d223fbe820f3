//! Session configuration.

use std::time::Duration;

/// Default lead time between a proactive refresh and the access token's expiry.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);

/// Configuration for [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long before expiry the refresh timer fires.
    pub refresh_skew: Duration,
}

impl SessionConfig {
    /// Sets the refresh lead time.
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }
}
