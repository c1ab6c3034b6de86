//! Per-minute action quotas.

use serde::Deserialize;

use crate::storage::Action;

/// Default join actions permitted per minute.
pub const DEFAULT_JOINS_PER_MINUTE: u32 = 10;

/// Default check actions permitted per minute.
pub const DEFAULT_CHECKS_PER_MINUTE: u32 = 60;

/// Quotas applied by the signup handler.
///
/// A quota of `n` permits the first `n` actions of that kind in each
/// wall-clock minute, counted across every process sharing the database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Join actions permitted per minute.
    ///
    /// Default: 10.
    pub joins_per_minute: u32,

    /// Check actions permitted per minute.
    ///
    /// Default: 60.
    pub checks_per_minute: u32,
}

impl RateLimitConfig {
    pub fn max_for(&self, action: Action) -> u32 {
        match action {
            Action::Join => self.joins_per_minute,
            Action::Check => self.checks_per_minute,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            joins_per_minute: DEFAULT_JOINS_PER_MINUTE,
            checks_per_minute: DEFAULT_CHECKS_PER_MINUTE,
        }
    }
}
