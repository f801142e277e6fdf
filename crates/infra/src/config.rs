//! Repository configuration.
//!
//! Policy is carried by value in each [`Repository`](crate::Repository) instead of
//! process-wide statics, so two repositories never interfere with each other.

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, RepositoryResult};
use crate::logging::LogSeverity;

/// Environment variable toggling the existence check.
pub const ENV_CHECK_FOUND: &str = "IDREPO_CHECK_FOUND";

/// Environment variable selecting the operation log severity.
pub const ENV_LOG_LEVEL: &str = "IDREPO_LOG_LEVEL";

/// Repository policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// When set, get/update/delete by id fail with `NotFound` for absent records.
    pub check_found: bool,
    /// Severity of operation log records.
    pub log_level: LogSeverity,
}

impl RepositoryConfig {
    pub fn with_check_found(mut self, check_found: bool) -> Self {
        self.check_found = check_found;
        self
    }

    pub fn with_log_level(mut self, log_level: LogSeverity) -> Self {
        self.log_level = log_level;
        self
    }

    /// Load from `IDREPO_CHECK_FOUND` / `IDREPO_LOG_LEVEL`, defaulting unset values.
    pub fn from_env() -> RepositoryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, test map, ...).
    pub fn from_lookup<F>(lookup: F) -> RepositoryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CHECK_FOUND) {
            config.check_found = parse_bool(ENV_CHECK_FOUND, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            config.log_level = raw.parse()?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> RepositoryResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(RepositoryError::invalid_argument(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}
