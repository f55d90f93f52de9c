//! Mutation execution settings.

use serde::{Deserialize, Serialize};
use sqlflush_core::error::ConfigError;
use sqlflush_core::{Error, IdentityStrategy, Result};
use std::time::Duration;

/// Settings shared by every mutation executed through one session.
///
/// # Example
///
/// ```rust
/// use sqlflush_mutation::MutationSettings;
/// use std::time::Duration;
///
/// let settings = MutationSettings::new()
///     .batch_size(25)
///     .query_timeout(Duration::from_secs(5));
/// assert!(settings.is_batching_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationSettings {
    /// Rows per JDBC batch; `1` disables batching
    pub batch_size: usize,
    /// Statement query timeout in milliseconds
    pub query_timeout_ms: Option<u64>,
    /// Allow batching of updates/deletes restricted by extra columns (versions)
    pub batch_versioned_data: bool,
    /// Log every prepared statement's SQL at debug level
    pub log_sql: bool,
    /// Override the dialect's post-insert identity strategy
    pub identity_strategy: Option<IdentityStrategy>,
}

impl Default for MutationSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            query_timeout_ms: None,
            batch_versioned_data: true,
            log_sql: false,
            identity_strategy: None,
        }
    }
}

impl MutationSettings {
    /// Create settings with batching disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from JSON, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid mutation settings: {e}"),
                source: Some(Box::new(e)),
            })
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Set the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the statement query timeout.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Allow or forbid batching of version-restricted statements.
    pub fn batch_versioned_data(mut self, enabled: bool) -> Self {
        self.batch_versioned_data = enabled;
        self
    }

    /// Enable SQL logging.
    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    /// Force a post-insert identity strategy regardless of dialect.
    pub fn identity_strategy(mut self, strategy: IdentityStrategy) -> Self {
        self.identity_strategy = Some(strategy);
        self
    }

    /// Whether more than one row may be queued per batch.
    pub const fn is_batching_enabled(&self) -> bool {
        self.batch_size > 1
    }

    /// The statement timeout as a `Duration`.
    pub fn timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// Check the settings for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(ConfigError {
                message: "batch_size must be at least 1".to_string(),
                source: None,
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_batching() {
        let settings = MutationSettings::default();
        assert_eq!(settings.batch_size, 1);
        assert!(!settings.is_batching_enabled());
        assert!(settings.timeout().is_none());
    }

    #[test]
    fn json_fills_missing_fields() {
        let settings =
            MutationSettings::from_json(r#"{"batch_size": 10, "query_timeout_ms": 2500}"#)
                .unwrap();
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.timeout(), Some(Duration::from_millis(2500)));
        assert!(settings.batch_versioned_data);
    }

    #[test]
    fn json_identity_strategy_override() {
        let settings =
            MutationSettings::from_json(r#"{"identity_strategy": "select_after_insert"}"#).unwrap();
        assert_eq!(
            settings.identity_strategy,
            Some(IdentityStrategy::SelectAfterInsert)
        );
    }

    #[test]
    fn zero_batch_size_is_config_error() {
        let err = MutationSettings::from_json(r#"{"batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = MutationSettings::from_json("{").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
