use serde::Deserialize;

use crate::core::Result;

/// Unit-of-work configuration
///
/// Every field has a default, so a partial JSON document such as
/// `{"label": "checkout"}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UnitOfWorkConfig {
    /// Name attached to the commit tracing span
    pub label: String,

    /// Sweep registered entities for undeclared changes before commit
    pub dirty_check: bool,

    /// Flush write-through caches after a successful commit
    pub flush_caches: bool,

    /// Return without opening a transaction when nothing is scheduled
    pub skip_empty_commit: bool,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            label: "unit_of_work".to_string(),
            dirty_check: true,
            flush_caches: true,
            skip_empty_commit: true,
        }
    }
}

impl UnitOfWorkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the span label
    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Enable or disable the dirty-check sweep
    pub fn dirty_check(mut self, enabled: bool) -> Self {
        self.dirty_check = enabled;
        self
    }

    /// Enable or disable post-commit cache flushing
    pub fn flush_caches(mut self, enabled: bool) -> Self {
        self.flush_caches = enabled;
        self
    }

    /// Enable or disable skipping empty commits
    pub fn skip_empty_commit(mut self, enabled: bool) -> Self {
        self.skip_empty_commit = enabled;
        self
    }

    /// Parse from a JSON document
    ///
    /// # Examples
    ///
    /// ```
    /// # use memoorm::UnitOfWorkConfig;
    /// let config = UnitOfWorkConfig::from_json(r#"{"label": "orders", "dirty_check": false}"#)?;
    /// assert_eq!(config.label, "orders");
    /// assert!(!config.dirty_check);
    /// assert!(config.flush_caches);
    /// # Ok::<(), memoorm::OrmError>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OrmError;

    #[test]
    fn test_builder() {
        let config = UnitOfWorkConfig::new()
            .label("batch")
            .dirty_check(false)
            .skip_empty_commit(false);
        assert_eq!(config.label, "batch");
        assert!(!config.dirty_check);
        assert!(!config.skip_empty_commit);
        assert!(config.flush_caches);
    }

    #[test]
    fn test_from_json_defaults() {
        let config = UnitOfWorkConfig::from_json("{}").unwrap();
        assert_eq!(config, UnitOfWorkConfig::default());
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            UnitOfWorkConfig::from_json(r#"{"dirty_check": "yes"}"#),
            Err(OrmError::Config(_))
        ));
    }
}
