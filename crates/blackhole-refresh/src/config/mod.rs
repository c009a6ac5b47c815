//! Option loading, validation, and hashing.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl MigrationOptions {
    /// Load options from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse options from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let options = Self::parse_yaml(yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a YAML file without validating them.
    ///
    /// For callers that apply overrides first and validate afterwards.
    pub fn load_unvalidated<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    fn parse_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 over the fields that identify which rows a run copies.
    ///
    /// Used to refuse resuming a checkpoint written by a different job.
    /// Throttle settings, dry-run and start offset are not part of the hash.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.cluster.as_str(),
            self.database.as_str(),
            self.table.as_str(),
            self.primary.as_str(),
            self.where_clause.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.batch_size.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let yaml = r#"
table: business
database: yelp
throttle:
  lag_query: SELECT lag_seconds FROM heartbeat.replica_lag
"#;
        let options = MigrationOptions::from_yaml(yaml).unwrap();
        assert_eq!(options.primary, "id");
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.cluster, "refresh_primary");
        assert!(!options.dry_run);
        assert_eq!(options.throttle.max_lag_secs, 5.0);
        assert_eq!(options.shadow_table(), "business_data_pipeline_refresh");
    }

    #[test]
    fn test_from_yaml_throttle_block() {
        let yaml = r#"
table: business
database: yelp
where_clause: "country='CA'"
batch_size: 1000
throttle:
  max_lag_secs: 2.5
  max_wait_secs: 30
  lag_query: SELECT lag_seconds FROM heartbeat.replica_lag
"#;
        let options = MigrationOptions::from_yaml(yaml).unwrap();
        assert_eq!(options.where_clause.as_deref(), Some("country='CA'"));
        assert_eq!(options.throttle.max_lag().as_millis(), 2500);
        assert_eq!(options.throttle.max_wait().as_secs(), 30);
        assert_eq!(options.throttle.poll_interval().as_secs(), 1);
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = r#"
table: business
database: yelp
batch_size: 0
"#;
        assert!(MigrationOptions::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_yaml_requires_lag_query() {
        let yaml = r#"
table: business
database: yelp
"#;
        let err = MigrationOptions::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("lag_query"));
    }

    #[test]
    fn test_load_unvalidated_accepts_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"table: business\ndatabase: yelp\n").unwrap();

        let mut options = MigrationOptions::load_unvalidated(file.path()).unwrap();
        assert!(options.throttle.lag_query.is_empty());
        assert!(options.validate().is_err());

        options.throttle.lag_query = "SELECT 0".to_string();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_hash_ignores_runtime_knobs() {
        let base = MigrationOptions::new("business", "yelp");
        let mut tuned = base.clone();
        tuned.dry_run = true;
        tuned.start_offset = 5000;
        tuned.throttle.max_lag_secs = 1.0;
        assert_eq!(base.hash(), tuned.hash());

        let mut filtered = base.clone();
        filtered.where_clause = Some("country='CA'".into());
        assert_ne!(base.hash(), filtered.hash());
    }
}
