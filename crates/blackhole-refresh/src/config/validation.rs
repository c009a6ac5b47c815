//! Option validation.

use super::MigrationOptions;
use crate::error::{RefreshError, Result};

/// Largest accepted batch.
pub const MAX_BATCH_SIZE: u64 = 1_000_000;

/// Largest accepted throttle duration (one week).
pub const MAX_THROTTLE_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Largest accepted lag multiplier.
pub const MAX_BACKOFF_FACTOR: f64 = 100.0;

/// Validate the options.
pub fn validate(options: &MigrationOptions) -> Result<()> {
    check_identifier("table", &options.table)?;
    check_identifier("primary", &options.primary)?;
    check_identifier("database", &options.database)?;

    if options.cluster.trim().is_empty() {
        return Err(RefreshError::Config("cluster is required".into()));
    }
    if options.topology_path.as_os_str().is_empty() {
        return Err(RefreshError::Config("topology_path is required".into()));
    }
    if options.batch_size == 0 || options.batch_size > MAX_BATCH_SIZE {
        return Err(RefreshError::Config(format!(
            "batch_size must be between 1 and {}, got {}",
            MAX_BATCH_SIZE, options.batch_size
        )));
    }
    if let Some(clause) = &options.where_clause {
        if clause.trim().is_empty() {
            return Err(RefreshError::Config(
                "where_clause must not be blank when given".into(),
            ));
        }
    }
    if let Some(0) = options.rows_per_second_cap {
        return Err(RefreshError::Config(
            "rows_per_second_cap must be at least 1".into(),
        ));
    }

    let throttle = &options.throttle;
    for (name, value, max) in [
        ("throttle.max_lag_secs", throttle.max_lag_secs, MAX_THROTTLE_SECS),
        ("throttle.poll_interval_secs", throttle.poll_interval_secs, MAX_THROTTLE_SECS),
        ("throttle.max_wait_secs", throttle.max_wait_secs, MAX_THROTTLE_SECS),
        ("throttle.backoff_factor", throttle.backoff_factor, MAX_BACKOFF_FACTOR),
        ("throttle.max_sleep_secs", throttle.max_sleep_secs, MAX_THROTTLE_SECS),
    ] {
        if !value.is_finite() || !(0.0..=max).contains(&value) {
            return Err(RefreshError::Config(format!(
                "{} must be between 0 and {}, got {}",
                name, max, value
            )));
        }
    }
    if throttle.poll_interval_secs == 0.0 {
        return Err(RefreshError::Config(
            "throttle.poll_interval_secs must be greater than 0".into(),
        ));
    }
    if throttle.lag_query.trim().is_empty() {
        return Err(RefreshError::Config(
            "throttle.lag_query is required: a query returning replica lag in seconds, \
             run on the read-write connection"
                .into(),
        ));
    }

    Ok(())
}

/// Table/column/schema names are spliced into SQL unquoted, so only plain
/// identifiers are accepted. The filter clause is not checked.
fn check_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RefreshError::Config(format!("{} is required", field)));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if !valid {
        return Err(RefreshError::Config(format!(
            "{} must be a plain identifier, got '{}'",
            field, value
        )));
    }
    Ok(())
}
