//! Option type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Suffix appended to the source table name to form the shadow table name.
pub const SHADOW_SUFFIX: &str = "_data_pipeline_refresh";

/// Options for one refresh job.
///
/// Built once at startup (from a YAML file, CLI flags, or both) and handed
/// to the engine by value. Nothing reads options from global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Source table to copy.
    pub table: String,

    /// Column used for `ORDER BY` pagination. Should be immutable and unique.
    #[serde(default = "default_primary")]
    pub primary: String,

    /// Topology cluster name.
    #[serde(default = "default_cluster")]
    pub cluster: String,

    /// Location of the topology YAML file.
    #[serde(default = "default_topology_path")]
    pub topology_path: PathBuf,

    /// Schema holding the source table.
    pub database: String,

    /// Optional row filter, inserted verbatim after `WHERE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,

    /// Rows per batch window.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Execute reads only; log every mutating statement instead of running it.
    #[serde(default)]
    pub dry_run: bool,

    /// Leave the shadow table in place after the copy for an external swap.
    #[serde(default)]
    pub keep_shadow: bool,

    /// Skip the start-up wait for replicas to catch up.
    #[serde(default)]
    pub skip_replication_wait: bool,

    /// Cap on the average number of rows copied per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_per_second_cap: Option<u64>,

    /// First window offset. Non-zero when resuming a partial copy.
    #[serde(default)]
    pub start_offset: u64,

    /// Replication throttle settings.
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

/// Replication throttle settings. Durations are seconds in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Lag ceiling in seconds.
    #[serde(default = "default_max_lag")]
    pub max_lag_secs: f64,

    /// Delay between lag polls while waiting for catch-up.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Longest time to wait for replicas to catch up before failing.
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,

    /// Per-batch sleep is `lag * backoff_factor`.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound for a single per-batch sleep.
    #[serde(default = "default_max_sleep")]
    pub max_sleep_secs: f64,

    /// Query returning replica lag in seconds as a single value. It runs on
    /// the read-write connection, so it must report lag as the master sees
    /// it (for example from a heartbeat table fed back by the replicas).
    /// There is no default.
    #[serde(default)]
    pub lag_query: String,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_lag_secs: default_max_lag(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            backoff_factor: default_backoff_factor(),
            max_sleep_secs: default_max_sleep(),
            lag_query: String::new(),
        }
    }
}

impl ThrottleConfig {
    pub fn max_lag(&self) -> Duration {
        seconds(self.max_lag_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        seconds(self.max_wait_secs)
    }

    pub fn max_sleep(&self) -> Duration {
        seconds(self.max_sleep_secs)
    }
}

/// Seconds as a `Duration`. Negative and NaN become zero, values too large
/// for a `Duration` saturate.
fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

impl MigrationOptions {
    /// Options with defaults for everything except the required identity fields.
    pub fn new(table: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary: default_primary(),
            cluster: default_cluster(),
            topology_path: default_topology_path(),
            database: database.into(),
            where_clause: None,
            batch_size: default_batch_size(),
            dry_run: false,
            keep_shadow: false,
            skip_replication_wait: false,
            rows_per_second_cap: None,
            start_offset: 0,
            throttle: ThrottleConfig::default(),
        }
    }

    /// Name of the shadow table derived from the source table.
    pub fn shadow_table(&self) -> String {
        format!("{}{}", self.table, SHADOW_SUFFIX)
    }
}

fn default_primary() -> String {
    "id".to_string()
}

fn default_cluster() -> String {
    "refresh_primary".to_string()
}

fn default_topology_path() -> PathBuf {
    PathBuf::from("topology.yaml")
}

fn default_batch_size() -> u64 {
    500
}

fn default_max_lag() -> f64 {
    5.0
}

fn default_poll_interval() -> f64 {
    1.0
}

fn default_max_wait() -> f64 {
    600.0
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_sleep() -> f64 {
    60.0
}
