//! Job lifecycle and progress counters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a refresh job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    ConnectionsEstablished,
    ReplicationReady,
    ShadowTableCreated,
    Copying,
    CopyComplete,
    Finalized,
    Closed,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::ConnectionsEstablished => "connections_established",
            JobPhase::ReplicationReady => "replication_ready",
            JobPhase::ShadowTableCreated => "shadow_table_created",
            JobPhase::Copying => "copying",
            JobPhase::CopyComplete => "copy_complete",
            JobPhase::Finalized => "finalized",
            JobPhase::Closed => "closed",
            JobPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable counters of a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub phase: JobPhase,
    /// Phase that was active when the job failed.
    pub failed_in: Option<JobPhase>,
    pub table: String,
    pub shadow_table: String,
    /// Row count measured once before the copy starts.
    pub rows_total: Option<u64>,
    /// Rows moved by committed batches, including those restored on resume.
    pub rows_copied: u64,
    /// Rows restored from a checkpoint when the job started.
    pub rows_resumed: u64,
    /// Offset of the next window to copy.
    pub next_offset: u64,
    pub last_committed_offset: Option<u64>,
    /// Batches committed by this process.
    pub batches: u64,
}

impl JobProgress {
    pub fn new(table: impl Into<String>, shadow_table: impl Into<String>, start_offset: u64) -> Self {
        Self {
            phase: JobPhase::Idle,
            failed_in: None,
            table: table.into(),
            shadow_table: shadow_table.into(),
            rows_total: None,
            rows_copied: 0,
            rows_resumed: 0,
            next_offset: start_offset,
            last_committed_offset: None,
            batches: 0,
        }
    }

    /// Record a committed window.
    pub fn record_batch(&mut self, offset: u64, rows: u64, batch_size: u64) {
        self.rows_copied += rows;
        self.last_committed_offset = Some(offset);
        self.next_offset = offset.saturating_add(batch_size);
        self.batches += 1;
    }

    /// Rows copied since this process started.
    pub fn rows_this_run(&self) -> u64 {
        self.rows_copied.saturating_sub(self.rows_resumed)
    }

    pub fn fail(&mut self) {
        if self.phase != JobPhase::Failed {
            self.failed_in = Some(self.phase);
            self.phase = JobPhase::Failed;
        }
    }

    /// One-line operator diagnostic: phase, table and last committed offset.
    pub fn describe(&self) -> String {
        let phase = self.failed_in.unwrap_or(self.phase);
        let offset = match self.last_committed_offset {
            Some(offset) => offset.to_string(),
            None => "none".to_string(),
        };
        let total = match self.rows_total {
            Some(total) => total.to_string(),
            None => "?".to_string(),
        };
        format!(
            "phase={} table={} shadow={} last_committed_offset={} next_offset={} rows_copied={}/{}",
            phase, self.table, self.shadow_table, offset, self.next_offset, self.rows_copied, total
        )
    }
}

/// Outcome of a completed refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSummary {
    /// Unique run identifier.
    pub run_id: String,

    pub table: String,

    pub shadow_table: String,

    /// Whether mutations were suppressed.
    pub dry_run: bool,

    /// Row count measured at the start of the copy.
    pub rows_total: u64,

    /// Rows copied, including rows restored from a checkpoint.
    pub rows_copied: u64,

    /// Batches committed by this run.
    pub batches: u64,

    /// Whether the shadow table was left in place.
    pub shadow_kept: bool,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Average throughput of this run (rows/second).
    pub rows_per_second: u64,
}

impl RefreshSummary {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
