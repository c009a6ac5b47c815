//! File-based checkpoint for resuming an interrupted refresh.

use crate::error::{RefreshError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Checkpoint of one refresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshState {
    /// Unique run identifier.
    pub run_id: String,

    /// Hash of the options that determine which rows are copied.
    pub config_hash: String,

    /// Source table.
    pub table: String,

    /// Shadow table receiving the rows.
    pub shadow_table: String,

    /// Current run status.
    pub status: RunStatus,

    /// Last lifecycle phase reached.
    pub phase: String,

    /// Row count measured at the start of the copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_total: Option<u64>,

    /// Rows copied by committed batches.
    pub rows_copied: u64,

    /// Offset of the last committed batch window.
    pub last_committed_offset: Option<u64>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the checkpoint was last written.
    pub updated_at: DateTime<Utc>,

    /// When the run finished (if it did).
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message if the run failed.
    pub error: Option<String>,

    /// HMAC-SHA256 over the serialized state (excluding this field), keyed by
    /// `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RefreshState {
    /// Create a new checkpoint.
    pub fn new(
        run_id: impl Into<String>,
        config_hash: impl Into<String>,
        table: impl Into<String>,
        shadow_table: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            config_hash: config_hash.into(),
            table: table.into(),
            shadow_table: shadow_table.into(),
            status: RunStatus::Running,
            phase: "idle".to_string(),
            rows_total: None,
            rows_copied: 0,
            last_committed_offset: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            hmac: None,
        }
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut state_for_signing = self.clone();
        state_for_signing.hmac = None;

        let content = serde_json::to_string(&state_for_signing)?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| RefreshError::State(format!("failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load a checkpoint, verifying its signature.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;

        match &state.hmac {
            Some(stored) if *stored == state.compute_hmac()? => Ok(state),
            Some(_) => Err(RefreshError::State(
                "integrity check failed: HMAC mismatch".to_string(),
            )),
            None => Err(RefreshError::State(
                "checkpoint has no HMAC signature".to_string(),
            )),
        }
    }

    /// Sign and write the checkpoint atomically (temp file, then rename).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.updated_at = Utc::now();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Refuse to resume a checkpoint written for different options.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(RefreshError::ConfigChanged);
        }
        Ok(())
    }

    /// First window offset a resumed run should copy.
    pub fn next_offset(&self, batch_size: u64) -> u64 {
        self.last_committed_offset
            .map(|offset| offset.saturating_add(batch_size))
            .unwrap_or(0)
    }

    /// Record progress after a phase change or a committed batch.
    pub fn record_progress(
        &mut self,
        phase: &str,
        rows_total: Option<u64>,
        rows_copied: u64,
        last_committed_offset: Option<u64>,
    ) {
        self.phase = phase.to_string();
        self.rows_total = rows_total;
        self.rows_copied = rows_copied;
        self.last_committed_offset = last_committed_offset;
    }

    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.to_string());
    }
}
