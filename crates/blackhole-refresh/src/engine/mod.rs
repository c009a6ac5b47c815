//! Refresh engine: drives one table copy through its lifecycle.
//!
//! ```text
//! Idle -> ConnectionsEstablished -> ReplicationReady -> ShadowTableCreated
//!      -> Copying -> CopyComplete -> Finalized -> Closed
//! ```
//!
//! Any phase may end in `Failed`. [`RefreshEngine::run`] drives every phase
//! in order and always releases connections, whatever the outcome.

mod progress;

pub use progress::{JobPhase, JobProgress, RefreshSummary};

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::MigrationOptions;
use crate::error::{RefreshError, Result};
use crate::query::{QueryBuilder, UNLOCK_TABLES};
use crate::session::{first_u64, Session, SessionProvider};
use crate::state::{RefreshState, RunStatus};
use crate::throttle::{RateCap, ReplicationThrottle};
use crate::topology::ConnectionResolver;

/// Copies one source table into its BLACKHOLE shadow, batch by batch.
pub struct RefreshEngine<R: ConnectionResolver> {
    options: MigrationOptions,
    queries: QueryBuilder,
    throttle: ReplicationThrottle,
    resolver: R,
    provider: Option<R::Provider>,
    progress: JobProgress,
    rate_cap: Option<RateCap>,
    run_id: String,
    state_file: Option<PathBuf>,
    state: Option<RefreshState>,
    /// The shadow table may already exist from an earlier attempt.
    resuming: bool,
}

impl<R: ConnectionResolver> RefreshEngine<R> {
    pub fn new(options: MigrationOptions, resolver: R) -> Self {
        let queries = QueryBuilder::from_options(&options);
        let throttle = ReplicationThrottle::new(options.throttle.clone());
        let progress = JobProgress::new(
            options.table.clone(),
            options.shadow_table(),
            options.start_offset,
        );
        Self {
            resuming: options.start_offset > 0,
            options,
            queries,
            throttle,
            resolver,
            provider: None,
            progress,
            rate_cap: None,
            run_id: uuid::Uuid::new_v4().to_string(),
            state_file: None,
            state: None,
        }
    }

    /// Set the checkpoint file path.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Continue from the checkpoint file, if one exists.
    pub fn resume(mut self) -> Result<Self> {
        let Some(path) = self.state_file.clone() else {
            return Err(RefreshError::Config(
                "resume requires a state file".to_string(),
            ));
        };
        if !path.exists() {
            info!("No state file at {:?}; starting a fresh run", path);
            return Ok(self);
        }

        let mut state = RefreshState::load(&path)?;
        state.validate_config(&self.options.hash())?;
        if state.status == RunStatus::Completed {
            return Err(RefreshError::State(format!(
                "run {} already completed; remove {:?} to start over",
                state.run_id, path
            )));
        }

        self.progress.next_offset = state.next_offset(self.options.batch_size);
        self.progress.rows_copied = state.rows_copied;
        self.progress.rows_resumed = state.rows_copied;
        self.progress.last_committed_offset = state.last_committed_offset;
        info!(
            "Resuming run {} from state file {:?} at offset {} ({} rows already copied)",
            state.run_id, path, self.progress.next_offset, state.rows_copied
        );

        state.status = RunStatus::Running;
        state.error = None;
        state.completed_at = None;
        self.run_id = state.run_id.clone();
        self.state = Some(state);
        self.resuming = true;
        Ok(self)
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    pub fn progress(&self) -> &JobProgress {
        &self.progress
    }

    pub fn phase(&self) -> JobPhase {
        self.progress.phase
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run every phase, then release connections.
    ///
    /// On failure the job is marked `Failed`, the checkpoint records the
    /// error, and the original error is returned.
    pub async fn run(&mut self) -> Result<RefreshSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();

        info!(
            "Starting refresh run {}: {}.{} -> {} (batch size {}, dry run: {})",
            self.run_id,
            self.options.database,
            self.options.table,
            self.queries.shadow(),
            self.options.batch_size,
            self.options.dry_run
        );

        let outcome = self.run_phases().await;

        if let Err(e) = &outcome {
            self.progress.fail();
            error!("Refresh failed ({})", self.progress.describe());
            let message = e.to_string();
            if let Err(state_err) = self.save_state(|state| state.mark_failed(&message)) {
                warn!("Could not record failure in state file: {}", state_err);
            }
        }

        let closed = self.close().await;
        outcome?;
        closed?;
        self.save_state(|state| state.mark_completed())?;

        let completed_at = Utc::now();
        let duration = clock.elapsed().as_secs_f64();
        let rows_per_second = if duration > 0.0 {
            (self.progress.rows_this_run() as f64 / duration) as u64
        } else {
            0
        };

        let summary = RefreshSummary {
            run_id: self.run_id.clone(),
            table: self.options.table.clone(),
            shadow_table: self.queries.shadow().to_string(),
            dry_run: self.options.dry_run,
            rows_total: self.progress.rows_total.unwrap_or(0),
            rows_copied: self.progress.rows_copied,
            batches: self.progress.batches,
            shadow_kept: self.options.keep_shadow && !self.options.dry_run,
            duration_seconds: duration,
            started_at,
            completed_at,
            rows_per_second,
        };

        info!(
            "Refresh complete: {} rows in {} batches ({:.1}s, {} rows/s)",
            summary.rows_copied, summary.batches, summary.duration_seconds, summary.rows_per_second
        );
        Ok(summary)
    }

    async fn run_phases(&mut self) -> Result<()> {
        self.options.validate()?;
        self.setup_connections().await?;
        self.initial_action().await?;
        self.process_table().await?;
        self.final_action().await
    }

    /// Resolve the cluster into a read-only and a read-write pool.
    pub async fn setup_connections(&mut self) -> Result<()> {
        self.expect_phase(JobPhase::Idle, "set up connections")?;

        info!(
            "Resolving cluster {} for database {}",
            self.options.cluster, self.options.database
        );
        let provider = self
            .resolver
            .resolve(&self.options.cluster, &self.options.database)
            .await?;
        self.provider = Some(provider);

        self.progress.phase = JobPhase::ConnectionsEstablished;
        self.checkpoint()
    }

    /// Wait for replication, then create the shadow table.
    ///
    /// The write session is always rolled back and released at the end of
    /// this phase, on success and on failure.
    pub async fn initial_action(&mut self) -> Result<()> {
        self.expect_phase(JobPhase::ConnectionsEstablished, "run the initial action")?;

        let mut session = self.provider()?.open_write_session().await?;
        let outcome = self.prepare_shadow(&mut session).await;
        let rolled_back = session.rollback().await;
        let closed = session.close().await;
        outcome.and(rolled_back).and(closed)?;

        self.progress.phase = JobPhase::ShadowTableCreated;
        self.checkpoint()
    }

    async fn prepare_shadow<S: Session>(&mut self, session: &mut S) -> Result<()> {
        if self.options.skip_replication_wait {
            info!("Skipping start-up replication wait");
        } else {
            info!("Waiting for replication to catch up");
            self.throttle.wait_until_caught_up(session).await?;
        }
        self.progress.phase = JobPhase::ReplicationReady;

        session.execute(&self.queries.use_database()).await?;
        self.create_table_from_src_table(session).await
    }

    /// Read the current source definition and create the shadow from it.
    pub async fn create_table_from_src_table<S: Session>(&self, session: &mut S) -> Result<()> {
        let show = self.queries.show_create_table();
        let definition = session
            .query_row(&show)
            .await?
            .and_then(|row| row.into_iter().nth(1).flatten())
            .ok_or_else(|| {
                RefreshError::schema_parse(
                    self.queries.source(),
                    "SHOW CREATE TABLE returned no definition",
                )
            })?;

        let create = if self.resuming {
            self.queries.build_shadow_create_if_missing(&definition)?
        } else {
            self.queries.build_shadow_create(&definition)?
        };

        info!("Creating shadow table {}", self.queries.shadow());
        self.execute_mutation(session, &create).await?;
        Ok(())
    }

    /// Copy every window of the source into the shadow table.
    pub async fn process_table(&mut self) -> Result<()> {
        self.expect_phase(JobPhase::ShadowTableCreated, "process the table")?;

        let total = self.total_row_count().await?;
        self.progress.rows_total = Some(total);
        self.progress.phase = JobPhase::Copying;
        self.rate_cap = self.options.rows_per_second_cap.map(RateCap::new);

        info!(
            "Copying {} rows from {} into {} in batches of {} (starting at offset {})",
            total,
            self.queries.source(),
            self.queries.shadow(),
            self.options.batch_size,
            self.progress.next_offset
        );

        let mut session = self.provider()?.open_write_session().await?;
        let outcome = self.copy_batches(&mut session, total).await;
        let closed = session.close().await;
        outcome.and(closed)?;

        if self.progress.rows_copied != total {
            warn!(
                "Copied {} rows but counted {} at start; {} changed during the copy",
                self.progress.rows_copied,
                total,
                self.queries.source()
            );
        }

        self.progress.phase = JobPhase::CopyComplete;
        self.checkpoint()
    }

    async fn copy_batches<S: Session>(&mut self, session: &mut S, total: u64) -> Result<()> {
        let batch_size = self.options.batch_size;

        while self.progress.next_offset < total {
            let offset = self.progress.next_offset;

            self.insert_batch(session, offset).await?;
            let inserted = self.count_inserted(session, offset).await?;
            session.commit().await?;

            self.progress.record_batch(offset, inserted, batch_size);
            self.checkpoint()?;
            info!(
                "Batch {} at offset {}: {} rows ({}/{} copied)",
                self.progress.batches, offset, inserted, self.progress.rows_copied, total
            );

            self.after_processing_rows(session).await?;
        }

        Ok(())
    }

    /// Number of rows the copy will walk through.
    pub async fn total_row_count(&self) -> Result<u64> {
        let sql = self.queries.build_count();
        let mut session = self.provider()?.open_read_session().await?;
        let counted = session
            .query_row(&sql)
            .await
            .and_then(|row| first_u64(row, &sql));
        let closed = session.close().await;
        let total = counted?;
        closed?;
        debug!("{} has {} rows to copy", self.queries.source(), total);
        Ok(total)
    }

    /// Insert the window starting at `offset` into the shadow table.
    pub async fn insert_batch<S: Session>(&self, session: &mut S, offset: u64) -> Result<()> {
        let sql = self
            .queries
            .build_insert_batch(offset, self.options.batch_size);
        self.execute_mutation(session, &sql).await?;
        Ok(())
    }

    /// Rows of the source falling inside the window at `offset`.
    pub async fn count_inserted<S: Session>(&self, session: &mut S, offset: u64) -> Result<u64> {
        let sql = self
            .queries
            .build_count_window(offset, self.options.batch_size);
        let row = session.query_row(&sql).await?;
        first_u64(row, &sql)
    }

    /// Per-batch housekeeping: rollback, unlock, commit, then throttle.
    pub async fn after_processing_rows<S: Session>(&self, session: &mut S) -> Result<()> {
        session.rollback().await?;
        session.execute(UNLOCK_TABLES).await?;
        session.commit().await?;

        self.throttle.throttle(session).await?;
        if let Some(cap) = &self.rate_cap {
            cap.pace(self.progress.rows_this_run()).await;
        }
        Ok(())
    }

    /// Drop the shadow table unless it is kept for an external swap.
    pub async fn final_action(&mut self) -> Result<()> {
        if !matches!(
            self.progress.phase,
            JobPhase::CopyComplete | JobPhase::Finalized
        ) {
            return Err(self.transition_error("run the final action"));
        }

        let mut session = self.provider()?.open_write_session().await?;
        let outcome = self.finalize_shadow(&mut session).await;
        let closed = session.close().await;
        outcome.and(closed)?;

        self.progress.phase = JobPhase::Finalized;
        self.checkpoint()
    }

    async fn finalize_shadow<S: Session>(&self, session: &mut S) -> Result<()> {
        session.execute(&self.queries.use_database()).await?;
        if self.options.keep_shadow {
            info!("Keeping shadow table {}", self.queries.shadow());
        } else {
            info!("Dropping shadow table {}", self.queries.shadow());
            self.execute_mutation(session, &self.queries.drop_shadow())
                .await?;
        }
        session.commit().await
    }

    /// Release the connection pools. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(provider) = self.provider.take() {
            provider.close().await?;
            debug!("Released connections for {}", self.options.database);
        }
        if self.progress.phase == JobPhase::Finalized {
            self.progress.phase = JobPhase::Closed;
        }
        Ok(())
    }

    /// Run a CREATE/INSERT/DROP, or only log it in dry-run mode.
    async fn execute_mutation<S: Session>(&self, session: &mut S, sql: &str) -> Result<Option<u64>> {
        if self.options.dry_run {
            info!("dry run: would execute: {}", sql);
            return Ok(None);
        }
        session.execute(sql).await.map(Some)
    }

    fn provider(&self) -> Result<&R::Provider> {
        self.provider
            .as_ref()
            .ok_or_else(|| self.transition_error("open a session"))
    }

    fn expect_phase(&self, expected: JobPhase, action: &'static str) -> Result<()> {
        if self.progress.phase != expected {
            return Err(self.transition_error(action));
        }
        Ok(())
    }

    fn transition_error(&self, action: &'static str) -> RefreshError {
        RefreshError::InvalidTransition {
            action,
            phase: self.progress.phase.to_string(),
        }
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.save_state(|_| {})
    }

    /// Update and write the checkpoint. Dry runs commit nothing, so they
    /// never write one.
    fn save_state(&mut self, update: impl FnOnce(&mut RefreshState)) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        if self.options.dry_run {
            return Ok(());
        }

        let state = self.state.get_or_insert_with(|| {
            RefreshState::new(
                self.run_id.clone(),
                self.options.hash(),
                self.progress.table.clone(),
                self.progress.shadow_table.clone(),
            )
        });
        let phase = self.progress.failed_in.unwrap_or(self.progress.phase);
        state.record_progress(
            phase.as_str(),
            self.progress.rows_total,
            self.progress.rows_copied,
            self.progress.last_committed_offset,
        );
        update(state);
        state.save(path)
    }
}
