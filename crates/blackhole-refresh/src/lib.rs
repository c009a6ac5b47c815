//! # blackhole-refresh
//!
//! Live, replication-safe bulk copy of a MySQL table into a BLACKHOLE
//! shadow table.
//!
//! Rows written to a BLACKHOLE table are discarded locally but still land
//! in the binary log, so copying a table into its shadow replays every row
//! through replication and any binlog consumer downstream. The copy runs in
//! fixed-size windows ordered by the primary key, with a pause after each
//! batch whenever replicas fall behind.
//!
//! - **Shadow creation** from the live `SHOW CREATE TABLE` definition
//! - **Batched copy** with `INSERT ... SELECT ... LIMIT offset, size`
//! - **Replication throttle** proportional to measured lag
//! - **Dry-run mode** that reads everything and mutates nothing
//! - **Resume capability** via signed JSON state files
//!
//! ## Example
//!
//! ```rust,no_run
//! use blackhole_refresh::{ClusterResolver, MigrationOptions, RefreshEngine, TopologyCache};
//!
//! #[tokio::main]
//! async fn main() -> blackhole_refresh::Result<()> {
//!     let options = MigrationOptions::load("refresh.yaml")?;
//!     let resolver = ClusterResolver::new(TopologyCache::new(&options.topology_path));
//!     let mut engine = RefreshEngine::new(options, resolver);
//!     let summary = engine.run().await?;
//!     println!("Copied {} rows", summary.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod session;
pub mod state;
pub mod throttle;
pub mod topology;

// Re-exports for convenient access
pub use config::{MigrationOptions, ThrottleConfig, SHADOW_SUFFIX};
pub use engine::{JobPhase, JobProgress, RefreshEngine, RefreshSummary};
pub use error::{RefreshError, Result};
pub use query::QueryBuilder;
pub use session::{MysqlSession, Session, SessionProvider};
pub use state::{RefreshState, RunStatus};
pub use throttle::{RateCap, ReplicationThrottle};
pub use topology::{
    ClusterResolver, ConnectionResolver, ConnectionSet, HealthCheckResult, TopologyCache,
    TopologyDefinition,
};
