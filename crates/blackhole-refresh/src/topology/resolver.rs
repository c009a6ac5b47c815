//! Cluster resolution into MySQL connection pools.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool, PoolConstraints, PoolOpts};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ConnectionDef, ConnectionDefs, TopologyCache};
use crate::error::{RefreshError, Result};
use crate::session::{MysqlSession, SessionProvider};

/// Default ceiling on connections per pool. A job holds at most one read
/// and one write session at a time.
const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Turns a (cluster, database) pair into a session provider.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    type Provider: SessionProvider;

    async fn resolve(&self, cluster: &str, database: &str) -> Result<Self::Provider>;
}

/// Everything needed to build a [`ConnectionSet`].
#[derive(Debug, Clone)]
pub struct ConnectionSetConfig {
    pub database: String,
    pub defs: ConnectionDefs,
    pub max_connections: usize,
}

impl ConnectionSetConfig {
    pub fn new(database: impl Into<String>, defs: ConnectionDefs) -> Self {
        Self {
            database: database.into(),
            defs,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// A read-only pool and a read-write pool scoped to one database.
///
/// Owned by a single job. Pools connect lazily, so building a set performs
/// no network round trip.
pub struct ConnectionSet {
    database: String,
    cluster: String,
    read_only: Pool,
    read_write: Pool,
}

/// Result of pinging both pools of a [`ConnectionSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub cluster: String,
    pub database: String,
    pub read_write_connected: bool,
    pub read_write_latency_ms: u64,
    pub read_write_error: Option<String>,
    pub read_only_connected: bool,
    pub read_only_latency_ms: u64,
    pub read_only_error: Option<String>,
    pub healthy: bool,
}

impl ConnectionSet {
    /// Build both pools from `config`.
    pub fn from_config(config: &ConnectionSetConfig) -> Result<Self> {
        let rw_def = config.defs.read_write().ok_or_else(|| {
            RefreshError::Topology(format!("cluster '{}' has no master entry", config.defs.cluster))
        })?;
        let ro_def = config.defs.read_only().unwrap_or(rw_def);

        let read_write = build_pool(rw_def, &config.database, config.max_connections)?;
        let read_only = build_pool(ro_def, &config.database, config.max_connections)?;

        info!(
            "Prepared pools for {}/{}: rw={}:{} ro={}:{}",
            config.defs.cluster,
            config.database,
            rw_def.host,
            rw_def.port,
            ro_def.host,
            ro_def.port
        );

        Ok(Self {
            database: config.database.clone(),
            cluster: config.defs.cluster.clone(),
            read_only,
            read_write,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Ping both pools.
    pub async fn health_check(&self) -> HealthCheckResult {
        let (rw_ok, rw_ms, rw_err) = ping(&self.read_write).await;
        let (ro_ok, ro_ms, ro_err) = ping(&self.read_only).await;
        HealthCheckResult {
            cluster: self.cluster.clone(),
            database: self.database.clone(),
            read_write_connected: rw_ok,
            read_write_latency_ms: rw_ms,
            read_write_error: rw_err,
            read_only_connected: ro_ok,
            read_only_latency_ms: ro_ms,
            read_only_error: ro_err,
            healthy: rw_ok && ro_ok,
        }
    }
}

#[async_trait]
impl SessionProvider for ConnectionSet {
    type Session = MysqlSession;

    async fn open_read_session(&self) -> Result<MysqlSession> {
        MysqlSession::open(&self.read_only, true).await
    }

    async fn open_write_session(&self) -> Result<MysqlSession> {
        MysqlSession::open(&self.read_write, false).await
    }

    async fn close(self) -> Result<()> {
        let ro = self.read_only.disconnect().await;
        let rw = self.read_write.disconnect().await;
        debug!("Disconnected pools for {}/{}", self.cluster, self.database);
        ro.map_err(|e| RefreshError::connection(e, "disconnecting read-only pool"))?;
        rw.map_err(|e| RefreshError::connection(e, "disconnecting read-write pool"))?;
        Ok(())
    }
}

/// Resolves clusters through a shared [`TopologyCache`].
#[derive(Debug, Clone)]
pub struct ClusterResolver {
    topology: Arc<TopologyCache>,
    max_connections: usize,
}

impl ClusterResolver {
    pub fn new(topology: Arc<TopologyCache>) -> Self {
        Self {
            topology,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Build the pool configuration for `cluster` without opening pools.
    pub async fn connection_set_config(
        &self,
        cluster: &str,
        database: &str,
    ) -> Result<ConnectionSetConfig> {
        let topology = self.topology.get().await?;
        let defs = topology.connection_defs(cluster)?;
        let mut config = ConnectionSetConfig::new(database, defs);
        config.max_connections = self.max_connections;
        Ok(config)
    }
}

#[async_trait]
impl ConnectionResolver for ClusterResolver {
    type Provider = ConnectionSet;

    async fn resolve(&self, cluster: &str, database: &str) -> Result<ConnectionSet> {
        let config = self.connection_set_config(cluster, database).await?;
        ConnectionSet::from_config(&config)
    }
}

fn build_pool(def: &ConnectionDef, database: &str, max_connections: usize) -> Result<Pool> {
    let password = def.resolve_password()?;
    let constraints = PoolConstraints::new(1, max_connections.max(1)).ok_or_else(|| {
        RefreshError::Config(format!("invalid pool size {}", max_connections))
    })?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(def.host.clone())
        .tcp_port(def.port)
        .user(Some(def.user.clone()))
        .pass(password)
        .db_name(Some(database.to_string()))
        .pool_opts(PoolOpts::default().with_constraints(constraints));

    Ok(Pool::new(opts))
}

async fn ping(pool: &Pool) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    let result = ping_once(pool).await;
    let elapsed = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => (true, elapsed, None),
        Err(e) => (false, elapsed, Some(e.to_string())),
    }
}

async fn ping_once(pool: &Pool) -> std::result::Result<(), mysql_async::Error> {
    let mut conn = pool.get_conn().await?;
    conn.ping().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyDefinition;

    const TOPOLOGY: &str = r#"
topology:
  - cluster: test_cluster
    replica: master
    entries:
      - host: 127.0.0.1
        user: refresh
        password: secret
"#;

    fn resolver() -> ClusterResolver {
        let topology = TopologyDefinition::from_yaml(TOPOLOGY).unwrap();
        ClusterResolver::new(TopologyCache::preloaded(topology)).with_max_connections(2)
    }

    #[tokio::test]
    async fn test_connection_set_config_is_read_write() {
        let config = resolver()
            .connection_set_config("test_cluster", "yelp")
            .await
            .unwrap();
        assert_eq!(config.database, "yelp");
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.defs.read_write().unwrap().host, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_resolve_unknown_cluster_fails() {
        let err = resolver().resolve("missing", "yelp").await.err().unwrap();
        assert!(matches!(err, RefreshError::Topology(_)));
    }

    #[tokio::test]
    async fn test_health_check_reports_unreachable_server() {
        let topology = TopologyDefinition::from_yaml(
            r#"
topology:
  - cluster: closed_port
    replica: master
    entries:
      - host: 127.0.0.1
        port: 1
        user: refresh
        password: secret
"#,
        )
        .unwrap();
        let defs = topology.connection_defs("closed_port").unwrap();
        let set = ConnectionSet::from_config(&ConnectionSetConfig::new("yelp", defs)).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(30), set.health_check())
            .await
            .unwrap();

        assert!(!result.healthy);
        assert!(!result.read_write_connected);
        assert!(result.read_write_error.is_some());
        assert!(!result.read_only_connected);
        assert_eq!(result.cluster, "closed_port");
        let _ = set.close().await;
    }

    #[tokio::test]
    async fn test_resolve_builds_pools_without_connecting() {
        let set = resolver().resolve("test_cluster", "yelp").await.unwrap();
        assert_eq!(set.database(), "yelp");
        set.close().await.unwrap();
    }
}
