//! Cluster topology: which hosts serve which cluster, and in which role.
//!
//! The topology file is YAML:
//!
//! ```yaml
//! topology:
//!   - cluster: refresh_primary
//!     replica: master
//!     entries:
//!       - host: 10.0.0.1
//!         port: 3306
//!         user: refresh
//!         password_env: REFRESH_DB_PASSWORD
//!   - cluster: refresh_primary
//!     replica: replica
//!     entries:
//!       - host: 10.0.0.2
//!         user: refresh
//!         password_env: REFRESH_DB_PASSWORD
//! ```
//!
//! [`TopologyCache`] loads the file at most once per process and hands out
//! shared references; [`ClusterResolver`] turns a cluster entry into pools.

mod resolver;

pub use resolver::{
    ClusterResolver, ConnectionResolver, ConnectionSet, ConnectionSetConfig, HealthCheckResult,
};

use crate::error::{RefreshError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Role a group of hosts plays within a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Accepts writes.
    Master,
    /// Read-only replica.
    Replica,
}

/// A single reachable MySQL endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDef {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub user: String,

    /// Inline password. Prefer `password_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Name of the environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl fmt::Debug for ConnectionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDef")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_env", &self.password_env)
            .finish()
    }
}

impl ConnectionDef {
    /// Resolve the credential reference into a password.
    pub fn resolve_password(&self) -> Result<Option<String>> {
        if let Some(var) = &self.password_env {
            return std::env::var(var).map(Some).map_err(|_| {
                RefreshError::Config(format!(
                    "environment variable {} (password for {}@{}) is not set",
                    var, self.user, self.host
                ))
            });
        }
        Ok(self.password.clone())
    }
}

/// One cluster/role group in the topology file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub cluster: String,

    #[serde(rename = "replica")]
    pub role: Role,

    pub entries: Vec<ConnectionDef>,
}

/// Connection definitions for one cluster, grouped by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDefs {
    pub cluster: String,
    pub master: Vec<ConnectionDef>,
    pub replica: Vec<ConnectionDef>,
}

impl ConnectionDefs {
    /// Endpoint for read-write pools.
    pub fn read_write(&self) -> Option<&ConnectionDef> {
        self.master.first()
    }

    /// Endpoint for read-only pools, falling back to the master.
    pub fn read_only(&self) -> Option<&ConnectionDef> {
        self.replica.first().or_else(|| self.read_write())
    }
}

/// Parsed topology file. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyDefinition {
    #[serde(default)]
    pub topology: Vec<ClusterEntry>,
}

impl TopologyDefinition {
    /// Load the topology from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RefreshError::Config(format!("cannot read topology file {:?}: {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a topology from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Names of all clusters, in file order, without duplicates.
    pub fn cluster_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for entry in &self.topology {
            if !names.contains(&entry.cluster.as_str()) {
                names.push(&entry.cluster);
            }
        }
        names
    }

    /// Collect the definitions of `cluster`.
    pub fn connection_defs(&self, cluster: &str) -> Result<ConnectionDefs> {
        let mut defs = ConnectionDefs {
            cluster: cluster.to_string(),
            master: Vec::new(),
            replica: Vec::new(),
        };
        let mut found = false;
        for entry in self.topology.iter().filter(|e| e.cluster == cluster) {
            found = true;
            match entry.role {
                Role::Master => defs.master.extend(entry.entries.iter().cloned()),
                Role::Replica => defs.replica.extend(entry.entries.iter().cloned()),
            }
        }

        if !found {
            return Err(RefreshError::Topology(format!(
                "cluster '{}' not found (known clusters: {})",
                cluster,
                self.cluster_names().join(", ")
            )));
        }
        if defs.master.is_empty() {
            return Err(RefreshError::Topology(format!(
                "cluster '{}' has no master entry",
                cluster
            )));
        }
        Ok(defs)
    }
}

/// Lazily loaded, process-wide topology.
///
/// Created by the entry point and shared through `Arc`; the file is read on
/// the first [`get`](Self::get) and the parsed value reused afterwards.
#[derive(Debug)]
pub struct TopologyCache {
    path: PathBuf,
    cell: OnceCell<Arc<TopologyDefinition>>,
}

impl TopologyCache {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            cell: OnceCell::new(),
        })
    }

    /// A cache that is already populated. Used when the topology comes from
    /// somewhere other than a file.
    pub fn preloaded(topology: TopologyDefinition) -> Arc<Self> {
        Arc::new(Self {
            path: PathBuf::new(),
            cell: OnceCell::new_with(Some(Arc::new(topology))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<TopologyDefinition>> {
        self.cell
            .get_or_try_init(|| async {
                let topology = TopologyDefinition::load(&self.path)?;
                info!(
                    "Loaded topology from {:?} ({} clusters)",
                    self.path,
                    topology.cluster_names().len()
                );
                Ok::<_, RefreshError>(Arc::new(topology))
            })
            .await
            .cloned()
    }
}

fn default_port() -> u16 {
    3306
}
