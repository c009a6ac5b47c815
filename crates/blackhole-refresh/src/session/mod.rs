//! Scoped database sessions.
//!
//! The engine never touches a driver directly. It asks a [`SessionProvider`]
//! for read or write sessions and drives them through the [`Session`] trait,
//! which lets tests substitute a recording fake.
//!
//! # Lifetime
//!
//! A session wraps exactly one pooled connection. [`Session::close`] rolls
//! back anything left open and returns the connection to its pool. If a
//! session is dropped without `close` (an early `?` return), the connection
//! still goes back to the pool, where it is reset before reuse.

mod mysql;

#[cfg(test)]
pub(crate) mod fake;

pub use mysql::MysqlSession;

use async_trait::async_trait;

use crate::error::{RefreshError, Result};

/// One row of a query result with every column rendered as text.
pub type TextRow = Vec<Option<String>>;

/// A transactional handle over a single connection.
#[async_trait]
pub trait Session: Send {
    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Run a query and return its first row, if any.
    async fn query_row(&mut self, sql: &str) -> Result<Option<TextRow>>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Roll back and release the connection.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Source of sessions for one database on one cluster.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: Session;

    /// Session on the read-only pool.
    async fn open_read_session(&self) -> Result<Self::Session>;

    /// Session on the read-write pool.
    async fn open_write_session(&self) -> Result<Self::Session>;

    /// Disconnect every pool owned by the provider.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Parse the first column of a row as an unsigned count.
pub fn first_u64(row: Option<TextRow>, sql: &str) -> Result<u64> {
    let value = row
        .and_then(|r| r.into_iter().next().flatten())
        .ok_or_else(|| RefreshError::statement(sql, "query returned no value"))?;
    value.trim().parse::<u64>().map_err(|e| {
        RefreshError::statement(sql, format!("expected a count, got '{}': {}", value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_u64() {
        assert_eq!(first_u64(Some(vec![Some("25".into())]), "q").unwrap(), 25);
        assert!(first_u64(None, "q").is_err());
        assert!(first_u64(Some(vec![None]), "q").is_err());
        assert!(first_u64(Some(vec![Some("abc".into())]), "q").is_err());
    }
}
