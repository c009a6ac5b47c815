//! `mysql_async` implementation of [`Session`].

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool, Row, Value};
use tracing::debug;

use super::{Session, TextRow};
use crate::error::{RefreshError, Result};

/// Session over one pooled MySQL connection.
///
/// Autocommit is switched off when the session opens, so every statement
/// runs inside an implicit transaction until [`commit`](Session::commit) or
/// [`rollback`](Session::rollback). The pool resets the connection when it
/// is returned, which restores autocommit for the next borrower.
pub struct MysqlSession {
    conn: Conn,
    label: &'static str,
}

impl MysqlSession {
    /// Check out a connection from `pool` and prepare it.
    pub async fn open(pool: &Pool, read_only: bool) -> Result<Self> {
        let label = if read_only { "read" } else { "write" };
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| RefreshError::connection(e, format!("opening {} session", label)))?;

        conn.query_drop("SET SESSION autocommit = 0")
            .await
            .map_err(|e| RefreshError::connection(e, format!("configuring {} session", label)))?;
        if read_only {
            conn.query_drop("SET SESSION TRANSACTION READ ONLY")
                .await
                .map_err(|e| RefreshError::connection(e, "marking read session read-only"))?;
        }

        debug!("Opened {} session (connection id {})", label, conn.id());
        Ok(Self { conn, label })
    }

    async fn run_control(&mut self, sql: &str) -> Result<()> {
        debug!("[{}] {}", self.label, sql);
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| RefreshError::from_mysql(sql, e))
    }
}

#[async_trait]
impl Session for MysqlSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("[{}] {}", self.label, sql);
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| RefreshError::from_mysql(sql, e))?;
        Ok(self.conn.affected_rows())
    }

    async fn query_row(&mut self, sql: &str) -> Result<Option<TextRow>> {
        debug!("[{}] {}", self.label, sql);
        let row: Option<Row> = self
            .conn
            .query_first(sql)
            .await
            .map_err(|e| RefreshError::from_mysql(sql, e))?;
        Ok(row.map(|r| r.unwrap().into_iter().map(value_to_text).collect()))
    }

    async fn commit(&mut self) -> Result<()> {
        self.run_control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.run_control("ROLLBACK").await
    }

    async fn close(mut self) -> Result<()> {
        self.run_control("ROLLBACK").await?;
        debug!("Released {} session", self.label);
        Ok(())
    }
}

/// Render a column value as text. Temporal values use MySQL literal syntax.
fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        other => Some(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(Value::NULL), None);
        assert_eq!(value_to_text(Value::Int(-3)).as_deref(), Some("-3"));
        assert_eq!(value_to_text(Value::UInt(25)).as_deref(), Some("25"));
        assert_eq!(value_to_text(Value::Double(1.5)).as_deref(), Some("1.5"));
        assert_eq!(
            value_to_text(Value::Bytes(b"CREATE TABLE t (id int) ENGINE=InnoDB".to_vec()))
                .as_deref(),
            Some("CREATE TABLE t (id int) ENGINE=InnoDB")
        );
        assert_eq!(
            value_to_text(Value::Date(2024, 1, 2, 3, 4, 5, 0)).as_deref(),
            Some("2024-01-02 03:04:05")
        );
    }
}
