//! SQL text construction for the refresh job.
//!
//! Everything here is a pure function of the builder's fields. The exact
//! text is relied upon by operational tooling that greps logs, so spacing
//! and keyword case are fixed.

mod shadow;

pub use shadow::{rewrite_create_table, SHADOW_ENGINE};

use crate::config::MigrationOptions;
use crate::error::Result;

/// Statement releasing any table locks held by the session.
pub const UNLOCK_TABLES: &str = "UNLOCK TABLES";

/// Builds every statement the engine emits for one source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBuilder {
    source: String,
    shadow: String,
    primary: String,
    database: String,
    where_clause: Option<String>,
}

impl QueryBuilder {
    pub fn new(
        source: impl Into<String>,
        shadow: impl Into<String>,
        primary: impl Into<String>,
        database: impl Into<String>,
        where_clause: Option<String>,
    ) -> Self {
        Self {
            source: source.into(),
            shadow: shadow.into(),
            primary: primary.into(),
            database: database.into(),
            where_clause,
        }
    }

    pub fn from_options(options: &MigrationOptions) -> Self {
        Self::new(
            options.table.clone(),
            options.shadow_table(),
            options.primary.clone(),
            options.database.clone(),
            options.where_clause.clone(),
        )
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn shadow(&self) -> &str {
        &self.shadow
    }

    /// `SELECT <columns> FROM <source>[ WHERE <filter>]`, with
    /// ` ORDER BY <order_column> LIMIT <offset>, <limit>` appended when an
    /// ordering column is given. A missing offset means 0; a missing limit
    /// produces `ORDER BY` alone.
    pub fn build_select(
        &self,
        columns: &str,
        order_column: Option<&str>,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> String {
        let mut sql = format!("SELECT {} FROM {}", columns, self.source);
        self.push_filter(&mut sql);
        if let Some(column) = order_column {
            sql.push_str(" ORDER BY ");
            sql.push_str(column);
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {}, {}", offset.unwrap_or(0), limit));
            }
        }
        sql
    }

    /// `SELECT COUNT(*) FROM <source>[ WHERE <filter>]`
    pub fn build_count(&self) -> String {
        self.build_select("COUNT(*)", None, None, None)
    }

    /// Number of source rows that fall inside one batch window.
    pub fn build_count_window(&self, offset: u64, limit: u64) -> String {
        format!(
            "SELECT COUNT(*) FROM ({}) AS batch_window",
            self.build_select("*", Some(&self.primary), Some(offset), Some(limit))
        )
    }

    /// `INSERT INTO <shadow> SELECT * FROM <source>[ WHERE <filter>] ORDER BY <primary> LIMIT <offset>, <limit>`
    pub fn build_insert_batch(&self, offset: u64, limit: u64) -> String {
        format!(
            "INSERT INTO {} {}",
            self.shadow,
            self.build_select("*", Some(&self.primary), Some(offset), Some(limit))
        )
    }

    /// Rewrite the source `SHOW CREATE TABLE` text into the shadow definition.
    pub fn build_shadow_create(&self, source_create: &str) -> Result<String> {
        rewrite_create_table(source_create, &self.source, &self.shadow, false)
    }

    /// Same as [`build_shadow_create`](Self::build_shadow_create) but emits
    /// `CREATE TABLE IF NOT EXISTS`, for runs resuming after a failure.
    pub fn build_shadow_create_if_missing(&self, source_create: &str) -> Result<String> {
        rewrite_create_table(source_create, &self.source, &self.shadow, true)
    }

    pub fn show_create_table(&self) -> String {
        format!("SHOW CREATE TABLE {}", self.source)
    }

    pub fn use_database(&self) -> String {
        format!("USE {}", self.database)
    }

    pub fn drop_shadow(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.shadow)
    }

    fn push_filter(&self, sql: &mut String) {
        if let Some(clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
    }
}
