//! Recording session provider for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Session, SessionProvider, TextRow};
use crate::error::{RefreshError, Result};
use crate::topology::ConnectionResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    OpenRead,
    OpenWrite,
    Execute(String),
    Query(String),
    Commit,
    Rollback,
    CloseSession,
    CloseProvider,
}

struct Rule {
    prefix: String,
    queue: VecDeque<Option<TextRow>>,
    last: Option<Option<TextRow>>,
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    rules: Vec<Rule>,
    fail_on: Vec<String>,
}

/// Shared script and log behind every fake session and provider.
#[derive(Clone, Default)]
pub(crate) struct FakeDb {
    inner: Arc<Mutex<Inner>>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries starting with `prefix` return these single-column values in
    /// order; the last one repeats once the list is exhausted.
    pub fn respond<I, S>(&self, prefix: &str, values: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows = values
            .into_iter()
            .map(|v| Some(vec![Some(v.into())]))
            .collect();
        self.push_rule(prefix, rows)
    }

    /// Queries starting with `prefix` return `row`.
    pub fn respond_row(&self, prefix: &str, row: TextRow) -> &Self {
        self.push_rule(prefix, VecDeque::from([Some(row)]))
    }

    /// Statements starting with `prefix` fail with a server error.
    pub fn fail_on(&self, prefix: &str) -> &Self {
        self.inner.lock().unwrap().fail_on.push(prefix.to_string());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    /// SQL passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// SQL passed to `query_row`, in order.
    pub fn queries(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Query(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn provider(&self) -> FakeProvider {
        FakeProvider { db: self.clone() }
    }

    pub fn clear_events(&self) {
        self.inner.lock().unwrap().events.clear();
    }

    fn push_rule(&self, prefix: &str, queue: VecDeque<Option<TextRow>>) -> &Self {
        self.inner.lock().unwrap().rules.push(Rule {
            prefix: prefix.to_string(),
            queue,
            last: None,
        });
        self
    }

    fn record(&self, event: Event) {
        self.inner.lock().unwrap().events.push(event);
    }

    fn check_failure(&self, sql: &str) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_on.iter().any(|p| sql.starts_with(p.as_str())) {
            return Err(RefreshError::statement(sql, "injected failure"));
        }
        Ok(())
    }

    fn answer(&self, sql: &str) -> Option<TextRow> {
        let mut inner = self.inner.lock().unwrap();
        let rule = inner
            .rules
            .iter_mut()
            .filter(|r| sql.starts_with(r.prefix.as_str()))
            .max_by_key(|r| r.prefix.len())?;
        match rule.queue.pop_front() {
            Some(row) => {
                rule.last = Some(row.clone());
                row
            }
            None => rule.last.clone().flatten(),
        }
    }
}

pub(crate) struct FakeSession {
    db: FakeDb,
}

#[async_trait]
impl Session for FakeSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.db.record(Event::Execute(sql.to_string()));
        self.db.check_failure(sql)?;
        Ok(0)
    }

    async fn query_row(&mut self, sql: &str) -> Result<Option<TextRow>> {
        self.db.record(Event::Query(sql.to_string()));
        self.db.check_failure(sql)?;
        Ok(self.db.answer(sql))
    }

    async fn commit(&mut self) -> Result<()> {
        self.db.record(Event::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.db.record(Event::Rollback);
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.db.record(Event::CloseSession);
        Ok(())
    }
}

pub(crate) struct FakeProvider {
    db: FakeDb,
}

#[async_trait]
impl SessionProvider for FakeProvider {
    type Session = FakeSession;

    async fn open_read_session(&self) -> Result<FakeSession> {
        self.db.record(Event::OpenRead);
        Ok(FakeSession { db: self.db.clone() })
    }

    async fn open_write_session(&self) -> Result<FakeSession> {
        self.db.record(Event::OpenWrite);
        Ok(FakeSession { db: self.db.clone() })
    }

    async fn close(self) -> Result<()> {
        self.db.record(Event::CloseProvider);
        Ok(())
    }
}

/// Resolver handing out [`FakeProvider`]s and remembering what it was asked.
#[derive(Clone, Default)]
pub(crate) struct FakeResolver {
    pub db: FakeDb,
    pub fail: bool,
    pub requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeResolver {
    pub fn new(db: &FakeDb) -> Self {
        Self {
            db: db.clone(),
            fail: false,
            requests: Arc::default(),
        }
    }
}

#[async_trait]
impl ConnectionResolver for FakeResolver {
    type Provider = FakeProvider;

    async fn resolve(&self, cluster: &str, database: &str) -> Result<FakeProvider> {
        self.requests
            .lock()
            .unwrap()
            .push((cluster.to_string(), database.to_string()));
        if self.fail {
            return Err(RefreshError::Topology(format!("cluster '{}' not found", cluster)));
        }
        Ok(self.db.provider())
    }
}
