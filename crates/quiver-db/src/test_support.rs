//! In-memory engine for exercising the pool and executor
//!
//! `MemoryDatabase` records every statement, counts the connections it
//! opens, and can be told to fail opens or specific statements.

use crate::engine::{Connection, Database, QueryOutput};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use quiver_query::Params;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One statement as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// Serial of the connection that ran it, starting at 1
    pub connection: usize,
    pub text: String,
    pub parameters: Params,
}

#[derive(Debug, Default)]
struct MemoryState {
    log: Mutex<Vec<RecordedStatement>>,
    opened: AtomicUsize,
    failing_opens: AtomicUsize,
    open_delay: Mutex<Option<Duration>>,
    /// (needle, message): statements containing needle fail with message
    failures: Mutex<Vec<(String, String)>>,
    responses: Mutex<HashMap<String, QueryOutput>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<MemoryState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `open_connection`.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Sleep this long inside every `open_connection`.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = Some(delay);
    }

    /// Fail any statement whose text contains `needle`.
    pub fn fail_statement(&self, needle: impl Into<String>, message: impl Into<String>) {
        self.state
            .failures
            .lock()
            .push((needle.into(), message.into()));
    }

    /// Answer `execute` calls with exactly this text.
    pub fn respond_with(&self, text: impl Into<String>, output: QueryOutput) {
        self.state.responses.lock().insert(text.into(), output);
    }

    /// Connections opened successfully so far.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<RecordedStatement> {
        self.state.log.lock().clone()
    }

    /// Statement texts in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.state.log.lock().iter().map(|s| s.text.clone()).collect()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Connection = MemoryConnection;

    async fn open_connection(&self) -> DbResult<MemoryConnection> {
        let fail = self
            .state
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let delay = *self.state.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(DbError::Engine("connection refused".to_string()));
        }

        let serial = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryConnection {
            serial,
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    serial: usize,
    state: Arc<MemoryState>,
}

impl MemoryConnection {
    pub fn serial(&self) -> usize {
        self.serial
    }

    fn record(&self, text: &str, parameters: &Params) -> DbResult<()> {
        self.state.log.lock().push(RecordedStatement {
            connection: self.serial,
            text: text.to_string(),
            parameters: parameters.clone(),
        });

        let failures = self.state.failures.lock();
        match failures.iter().find(|(needle, _)| text.contains(needle.as_str())) {
            Some((_, message)) => Err(DbError::Engine(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, text: &str, parameters: &Params) -> DbResult<QueryOutput> {
        self.record(text, parameters)?;
        let responses = self.state.responses.lock();
        Ok(responses.get(text).cloned().unwrap_or_default())
    }

    async fn run(&mut self, statement: &str) -> DbResult<()> {
        self.record(statement, &Params::new())
    }
}
