use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};

use sg_types::DbError;

use crate::traits::{DbConnection, Driver};
use crate::types::{Command, ConnectionSpec, ExecuteBehavior, Execution};

/// What a scripted handler sees for one execution.
pub struct MemCall<'a> {
    pub connection_string: &'a str,
    pub command: &'a Command,
    pub behavior: ExecuteBehavior,
    pub in_transaction: bool,
}

/// A command that reached the driver.
#[derive(Debug, Clone)]
pub struct MemCallRecord {
    pub connection_string: String,
    pub command: Command,
}

type Handler = Arc<dyn Fn(&MemCall<'_>) -> Result<Execution, DbError> + Send + Sync>;

/// Connection and command counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemStats {
    pub opened: usize,
    pub closed: usize,
    pub executed: usize,
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    executed: AtomicUsize,
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

struct MemInner {
    handlers: RwLock<HashMap<String, Handler>>,
    counters: Counters,
    calls: Mutex<Vec<MemCallRecord>>,
    latency: Option<Duration>,
}

/// In-memory scripted `Driver`.
///
/// Responses are produced by handlers registered per query name. Intended
/// for unit tests; nothing is persisted.
#[derive(Clone)]
pub struct MemDriver {
    inner: Arc<MemInner>,
}

impl MemDriver {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Every `open` and `execute` sleeps for `latency` before completing.
    pub fn with_latency(latency: Duration) -> Self {
        Self::build(Some(latency))
    }

    fn build(latency: Option<Duration>) -> Self {
        MemDriver {
            inner: Arc::new(MemInner {
                handlers: RwLock::new(HashMap::new()),
                counters: Counters::default(),
                calls: Mutex::new(Vec::new()),
                latency,
            }),
        }
    }

    /// Register (or replace) the handler for `query_name`.
    pub fn on<F>(&self, query_name: &str, handler: F) -> &Self
    where
        F: Fn(&MemCall<'_>) -> Result<Execution, DbError> + Send + Sync + 'static,
    {
        self.inner.handlers.write().insert(query_name.to_owned(), Arc::new(handler));
        self
    }

    pub fn stats(&self) -> MemStats {
        let c = &self.inner.counters;
        MemStats {
            opened: c.opened.load(Ordering::SeqCst),
            closed: c.closed.load(Ordering::SeqCst),
            executed: c.executed.load(Ordering::SeqCst),
            begun: c.begun.load(Ordering::SeqCst),
            committed: c.committed.load(Ordering::SeqCst),
            rolled_back: c.rolled_back.load(Ordering::SeqCst),
        }
    }

    pub fn calls(&self) -> Vec<MemCallRecord> {
        self.inner.calls.lock().clone()
    }

    /// Calls that reached the driver for `query_name`.
    pub fn call_count(&self, query_name: &str) -> usize {
        self.inner.calls.lock().iter().filter(|c| c.command.name == query_name).count()
    }
}

impl Default for MemDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MemDriver {
    fn name(&self) -> &str {
        "mem"
    }

    fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn DbConnection>, DbError> {
        Ok(Box::new(MemConnection {
            inner: self.inner.clone(),
            connection_string: spec.connection_string.clone(),
            state: ConnState::Created,
            in_transaction: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// MemConnection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Created,
    Open,
    Released,
}

struct MemConnection {
    inner: Arc<MemInner>,
    connection_string: String,
    state: ConnState,
    in_transaction: bool,
}

impl MemConnection {
    async fn pause(&self) {
        if let Some(latency) = self.inner.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn require_open(&self) -> Result<(), DbError> {
        if self.state == ConnState::Open {
            Ok(())
        } else {
            Err(DbError::permanent("connection is not open"))
        }
    }

    fn release(&mut self) {
        if self.state == ConnState::Open {
            if self.in_transaction {
                self.inner.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
                self.in_transaction = false;
            }
            self.inner.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        self.state = ConnState::Released;
    }
}

impl DbConnection for MemConnection {
    fn open(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        async move {
            if self.state != ConnState::Created {
                return Err(DbError::permanent("connection already used"));
            }
            self.pause().await;
            self.state = ConnState::Open;
            self.inner.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn execute<'a>(
        &'a mut self,
        command: &'a Command,
        behavior: ExecuteBehavior,
    ) -> BoxFuture<'a, Result<Execution, DbError>> {
        async move {
            self.require_open()?;
            self.pause().await;
            let handler = self.inner.handlers.read().get(&command.name).cloned();
            tracing::trace!(query = %command.name, connection = %self.connection_string, "mem execute");
            self.inner.counters.executed.fetch_add(1, Ordering::SeqCst);
            self.inner.calls.lock().push(MemCallRecord {
                connection_string: self.connection_string.clone(),
                command: command.clone(),
            });
            let handler = handler.ok_or_else(|| {
                DbError::permanent(format!("no handler registered for '{}'", command.name))
            })?;
            (*handler)(&MemCall {
                connection_string: &self.connection_string,
                command,
                behavior,
                in_transaction: self.in_transaction,
            })
        }
        .boxed()
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        async move {
            self.require_open()?;
            self.in_transaction = true;
            self.inner.counters.begun.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        async move {
            self.require_open()?;
            if !self.in_transaction {
                return Err(DbError::permanent("no transaction to commit"));
            }
            self.in_transaction = false;
            self.inner.counters.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        async move {
            if self.in_transaction {
                self.in_transaction = false;
                self.inner.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        async move { self.release() }.boxed()
    }
}

impl Drop for MemConnection {
    fn drop(&mut self) {
        self.release();
    }
}
