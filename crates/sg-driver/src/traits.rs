use futures::future::BoxFuture;

use sg_types::DbError;

use crate::types::{Command, ConnectionSpec, ExecuteBehavior, Execution};

/// Connection factory for one database engine.
///
/// The factory is synchronous; the returned handle is opened asynchronously
/// with [`DbConnection::open`]. Transient/permanent classification of
/// failures is the driver's responsibility (see [`DbError::transient`]).
pub trait Driver: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn DbConnection>, DbError>;
}

/// A single database connection.
///
/// Methods return boxed futures rather than `impl Future` so that batch
/// steps can drive a `&mut dyn DbConnection` without knowing the driver.
///
/// Dropping an open connection must release it; [`DbConnection::close`] is
/// the orderly path and is idempotent.
pub trait DbConnection: Send {
    fn open(&mut self) -> BoxFuture<'_, Result<(), DbError>>;

    /// Execute a bound command and buffer its result sets and output
    /// parameters.
    fn execute<'a>(
        &'a mut self,
        command: &'a Command,
        behavior: ExecuteBehavior,
    ) -> BoxFuture<'a, Result<Execution, DbError>>;

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DbError>>;

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>>;

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}
