use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use sg_driver::{Command, DbConnection, ExecuteBehavior, Execution, Query};
use sg_keys::{KeyComponent, ShardChild, ShardGrandchild, ShardKey};
use sg_types::{FromValue, Parameters, Reader, Row, SgError, Value};

use crate::manager::first_output;

/// What a step knows about where it runs.
pub struct StepContext<'a, S> {
    /// Shard the batch runs on; `None` for a non-sharded database.
    pub shard_id: Option<&'a S>,
    /// The same shard id as a parameter value.
    pub shard_value: Option<&'a Value>,
    pub cancel: &'a CancellationToken,
}

/// One unit of work in a batch.
///
/// All steps of a batch share one connection and one transaction. Each
/// returns a result of the batch's type; see [`crate::Batch`] for how the
/// step results combine.
pub trait BatchStep<S, R>: Send + Sync {
    fn execute<'a>(
        &'a self,
        conn: &'a mut dyn DbConnection,
        ctx: StepContext<'a, S>,
    ) -> BoxFuture<'a, Result<R, SgError>>;
}

async fn execute_command(
    conn: &mut dyn DbConnection,
    query: &Query,
    parameters: &Parameters,
    behavior: ExecuteBehavior,
    shard_value: Option<&Value>,
    cancel: &CancellationToken,
) -> Result<Execution, SgError> {
    if cancel.is_cancelled() {
        return Err(SgError::Cancelled);
    }
    let command = Command::bind(query, parameters, shard_value);
    let execution = conn.execute(&command, behavior).await?;
    if cancel.is_cancelled() {
        return Err(SgError::Cancelled);
    }
    Ok(execution)
}

// ---------------------------------------------------------------------------
// Key extraction
// ---------------------------------------------------------------------------

/// Builds a key of some shape from a result row.
pub trait KeyColumns<S>: Send + Sync {
    type Key: Send;

    fn extract(&self, row: &Row<'_>, shard_id: Option<&S>) -> Result<Self::Key, SgError>;

    /// Key returned when the result has no row.
    fn empty(&self) -> Self::Key;
}

fn shard_from_row<S: KeyComponent>(
    row: &Row<'_>,
    column: Option<&str>,
    ambient: Option<&S>,
) -> Result<S, SgError> {
    match column {
        Some(column) if row.has_column(column) => row.get_as(column),
        _ => ambient.cloned().ok_or_else(|| {
            SgError::InvalidArgument(
                "key needs a shard id but there is no shard column and no current shard".into(),
            )
        }),
    }
}

/// Columns holding a [`ShardKey`]. Without a shard column (or when the row
/// lacks it) the current shard is used.
#[derive(Debug, Clone)]
pub struct RecordColumns<R> {
    origin: char,
    shard_column: Option<String>,
    record_column: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> RecordColumns<R> {
    pub fn new(origin: char, record_column: impl Into<String>) -> Self {
        RecordColumns {
            origin,
            shard_column: None,
            record_column: record_column.into(),
            _record: PhantomData,
        }
    }

    pub fn with_shard_column(mut self, column: impl Into<String>) -> Self {
        self.shard_column = Some(column.into());
        self
    }
}

impl<S: KeyComponent, R: KeyComponent> KeyColumns<S> for RecordColumns<R> {
    type Key = ShardKey<S, R>;

    fn extract(&self, row: &Row<'_>, shard_id: Option<&S>) -> Result<Self::Key, SgError> {
        let shard = shard_from_row(row, self.shard_column.as_deref(), shard_id)?;
        let record = row.get_as(&self.record_column)?;
        Ok(ShardKey::try_new(self.origin, shard, record)?)
    }

    fn empty(&self) -> Self::Key {
        ShardKey::empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChildColumns<R, C> {
    record: RecordColumns<R>,
    child_column: String,
    _child: PhantomData<fn() -> C>,
}

impl<R, C> ChildColumns<R, C> {
    pub fn new(record: RecordColumns<R>, child_column: impl Into<String>) -> Self {
        ChildColumns { record, child_column: child_column.into(), _child: PhantomData }
    }
}

impl<S, R, C> KeyColumns<S> for ChildColumns<R, C>
where
    S: KeyComponent,
    R: KeyComponent,
    C: KeyComponent,
{
    type Key = ShardChild<S, R, C>;

    fn extract(&self, row: &Row<'_>, shard_id: Option<&S>) -> Result<Self::Key, SgError> {
        let parent = self.record.extract(row, shard_id)?;
        let child = row.get_as(&self.child_column)?;
        Ok(ShardChild::from_parent(parent, child)?)
    }

    fn empty(&self) -> Self::Key {
        ShardChild::empty()
    }
}

#[derive(Debug, Clone)]
pub struct GrandchildColumns<R, C, G> {
    child: ChildColumns<R, C>,
    grandchild_column: String,
    _grandchild: PhantomData<fn() -> G>,
}

impl<R, C, G> GrandchildColumns<R, C, G> {
    pub fn new(child: ChildColumns<R, C>, grandchild_column: impl Into<String>) -> Self {
        GrandchildColumns {
            child,
            grandchild_column: grandchild_column.into(),
            _grandchild: PhantomData,
        }
    }
}

impl<S, R, C, G> KeyColumns<S> for GrandchildColumns<R, C, G>
where
    S: KeyComponent,
    R: KeyComponent,
    C: KeyComponent,
    G: KeyComponent,
{
    type Key = ShardGrandchild<S, R, C, G>;

    fn extract(&self, row: &Row<'_>, shard_id: Option<&S>) -> Result<Self::Key, SgError> {
        let child = self.child.extract(row, shard_id)?;
        let grandchild = row.get_as(&self.grandchild_column)?;
        Ok(ShardGrandchild::from_child(child, grandchild)?)
    }

    fn empty(&self) -> Self::Key {
        ShardGrandchild::empty()
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Reads one key from the first row; the empty key when there is no row.
pub struct KeyStep<K> {
    query: Query,
    parameters: Parameters,
    columns: K,
}

impl<K> KeyStep<K> {
    pub fn new(query: Query, parameters: Parameters, columns: K) -> Self {
        KeyStep { query, parameters, columns }
    }
}

impl<S, K> BatchStep<S, K::Key> for KeyStep<K>
where
    S: Sync,
    K: KeyColumns<S>,
{
    fn execute<'a>(
        &'a self,
        conn: &'a mut dyn DbConnection,
        ctx: StepContext<'a, S>,
    ) -> BoxFuture<'a, Result<K::Key, SgError>> {
        async move {
            let mut execution = execute_command(
                conn,
                &self.query,
                &self.parameters,
                ExecuteBehavior::SingleRow,
                ctx.shard_value,
                ctx.cancel,
            )
            .await?;
            match execution.reader.next_row() {
                Some(row) => self.columns.extract(&row, ctx.shard_id),
                None => Ok(self.columns.empty()),
            }
        }
        .boxed()
    }
}

/// Reads a key from every row of the first result set.
pub struct KeyListStep<K> {
    query: Query,
    parameters: Parameters,
    columns: K,
}

impl<K> KeyListStep<K> {
    pub fn new(query: Query, parameters: Parameters, columns: K) -> Self {
        KeyListStep { query, parameters, columns }
    }
}

impl<S, K> BatchStep<S, Vec<K::Key>> for KeyListStep<K>
where
    S: Sync,
    K: KeyColumns<S>,
{
    fn execute<'a>(
        &'a self,
        conn: &'a mut dyn DbConnection,
        ctx: StepContext<'a, S>,
    ) -> BoxFuture<'a, Result<Vec<K::Key>, SgError>> {
        async move {
            let mut execution = execute_command(
                conn,
                &self.query,
                &self.parameters,
                ExecuteBehavior::Default,
                ctx.shard_value,
                ctx.cancel,
            )
            .await?;
            let mut keys = Vec::new();
            while let Some(row) = execution.reader.next_row() {
                keys.push(self.columns.extract(&row, ctx.shard_id)?);
            }
            Ok(keys)
        }
        .boxed()
    }
}

type ModelHandler<S, R> =
    Arc<dyn Fn(Option<&S>, &mut Reader, &Parameters) -> Result<R, SgError> + Send + Sync>;

/// Builds a result from the raw reader with a caller-supplied handler.
pub struct ModelStep<S, R> {
    query: Query,
    parameters: Parameters,
    behavior: ExecuteBehavior,
    handler: ModelHandler<S, R>,
}

impl<S, R> ModelStep<S, R> {
    pub fn new<H>(query: Query, parameters: Parameters, handler: H) -> Self
    where
        H: Fn(Option<&S>, &mut Reader, &Parameters) -> Result<R, SgError> + Send + Sync + 'static,
    {
        ModelStep {
            query,
            parameters,
            behavior: ExecuteBehavior::Default,
            handler: Arc::new(handler),
        }
    }

    /// Hint the driver that only the first row is wanted.
    pub fn single_row(mut self) -> Self {
        self.behavior = ExecuteBehavior::SingleRow;
        self
    }
}

impl<S: Sync, R: Send> BatchStep<S, R> for ModelStep<S, R> {
    fn execute<'a>(
        &'a self,
        conn: &'a mut dyn DbConnection,
        ctx: StepContext<'a, S>,
    ) -> BoxFuture<'a, Result<R, SgError>> {
        async move {
            let mut execution = execute_command(
                conn,
                &self.query,
                &self.parameters,
                self.behavior,
                ctx.shard_value,
                ctx.cancel,
            )
            .await?;
            (*self.handler)(ctx.shard_id, &mut execution.reader, &execution.output)
        }
        .boxed()
    }
}

/// Returns the first output parameter, coerced to the batch result type.
pub struct ScalarStep {
    query: Query,
    parameters: Parameters,
}

impl ScalarStep {
    pub fn new(query: Query, parameters: Parameters) -> Self {
        ScalarStep { query, parameters }
    }
}

impl<S: Sync, T: FromValue + Send> BatchStep<S, T> for ScalarStep {
    fn execute<'a>(
        &'a self,
        conn: &'a mut dyn DbConnection,
        ctx: StepContext<'a, S>,
    ) -> BoxFuture<'a, Result<T, SgError>> {
        async move {
            let execution = execute_command(
                conn,
                &self.query,
                &self.parameters,
                ExecuteBehavior::Default,
                ctx.shard_value,
                ctx.cancel,
            )
            .await?;
            first_output(self.query.name(), &execution.output)
        }
        .boxed()
    }
}

/// Runs a command for its side effects and yields the default result.
pub struct CommandStep {
    query: Query,
    parameters: Parameters,
}

impl CommandStep {
    pub fn new(query: Query, parameters: Parameters) -> Self {
        CommandStep { query, parameters }
    }
}

impl<S: Sync, R: Default + Send> BatchStep<S, R> for CommandStep {
    fn execute<'a>(
        &'a self,
        conn: &'a mut dyn DbConnection,
        ctx: StepContext<'a, S>,
    ) -> BoxFuture<'a, Result<R, SgError>> {
        async move {
            execute_command(
                conn,
                &self.query,
                &self.parameters,
                ExecuteBehavior::Default,
                ctx.shard_value,
                ctx.cancel,
            )
            .await?;
            Ok(R::default())
        }
        .boxed()
    }
}
