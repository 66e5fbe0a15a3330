use tokio_util::sync::CancellationToken;

use sg_driver::DbConnection;
use sg_types::{SgError, Value};

use crate::step::{BatchStep, StepContext};

/// Ordered steps run on one connection inside one transaction.
///
/// The batch result starts as `R::default()`. Each step's result replaces
/// it unless that result equals `R::default()`, so the last step to return
/// something other than the default decides the outcome.
pub struct Batch<S, R> {
    name: String,
    steps: Vec<Box<dyn BatchStep<S, R>>>,
}

/// A batch for a non-sharded database.
pub type DatabaseBatch<R> = Batch<(), R>;

/// A batch run on a single shard.
pub type ShardBatch<S, R> = Batch<S, R>;

impl<S, R> Batch<S, R> {
    /// `name` keys the batch's resilience policy.
    pub fn new(name: impl Into<String>) -> Self {
        Batch { name: name.into(), steps: Vec::new() }
    }

    pub fn add(mut self, step: impl BatchStep<S, R> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: impl BatchStep<S, R> + 'static) -> &mut Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) async fn execute_steps(
        &self,
        conn: &mut dyn DbConnection,
        shard_id: Option<&S>,
        shard_value: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<R, SgError>
    where
        S: Sync,
        R: Default + PartialEq,
    {
        let mut result = R::default();
        for (index, step) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SgError::Cancelled);
            }
            let ctx = StepContext { shard_id, shard_value, cancel };
            let value = step.execute(&mut *conn, ctx).await.map_err(|err| {
                tracing::warn!(batch = %self.name, step = index, error = %err, "batch step failed");
                err
            })?;
            if value != R::default() {
                result = value;
            }
        }
        Ok(result)
    }
}

/// A batch run on every targeted shard of a shard set, each shard in its
/// own transaction on its write connection.
pub struct ShardSetBatch<S, R> {
    batch: Batch<S, R>,
}

impl<S, R> ShardSetBatch<S, R> {
    pub fn new(name: impl Into<String>) -> Self {
        ShardSetBatch { batch: Batch::new(name) }
    }

    pub fn add(mut self, step: impl BatchStep<S, R> + 'static) -> Self {
        self.batch.push(step);
        self
    }

    pub fn name(&self) -> &str {
        self.batch.name()
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub(crate) fn as_batch(&self) -> &Batch<S, R> {
        &self.batch
    }
}
