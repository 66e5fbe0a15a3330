use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sg_driver::{Command, ConnectionSpec, DbConnection, Driver, ExecuteBehavior, Execution, Query};
use sg_types::{FromRow, FromValue, Parameters, Reader, SgError, ToValue, Value};

use crate::batch::Batch;
use crate::circuit::CircuitState;
use crate::policy::ResiliencePolicy;
use crate::resilience::ResilienceConfig;

/// Executes queries against one database endpoint (a shard's read or write
/// side, or a non-sharded database).
///
/// Each call opens its own connection and closes it before returning.
/// Calls are wrapped in a per-operation [`ResiliencePolicy`], created on
/// first use and kept for the manager's lifetime.
pub struct ConnectionManager {
    name: String,
    spec: ConnectionSpec,
    driver: Arc<dyn Driver>,
    resilience: ResilienceConfig,
    shard: Option<Value>,
    policies: DashMap<String, Arc<ResiliencePolicy>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("name", &self.name)
            .field("driver", &self.driver.name())
            .field("connection_string", &self.spec.connection_string)
            .field("shard", &self.shard)
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
        spec: ConnectionSpec,
        resilience: ResilienceConfig,
    ) -> Self {
        ConnectionManager {
            name: name.into(),
            spec,
            driver,
            resilience,
            shard: None,
            policies: DashMap::new(),
        }
    }

    /// Bind this manager to a shard; its id fills each query's shard slot.
    pub fn with_shard<S: ToValue>(mut self, shard_id: &S) -> Self {
        self.shard = Some(shard_id.to_value());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_value(&self) -> Option<&Value> {
        self.shard.as_ref()
    }

    pub fn resilience(&self) -> &ResilienceConfig {
        &self.resilience
    }

    /// Policy for `operation`, created on first use.
    pub fn policy(&self, operation: &str) -> Arc<ResiliencePolicy> {
        if let Some(policy) = self.policies.get(operation) {
            return policy.value().clone();
        }
        self.policies
            .entry(operation.to_owned())
            .or_insert_with(|| Arc::new(ResiliencePolicy::new(operation, &self.resilience)))
            .value()
            .clone()
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Breaker state for `operation`, if it has ever run on this manager.
    pub fn circuit_state(&self, operation: &str) -> Option<CircuitState> {
        self.policies.get(operation).map(|p| p.circuit_state())
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Value of the first output parameter, coerced to `T`.
    pub async fn lookup_scalar<T: FromValue>(
        &self,
        query: &Query,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<T, SgError> {
        let execution = self.execute(query, parameters, ExecuteBehavior::Default, cancel).await?;
        first_output(query.name(), &execution.output)
    }

    /// Every row of the first result set, mapped through `T::from_row`.
    pub async fn list_all<T: FromRow>(
        &self,
        query: &Query,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, SgError> {
        let mut execution = self.execute(query, parameters, ExecuteBehavior::Default, cancel).await?;
        read_all(&mut execution.reader)
    }

    /// Hand the raw reader and output parameters to `handler`.
    pub async fn query_with_handler<T, H>(
        &self,
        query: &Query,
        parameters: &Parameters,
        behavior: ExecuteBehavior,
        cancel: &CancellationToken,
        handler: H,
    ) -> Result<T, SgError>
    where
        H: FnOnce(&mut Reader, &Parameters) -> Result<T, SgError>,
    {
        let mut execution = self.execute(query, parameters, behavior, cancel).await?;
        handler(&mut execution.reader, &execution.output)
    }

    /// Execute for side effects only.
    pub async fn run(
        &self,
        query: &Query,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<(), SgError> {
        self.execute(query, parameters, ExecuteBehavior::Default, cancel).await.map(drop)
    }

    /// Run every step of `batch` on one connection inside one transaction.
    ///
    /// Any step failure rolls the transaction back. A transient failure
    /// retries the whole batch under the batch's own policy.
    pub async fn run_batch<S, R>(
        &self,
        batch: &Batch<S, R>,
        shard_id: Option<&S>,
        cancel: &CancellationToken,
    ) -> Result<R, SgError>
    where
        S: Sync,
        R: Default + PartialEq + Send,
    {
        let policy = self.policy(batch.name());
        let started = Instant::now();
        let result = policy.run(cancel, || self.run_batch_once(batch, shard_id, cancel)).await;
        tracing::debug!(
            manager = %self.name,
            shard = ?self.shard,
            batch = batch.name(),
            steps = batch.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "batch completed"
        );
        result
    }

    async fn run_batch_once<S, R>(
        &self,
        batch: &Batch<S, R>,
        shard_id: Option<&S>,
        cancel: &CancellationToken,
    ) -> Result<R, SgError>
    where
        S: Sync,
        R: Default + PartialEq + Send,
    {
        if cancel.is_cancelled() {
            return Err(SgError::Cancelled);
        }
        let mut conn = self.driver.connect(&self.spec)?;
        let result: Result<R, SgError> = async {
            conn.open().await?;
            if cancel.is_cancelled() {
                return Err(SgError::Cancelled);
            }
            conn.begin().await?;
            let steps = batch.execute_steps(&mut *conn, shard_id, self.shard.as_ref(), cancel).await;
            match steps {
                Ok(value) => {
                    conn.commit().await?;
                    Ok(value)
                }
                Err(err) => {
                    rollback(conn.as_mut(), batch.name()).await;
                    Err(err)
                }
            }
        }
        .await;
        conn.close().await;
        result
    }

    async fn execute(
        &self,
        query: &Query,
        parameters: &Parameters,
        behavior: ExecuteBehavior,
        cancel: &CancellationToken,
    ) -> Result<Execution, SgError> {
        let policy = self.policy(query.name());
        let command = Command::bind(query, parameters, self.shard.as_ref());
        let started = Instant::now();
        let result = policy.run(cancel, || self.execute_once(&command, behavior, cancel)).await;
        tracing::debug!(
            manager = %self.name,
            shard = ?self.shard,
            operation = query.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "command completed"
        );
        result
    }

    async fn execute_once(
        &self,
        command: &Command,
        behavior: ExecuteBehavior,
        cancel: &CancellationToken,
    ) -> Result<Execution, SgError> {
        if cancel.is_cancelled() {
            return Err(SgError::Cancelled);
        }
        let mut conn = self.driver.connect(&self.spec)?;
        let result: Result<Execution, SgError> = async {
            conn.open().await?;
            if cancel.is_cancelled() {
                return Err(SgError::Cancelled);
            }
            Ok(conn.execute(command, behavior).await?)
        }
        .await;
        conn.close().await;

        let execution = result?;
        if cancel.is_cancelled() {
            return Err(SgError::Cancelled);
        }
        Ok(execution)
    }
}

async fn rollback(conn: &mut dyn DbConnection, batch: &str) {
    if let Err(err) = conn.rollback().await {
        tracing::warn!(batch, error = %err, "rollback failed");
    }
}

/// Coerce the first output parameter of `operation` to `T`.
pub(crate) fn first_output<T: FromValue>(operation: &str, output: &Parameters) -> Result<T, SgError> {
    let parameter = output
        .first_output()
        .ok_or_else(|| SgError::MissingOutput { operation: operation.to_owned() })?;
    T::from_value(&parameter.value).ok_or_else(|| {
        SgError::Mapping(format!(
            "output '{}' of '{}' holds {}, which does not convert to {}",
            parameter.name,
            operation,
            parameter.value.type_name(),
            std::any::type_name::<T>()
        ))
    })
}

/// Map every remaining row of the current result set.
pub(crate) fn read_all<T: FromRow>(reader: &mut Reader) -> Result<Vec<T>, SgError> {
    let mut rows = Vec::new();
    while let Some(row) = reader.next_row() {
        rows.push(T::from_row(&row)?);
    }
    Ok(rows)
}
