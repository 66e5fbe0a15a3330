use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use sg_driver::{ExecuteBehavior, Query};
use sg_keys::{merge_models, KeyComponent, KeyedModel, ShardKeyed, ShardsValues};
use sg_types::{FromRow, Parameters, Reader, SgError};

use crate::batch::{ShardBatch, ShardSetBatch};
use crate::manager::{read_all, ConnectionManager};

/// Bounds every shard id type satisfies.
pub trait ShardId: KeyComponent + Eq + Hash + Ord {}

impl<T: KeyComponent + Eq + Hash + Ord> ShardId for T {}

/// Which side of a shard a query goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Read,
    Write,
}

/// One shard: its id plus read and write connection managers. The two may
/// be the same manager.
#[derive(Debug, Clone)]
pub struct ShardInstance<S> {
    shard_id: S,
    read: Arc<ConnectionManager>,
    write: Arc<ConnectionManager>,
}

impl<S: ShardId> ShardInstance<S> {
    /// Either side falls back to the other when absent; at least one is
    /// required.
    pub fn new(
        shard_id: S,
        read: Option<Arc<ConnectionManager>>,
        write: Option<Arc<ConnectionManager>>,
    ) -> Result<Self, SgError> {
        let (read, write) = match (read, write) {
            (Some(read), Some(write)) => (read, write),
            (Some(read), None) => (read.clone(), read),
            (None, Some(write)) => (write.clone(), write),
            (None, None) => {
                return Err(SgError::Config(format!(
                    "shard {shard_id:?} has neither a read nor a write connection"
                )))
            }
        };
        Ok(ShardInstance { shard_id, read, write })
    }

    pub fn shard_id(&self) -> &S {
        &self.shard_id
    }

    pub fn read(&self) -> &ConnectionManager {
        &self.read
    }

    pub fn write(&self) -> &ConnectionManager {
        &self.write
    }

    pub fn manager(&self, access: Access) -> &ConnectionManager {
        match access {
            Access::Read => &self.read,
            Access::Write => &self.write,
        }
    }
}

/// A named collection of shards with an optional default shard.
#[derive(Debug)]
pub struct ShardSet<S> {
    name: String,
    shards: BTreeMap<S, ShardInstance<S>>,
    default_shard: Option<S>,
}

impl<S: ShardId> ShardSet<S> {
    pub fn new<I>(name: impl Into<String>, shards: I, default_shard: Option<S>) -> Result<Self, SgError>
    where
        I: IntoIterator<Item = ShardInstance<S>>,
    {
        let name = name.into();
        let mut map = BTreeMap::new();
        for shard in shards {
            let id = shard.shard_id.clone();
            if map.insert(id.clone(), shard).is_some() {
                return Err(SgError::Config(format!("shard set '{name}' lists shard {id:?} twice")));
            }
        }
        if let Some(default) = &default_shard {
            if !map.contains_key(default) {
                return Err(SgError::Config(format!(
                    "default shard {default:?} is not part of shard set '{name}'"
                )));
            }
        }
        Ok(ShardSet { name, shards: map, default_shard })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &S> {
        self.shards.keys()
    }

    pub fn shard(&self, shard_id: &S) -> Result<&ShardInstance<S>, SgError> {
        self.shards.get(shard_id).ok_or_else(|| unknown(shard_id))
    }

    pub fn default_shard(&self) -> Option<&ShardInstance<S>> {
        self.default_shard.as_ref().and_then(|id| self.shards.get(id))
    }

    /// Shards to visit with the parameter overrides for each, in shard id
    /// order. `None` targets every shard with no overrides.
    fn select<'a>(
        &'a self,
        targets: Option<&'a ShardsValues<S>>,
    ) -> Result<Vec<(&'a ShardInstance<S>, Option<&'a Parameters>)>, SgError> {
        let Some(targets) = targets else {
            return Ok(self.shards.values().map(|shard| (shard, None)).collect());
        };
        if let Some(missing) = targets.shard_ids().find(|id| !self.shards.contains_key(*id)) {
            return Err(unknown(missing));
        }
        Ok(self
            .shards
            .iter()
            .filter_map(|(id, shard)| targets.get(id).map(|params| (shard, Some(params))))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Run `query` on the targeted shards concurrently and hand each shard's
    /// reader to `handler`. Per-shard values in `targets` override
    /// `parameters`.
    ///
    /// All shards run to completion; the first failure in shard order is
    /// returned.
    pub async fn query_with_handler<T, H>(
        &self,
        access: Access,
        targets: Option<&ShardsValues<S>>,
        query: &Query,
        parameters: &Parameters,
        cancel: &CancellationToken,
        handler: H,
    ) -> Result<Vec<(S, T)>, SgError>
    where
        H: Fn(&S, &mut Reader, &Parameters) -> Result<T, SgError>,
    {
        let selected = self.select(targets)?;
        let handler = &handler;
        let calls = selected.into_iter().map(|(shard, overrides)| async move {
            let merged;
            let params = match overrides {
                Some(overrides) => {
                    merged = parameters.merged_with(overrides);
                    &merged
                }
                None => parameters,
            };
            let result = shard
                .manager(access)
                .query_with_handler(query, params, ExecuteBehavior::Default, cancel, |reader, output| {
                    handler(&shard.shard_id, reader, output)
                })
                .await;
            if let Err(err) = &result {
                tracing::warn!(
                    shard_set = %self.name,
                    shard = ?shard.shard_id,
                    operation = query.name(),
                    error = %err,
                    "shard query failed"
                );
            }
            result.map(|value| (shard.shard_id.clone(), value))
        });
        join_all(calls).await.into_iter().collect()
    }

    /// Rows from every targeted shard, concatenated in shard id order.
    pub async fn list_all<M: FromRow>(
        &self,
        access: Access,
        targets: Option<&ShardsValues<S>>,
        query: &Query,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<M>, SgError> {
        let per_shard = self
            .query_with_handler(access, targets, query, parameters, cancel, |_, reader, _| {
                read_all::<M>(reader)
            })
            .await?;
        Ok(per_shard.into_iter().flat_map(|(_, rows)| rows).collect())
    }

    /// Fetch the authoritative copies of records that live on other shards.
    ///
    /// `records` were read on `current`; any whose key points at another
    /// shard are re-read from those shards and swapped in. Replacements
    /// matching no record are appended when `append_unmatched` is set.
    pub async fn requery_foreign<M>(
        &self,
        current: &S,
        records: Vec<M>,
        query: &Query,
        parameters: &Parameters,
        append_unmatched: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<M>, SgError>
    where
        M: KeyedModel + FromRow + Clone,
        M::Key: ShardKeyed<Shard = S>,
    {
        let foreign = ShardsValues::shard_list_foreign(current, &records);
        if foreign.is_empty() {
            return Ok(records);
        }
        let replacements: Vec<M> = self
            .list_all(Access::Read, Some(&foreign), query, parameters, cancel)
            .await?;
        Ok(merge_models(records, replacements, append_unmatched))
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    /// Run `batch` on one shard's write connection.
    pub async fn run_batch<R>(
        &self,
        shard_id: &S,
        batch: &ShardBatch<S, R>,
        cancel: &CancellationToken,
    ) -> Result<R, SgError>
    where
        R: Default + PartialEq + Send,
    {
        self.shard(shard_id)?.write().run_batch(batch, Some(shard_id), cancel).await
    }

    /// Run `batch` on every targeted shard, one transaction per shard.
    /// Per-shard overrides in `targets` are not applied to batch steps.
    pub async fn run_set_batch<R>(
        &self,
        batch: &ShardSetBatch<S, R>,
        targets: Option<&ShardsValues<S>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(S, R)>, SgError>
    where
        R: Default + PartialEq + Send,
    {
        let selected = self.select(targets)?;
        let calls = selected.into_iter().map(|(shard, _)| async move {
            let result = shard.write().run_batch(batch.as_batch(), Some(&shard.shard_id), cancel).await;
            if let Err(err) = &result {
                tracing::warn!(
                    shard_set = %self.name,
                    shard = ?shard.shard_id,
                    batch = batch.name(),
                    error = %err,
                    "shard batch failed"
                );
            }
            result.map(|value| (shard.shard_id.clone(), value))
        });
        join_all(calls).await.into_iter().collect()
    }
}

fn unknown<S: Debug>(shard_id: &S) -> SgError {
    SgError::UnknownShard(format!("{shard_id:?}"))
}

#[cfg(test)]
mod tests {
    use sg_driver::{ConnectionSpec, Execution, MemDriver};
    use sg_keys::ShardKey;
    use sg_types::{DbError, ResultSet, Row, Value};

    use super::*;
    use crate::resilience::ResilienceConfig;
    use crate::step::CommandStep;

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        key: ShardKey<i16, i32>,
        status: String,
    }

    impl FromRow for Order {
        fn from_row(row: &Row<'_>) -> Result<Self, SgError> {
            Ok(Order {
                key: ShardKey::try_new('O', row.get_as("ShardId")?, row.get_as("OrderId")?)?,
                status: row.get_as("Status")?,
            })
        }
    }

    impl KeyedModel for Order {
        type Key = ShardKey<i16, i32>;

        fn key(&self) -> &Self::Key {
            &self.key
        }
    }

    fn order(shard: i16, id: i32, status: &str) -> Order {
        Order { key: ShardKey::new('O', shard, id), status: status.into() }
    }

    fn instance(driver: &MemDriver, shard: i16) -> ShardInstance<i16> {
        let manager = |side: &str| {
            Arc::new(
                ConnectionManager::new(
                    format!("orders-{shard}-{side}"),
                    Arc::new(driver.clone()),
                    ConnectionSpec::new(format!("mem://orders/{shard}/{side}")),
                    ResilienceConfig { retry_count: 0, ..Default::default() },
                )
                .with_shard(&shard),
            )
        };
        ShardInstance::new(shard, Some(manager("read")), Some(manager("write"))).unwrap()
    }

    fn shard_set(driver: &MemDriver) -> ShardSet<i16> {
        ShardSet::new("orders", (1..=3).map(|s| instance(driver, s)), Some(1)).unwrap()
    }

    /// Echoes the shard id and `@OrderId` (0 when unset) back as one order row.
    fn register_orders(driver: &MemDriver) {
        driver.on("ws.GetOrders", |call| {
            let shard = call.command.parameters.value("@ShardId").cloned().unwrap_or_default();
            let id = match call.command.parameters.value("@OrderId") {
                Some(id) if !id.is_null() => id.clone(),
                _ => Value::I32(0),
            };
            Ok(Execution::from_reader(Reader::new(vec![ResultSet::new(["ShardId", "OrderId", "Status"])
                .with_row(vec![shard, id, Value::from("fresh")])])))
        });
    }

    fn orders_query() -> Query {
        Query::procedure("ws.GetOrders")
            .with_parameters(["@ShardId", "@OrderId"])
            .with_shard_parameter("@ShardId")
    }

    #[tokio::test]
    async fn list_all_fans_out_in_shard_order() {
        let driver = MemDriver::new();
        register_orders(&driver);
        let set = shard_set(&driver);

        let orders: Vec<Order> = set
            .list_all(Access::Read, None, &orders_query(), &Parameters::new().with("@OrderId", 7), &CancellationToken::new())
            .await
            .unwrap();
        let shards: Vec<i16> = orders.iter().map(|o| *o.key.shard_id()).collect();
        assert_eq!(shards, [1, 2, 3]);
        assert!(driver.calls().iter().all(|c| c.connection_string.ends_with("/read")));
    }

    #[tokio::test]
    async fn targeted_fanout_applies_per_shard_values() {
        let driver = MemDriver::new();
        register_orders(&driver);
        let set = shard_set(&driver);

        let mut targets = ShardsValues::new();
        targets.add_value(3i16, "@OrderId", 30).add(2);
        let results = set
            .query_with_handler(
                Access::Write,
                Some(&targets),
                &orders_query(),
                &Parameters::new().with("@OrderId", 1),
                &CancellationToken::new(),
                |shard, reader, _| {
                    let row = reader.next_row().ok_or_else(|| SgError::Mapping("no row".into()))?;
                    Ok((*shard, row.get_as::<i32>("OrderId")?))
                },
            )
            .await
            .unwrap();
        assert_eq!(results, [(2, (2, 1)), (3, (3, 30))]);
        assert_eq!(driver.stats().executed, 2);
        assert!(driver.calls().iter().all(|c| c.connection_string.ends_with("/write")));
    }

    #[tokio::test]
    async fn unknown_target_is_rejected_before_any_call() {
        let driver = MemDriver::new();
        register_orders(&driver);
        let set = shard_set(&driver);
        let targets: ShardsValues<i16> = [1, 9].into_iter().collect();

        let err = set
            .list_all::<Order>(Access::Read, Some(&targets), &orders_query(), &Parameters::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SgError::UnknownShard(ref id) if id == "9"));
        assert_eq!(driver.stats().executed, 0);
    }

    #[tokio::test]
    async fn one_failing_shard_fails_the_fanout_after_all_complete() {
        let driver = MemDriver::new();
        driver.on("ws.GetOrders", |call| {
            if call.connection_string.contains("/2/") {
                Err(DbError::permanent("shard 2 offline"))
            } else {
                Ok(Execution::default())
            }
        });
        let set = shard_set(&driver);
        let err = set
            .list_all::<Order>(Access::Read, None, &orders_query(), &Parameters::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SgError::Database(_)));
        assert_eq!(driver.stats().executed, 3);
    }

    #[tokio::test]
    async fn requery_foreign_replaces_remote_records() {
        let driver = MemDriver::new();
        register_orders(&driver);
        let set = shard_set(&driver);

        let local = vec![order(1, 0, "local"), order(3, 0, "stale"), order(1, 5, "local")];
        let merged = set
            .requery_foreign(&1, local, &orders_query(), &Parameters::new(), false, &CancellationToken::new())
            .await
            .unwrap();
        let statuses: Vec<_> = merged.iter().map(|o| o.status.as_str()).collect();
        assert_eq!(statuses, ["local", "fresh", "local"]);
        assert_eq!(driver.stats().executed, 1);

        let untouched = set
            .requery_foreign(&1, vec![order(1, 1, "local")], &orders_query(), &Parameters::new(), true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(untouched, [order(1, 1, "local")]);
        assert_eq!(driver.stats().executed, 1);
    }

    #[tokio::test]
    async fn set_batch_runs_one_transaction_per_shard() {
        let driver = MemDriver::new();
        driver.on("ws.Purge", |call| {
            assert!(call.in_transaction);
            Ok(Execution::default())
        });
        let set = shard_set(&driver);
        let batch: ShardSetBatch<i16, u32> =
            ShardSetBatch::new("purge").add(CommandStep::new(Query::procedure("ws.Purge"), Parameters::new()));

        let results = set.run_set_batch(&batch, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(results, [(1, 0), (2, 0), (3, 0)]);
        let stats = driver.stats();
        assert_eq!((stats.begun, stats.committed, stats.closed), (3, 3, 3));
        assert!(driver.calls().iter().all(|c| c.connection_string.ends_with("/write")));
    }

    #[tokio::test]
    async fn single_shard_batch_and_lookup() {
        let driver = MemDriver::new();
        driver.on("ws.Touch", |_| Ok(Execution::default()));
        let set = shard_set(&driver);
        let batch: ShardBatch<i16, u8> =
            ShardBatch::new("touch").add(CommandStep::new(Query::procedure("ws.Touch"), Parameters::new()));

        set.run_batch(&2, &batch, &CancellationToken::new()).await.unwrap();
        assert_eq!(driver.calls()[0].connection_string, "mem://orders/2/write");
        assert!(matches!(
            set.run_batch(&8, &batch, &CancellationToken::new()).await,
            Err(SgError::UnknownShard(_))
        ));
        assert_eq!(set.default_shard().map(|s| *s.shard_id()), Some(1));
    }

    #[test]
    fn construction_rules() {
        let driver = MemDriver::new();
        assert!(matches!(ShardInstance::<i16>::new(1, None, None), Err(SgError::Config(_))));

        let read_only = {
            let mgr = Arc::new(ConnectionManager::new(
                "r",
                Arc::new(driver.clone()),
                ConnectionSpec::new("mem://r"),
                ResilienceConfig::default(),
            ));
            ShardInstance::new(1i16, Some(mgr), None).unwrap()
        };
        assert_eq!(read_only.write().name(), "r");

        let dup = ShardSet::new("x", [instance(&driver, 1), instance(&driver, 1)], None);
        assert!(matches!(dup, Err(SgError::Config(_))));
        let bad_default = ShardSet::new("x", [instance(&driver, 1)], Some(2));
        assert!(matches!(bad_default, Err(SgError::Config(_))));
    }
}
