use std::collections::HashMap;
use std::hash::Hash;

use sg_types::{Parameters, Value};

use crate::shard_key::{KeyedModel, ShardKeyed};

/// Per-shard parameter buckets, used to collect "also query these shards
/// with these values" requests before a fan-out.
#[derive(Debug, Clone)]
pub struct ShardsValues<S> {
    shards: HashMap<S, Parameters>,
}

impl<S> Default for ShardsValues<S> {
    fn default() -> Self {
        ShardsValues { shards: HashMap::new() }
    }
}

impl<S: Eq + Hash + Clone> ShardsValues<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a bucket exists for `shard_id`.
    pub fn add(&mut self, shard_id: S) -> &mut Self {
        self.shards.entry(shard_id).or_default();
        self
    }

    /// Set `name = value` in the bucket for `shard_id`, creating the bucket
    /// on first use.
    pub fn add_value(
        &mut self,
        shard_id: S,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.shards.entry(shard_id).or_default().set(name, value);
        self
    }

    /// Union of shard ids. A shard already present keeps its own bucket;
    /// the incoming bucket for that shard is ignored.
    pub fn merge(&mut self, other: &ShardsValues<S>) -> &mut Self {
        for (shard_id, params) in &other.shards {
            if !self.shards.contains_key(shard_id) {
                self.shards.insert(shard_id.clone(), params.clone());
            }
        }
        self
    }

    pub fn merge_shards<I: IntoIterator<Item = S>>(&mut self, shard_ids: I) -> &mut Self {
        for shard_id in shard_ids {
            self.add(shard_id);
        }
        self
    }

    /// Distinct shards referenced by `records`, excluding `excluded`.
    pub fn shard_list_foreign<M>(excluded: &S, records: &[M]) -> Self
    where
        M: KeyedModel,
        M::Key: ShardKeyed<Shard = S>,
    {
        let mut result = Self::new();
        for record in records {
            let shard_id = record.key().shard_id();
            if shard_id != excluded {
                result.add(shard_id.clone());
            }
        }
        result
    }

    pub fn contains(&self, shard_id: &S) -> bool {
        self.shards.contains_key(shard_id)
    }

    pub fn get(&self, shard_id: &S) -> Option<&Parameters> {
        self.shards.get(shard_id)
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &S> {
        self.shards.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&S, &Parameters)> {
        self.shards.iter()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl<S: Eq + Hash + Clone> FromIterator<S> for ShardsValues<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut values = Self::new();
        values.merge_shards(iter);
        values
    }
}

/// Replace every `master` record whose key matches a replacement (first
/// match wins). With `append_unmatched`, replacements that matched no master
/// record are appended in their original order.
pub fn merge_models<M>(master: Vec<M>, replacements: Vec<M>, append_unmatched: bool) -> Vec<M>
where
    M: KeyedModel + Clone,
{
    let mut used = vec![false; replacements.len()];
    let mut merged: Vec<M> = master
        .into_iter()
        .map(|record| {
            match replacements.iter().position(|r| r.key() == record.key()) {
                Some(i) => {
                    used[i] = true;
                    replacements[i].clone()
                }
                None => record,
            }
        })
        .collect();

    if append_unmatched {
        merged.extend(
            replacements
                .into_iter()
                .zip(used)
                .filter(|(_, used)| !used)
                .map(|(r, _)| r),
        );
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard_key::ShardKey;

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        key: ShardKey<i16, i32>,
        customer: ShardKey<i16, i32>,
        note: &'static str,
    }

    impl KeyedModel for Order {
        type Key = ShardKey<i16, i32>;

        fn key(&self) -> &Self::Key {
            &self.key
        }
    }

    fn order(shard: i16, id: i32, note: &'static str) -> Order {
        Order {
            key: ShardKey::new('O', shard, id),
            customer: ShardKey::new('C', shard, id * 10),
            note,
        }
    }

    #[test]
    fn add_is_idempotent_per_shard() {
        let mut values = ShardsValues::new();
        values.add(1i16).add(1).add_value(2, "@Id", 5).add_value(2, "@Name", "x");
        assert_eq!(values.len(), 2);
        assert!(values.get(&1).unwrap().is_empty());
        assert_eq!(values.get(&2).unwrap().len(), 2);
    }

    #[test]
    fn merge_keeps_existing_buckets() {
        let mut mine = ShardsValues::new();
        mine.add_value(1i16, "@Id", 1);
        let mut theirs = ShardsValues::new();
        theirs.add_value(1i16, "@Id", 99).add_value(3, "@Id", 3);

        mine.merge(&theirs);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine.get(&1).unwrap().value("@Id"), Some(&Value::I32(1)));
        assert_eq!(mine.get(&3).unwrap().value("@Id"), Some(&Value::I32(3)));

        mine.merge_shards([3, 4]);
        assert_eq!(mine.len(), 3);
        assert_eq!(mine.get(&3).unwrap().len(), 1);
    }

    #[test]
    fn foreign_list_excludes_current_and_dedups() {
        let records = vec![order(1, 1, ""), order(2, 2, ""), order(2, 3, ""), order(4, 4, "")];
        let foreign = ShardsValues::shard_list_foreign(&1i16, &records);
        let mut ids: Vec<i16> = foreign.shard_ids().copied().collect();
        ids.sort_unstable();
        assert_eq!(ids, [2, 4]);

        let customers: Vec<_> = records.iter().map(|o| o.customer.clone()).collect();
        let foreign = ShardsValues::shard_list_foreign(&4i16, &customers);
        assert!(!foreign.contains(&4));
        assert_eq!(foreign.len(), 2);
    }

    #[test]
    fn merge_models_preserves_master_shape() {
        let master = vec![order(1, 1, "a"), order(2, 2, "b"), order(3, 3, "c")];
        let replacements = vec![order(3, 3, "C"), order(9, 9, "new"), order(2, 2, "B")];

        let merged = merge_models(master.clone(), replacements.clone(), false);
        let notes: Vec<_> = merged.iter().map(|o| o.note).collect();
        assert_eq!(notes, ["a", "B", "C"]);

        let merged = merge_models(master, replacements, true);
        let notes: Vec<_> = merged.iter().map(|o| o.note).collect();
        assert_eq!(notes, ["a", "B", "C", "new"]);
    }

    #[test]
    fn first_matching_replacement_wins() {
        let master = vec![order(1, 1, "a")];
        let replacements = vec![order(1, 1, "first"), order(1, 1, "second")];
        let merged = merge_models(master, replacements, true);
        let notes: Vec<_> = merged.iter().map(|o| o.note).collect();
        assert_eq!(notes, ["first", "second"]);
    }
}
