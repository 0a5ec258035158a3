use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::context::RequestContext;
use crate::error::HydrateError;
use crate::types::{ReadRouting, RowValues};

/// A foreign-key value relations batch on.
pub trait RelationKey: Clone + Eq + Hash + Ord + Send + Sync + Debug + 'static {
    fn to_param(&self) -> RowValues;
}

impl RelationKey for String {
    fn to_param(&self) -> RowValues {
        RowValues::Text(self.clone())
    }
}

impl RelationKey for i64 {
    fn to_param(&self) -> RowValues {
        RowValues::Int(*self)
    }
}

/// Mutation produced by a relation fetch, applied to the primary records after every fetch has
/// joined.
pub type Patch<T> = Box<dyn FnOnce(&mut [T]) + Send>;

/// The in-flight part of one relation: fetch then build its patch.
pub type PendingPatch<T> = BoxFuture<'static, Result<Patch<T>, HydrateError>>;

/// One relation of an entity. Implemented by [`RelationTask`]; the trait exists so a spec can
/// hold relations with different key and related types.
pub trait Relation<T>: Send + Sync {
    /// Name of the one field this relation writes.
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    /// Entity a nested fetch of this relation queries, if it runs a nested spec.
    fn nests(&self) -> Option<&'static str> {
        None
    }

    /// # Errors
    /// `ConfigError` when a required callback was never supplied.
    fn validate(&self) -> Result<(), HydrateError>;

    /// Collect the distinct keys of `records` and, unless there are none, return the fetch.
    fn prepare(&self, ctx: &RequestContext, records: &[T]) -> Option<PendingPatch<T>>;
}

type KeysFn<T, K> = Arc<dyn Fn(&T) -> Vec<K> + Send + Sync>;
type FetchFn<K, R> =
    Arc<dyn Fn(RequestContext, Vec<K>) -> BoxFuture<'static, Result<Vec<R>, HydrateError>> + Send + Sync>;
type AttachFn<T, R> = Arc<dyn Fn(&mut T, Vec<R>) + Send + Sync>;

/// Batched relation: collect keys from the primary records, fetch the related rows in one
/// statement (or one nested query), and attach each related row to every record sharing its key.
///
/// ```rust,no_run
/// use sql_hydrate::prelude::*;
///
/// #[derive(Clone)]
/// struct Tracking { purchase_order_id: String }
/// struct Order { id: String, trackings: Vec<Tracking> }
///
/// let include_trackings = true;
/// let trackings = RelationTask::<Order, String, Tracking>::new("trackings", include_trackings)
///     .key(|order| Some(order.id.clone()))
///     .fetch(|_ctx, _ids| async move { Ok(Vec::new()) })
///     .match_on(|t| t.purchase_order_id.clone())
///     .attach(|order, found| order.trackings = found);
/// # let _ = trackings;
/// ```
pub struct RelationTask<T, K, R> {
    name: &'static str,
    enabled: bool,
    routing: Option<ReadRouting>,
    nests: Option<&'static str>,
    keys: Option<KeysFn<T, K>>,
    fetch: Option<FetchFn<K, R>>,
    match_on: Option<KeysFn<R, K>>,
    attach: Option<AttachFn<T, R>>,
}

impl<T, K, R> RelationTask<T, K, R>
where
    T: Send + 'static,
    K: RelationKey,
    R: Clone + Send + Sync + 'static,
{
    /// `name` is the field this relation fills; `enabled` is usually an `Include*` option.
    #[must_use]
    pub fn new(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            routing: None,
            nests: None,
            keys: None,
            fetch: None,
            match_on: None,
            attach: None,
        }
    }

    /// Keys a record references; duplicates across records are collapsed before fetching.
    #[must_use]
    pub fn keys<F>(mut self, keys: F) -> Self
    where
        F: Fn(&T) -> Vec<K> + Send + Sync + 'static,
    {
        self.keys = Some(Arc::new(keys));
        self
    }

    /// Single optional key per record.
    #[must_use]
    pub fn key<F>(self, key: F) -> Self
    where
        F: Fn(&T) -> Option<K> + Send + Sync + 'static,
    {
        self.keys(move |record| key(record).into_iter().collect())
    }

    #[must_use]
    pub fn fetch<F, Fut>(mut self, fetch: F) -> Self
    where
        F: Fn(RequestContext, Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>, HydrateError>> + Send + 'static,
    {
        self.fetch = Some(Arc::new(move |ctx, keys| fetch(ctx, keys).boxed()));
        self
    }

    /// Key a fetched row answers to.
    #[must_use]
    pub fn match_on<F>(self, key: F) -> Self
    where
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.match_any(move |related| vec![key(related)])
    }

    /// Keys a fetched row answers to, for rows reachable through more than one key.
    #[must_use]
    pub fn match_any<F>(mut self, keys: F) -> Self
    where
        F: Fn(&R) -> Vec<K> + Send + Sync + 'static,
    {
        self.match_on = Some(Arc::new(keys));
        self
    }

    /// Store the rows matched to a record. Only called for records with at least one match.
    #[must_use]
    pub fn attach<F>(mut self, attach: F) -> Self
    where
        F: Fn(&mut T, Vec<R>) + Send + Sync + 'static,
    {
        self.attach = Some(Arc::new(attach));
        self
    }

    /// Route this relation's statements to `routing` instead of the request's tier.
    #[must_use]
    pub fn routing(mut self, routing: ReadRouting) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Declare that the fetch runs a nested spec over `entity`.
    #[must_use]
    pub fn nests(mut self, entity: &'static str) -> Self {
        self.nests = Some(entity);
        self
    }

    #[must_use]
    pub fn into_relation(self) -> Arc<dyn Relation<T>> {
        Arc::new(self)
    }
}

/// Distinct keys plus, for each key, the records referencing it.
pub(crate) fn index_keys<T, K: RelationKey>(
    records: &[T],
    keys: impl Fn(&T) -> Vec<K>,
) -> (Vec<K>, HashMap<K, Vec<usize>>) {
    let mut distinct = BTreeSet::new();
    let mut index: HashMap<K, Vec<usize>> = HashMap::new();
    for (position, record) in records.iter().enumerate() {
        for key in keys(record) {
            let positions = index.entry(key.clone()).or_default();
            if positions.last() != Some(&position) {
                positions.push(position);
            }
            distinct.insert(key);
        }
    }
    (distinct.into_iter().collect(), index)
}

/// For each record position, indices of the fetched rows it matches, in fetched order.
pub(crate) fn match_rows<R, K: RelationKey>(
    index: &HashMap<K, Vec<usize>>,
    related: &[R],
    keys: impl Fn(&R) -> Vec<K>,
) -> Vec<(usize, Vec<usize>)> {
    let mut matches: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    for (row, item) in related.iter().enumerate() {
        for key in keys(item) {
            if let Some(positions) = index.get(&key) {
                for position in positions {
                    matches.entry(*position).or_default().insert(row);
                }
            }
        }
    }
    let mut matches: Vec<(usize, Vec<usize>)> = matches
        .into_iter()
        .map(|(position, rows)| (position, rows.into_iter().collect()))
        .collect();
    matches.sort_unstable_by_key(|(position, _)| *position);
    matches
}

impl<T, K, R> Relation<T> for RelationTask<T, K, R>
where
    T: Send + 'static,
    K: RelationKey,
    R: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn nests(&self) -> Option<&'static str> {
        self.nests
    }

    fn validate(&self) -> Result<(), HydrateError> {
        let missing = [
            ("keys", self.keys.is_none()),
            ("fetch", self.fetch.is_none()),
            ("match_on", self.match_on.is_none()),
            ("attach", self.attach.is_none()),
        ]
        .into_iter()
        .filter_map(|(part, is_missing)| is_missing.then_some(part))
        .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HydrateError::ConfigError(format!(
                "relation `{}` is missing {}",
                self.name,
                missing.join(", ")
            )))
        }
    }

    fn prepare(&self, ctx: &RequestContext, records: &[T]) -> Option<PendingPatch<T>> {
        let (Some(keys), Some(fetch), Some(match_on), Some(attach)) =
            (&self.keys, &self.fetch, &self.match_on, &self.attach)
        else {
            return None;
        };
        let (distinct, index) = index_keys(records, |record| keys(record));
        if distinct.is_empty() {
            return None;
        }

        let ctx = match self.routing {
            Some(routing) => ctx.clone().with_routing(routing),
            None => ctx.clone(),
        };
        let fetched = fetch(ctx, distinct);
        let match_on = Arc::clone(match_on);
        let attach = Arc::clone(attach);
        let relation = self.name;
        Some(
            async move {
                let related = fetched.await.map_err(|e| HydrateError::RelationError {
                    relation,
                    source: Box::new(e),
                })?;
                let matches = match_rows(&index, &related, |item| match_on(item));
                let patch: Patch<T> = Box::new(move |records: &mut [T]| {
                    for (position, rows) in matches {
                        if let Some(record) = records.get_mut(position) {
                            attach(record, rows.iter().map(|row| related[*row].clone()).collect());
                        }
                    }
                });
                Ok(patch)
            }
            .boxed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deduplicated_and_indexed() {
        let records = vec!["A", "A", "B"];
        let (distinct, index) = index_keys(&records, |r| vec![(*r).to_string()]);
        assert_eq!(distinct, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(index["A"], vec![0, 1]);
        assert_eq!(index["B"], vec![2]);
    }

    #[test]
    fn repeated_keys_within_one_record_index_it_once() {
        let records = vec![vec![1_i64, 1, 2]];
        let (distinct, index) = index_keys(&records, |r: &Vec<i64>| r.clone());
        assert_eq!(distinct, vec![1, 2]);
        assert_eq!(index[&1], vec![0]);
    }

    #[test]
    fn rows_match_every_record_sharing_a_key() {
        let records = vec![Some(1_i64), Some(1), Some(2), None];
        let (_, index) = index_keys(&records, |r: &Option<i64>| r.iter().copied().collect::<Vec<i64>>());
        let related = vec![(2_i64, "two"), (1, "one"), (3, "three")];
        let matches = match_rows(&index, &related, |(k, _)| vec![*k]);
        assert_eq!(matches, vec![(0, vec![1]), (1, vec![1]), (2, vec![0])]);
    }

    #[test]
    fn missing_callbacks_fail_validation() {
        let task = RelationTask::<String, String, String>::new("items", true)
            .key(|s| Some(s.clone()));
        let err = task.validate().unwrap_err();
        assert!(matches!(err, HydrateError::ConfigError(ref m) if m.contains("fetch")));
    }
}
