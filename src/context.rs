//! Context kinds whose state is global per thread.
//!
//! A [`ContextKind`] is a descriptor for one independent thread-local
//! context. Every [`ThreadLocalContext`] handle of that kind resolves, on the
//! calling thread, to the same backing mapping, which is created lazily on
//! first access and lives until the thread exits or
//! [`ContextKind::discard_thread_state`] is called. Other threads never see it.

use crate::errors::{ContextError, Result};
use crate::mapping::ContextMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use uuid::Uuid;

thread_local! {
    static SLOTS: RefCell<HashMap<KindId, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Identity of a context kind. Never reused within a process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KindId(Uuid);

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Create a new, independent thread-local context kind backed by `M`.
pub fn wrap_map<M: ContextMap>() -> ContextKind<M> {
    ContextKind::new()
}

// Values may be computed lazily from this very context, so they are drained
// before the mapping is borrowed for writing.
fn collect_values<I, K, V>(values: I) -> Vec<(String, Value)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    values
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Descriptor of one thread-local context kind.
///
/// Two kinds are equal only if one is a copy of the other; calling
/// [`ContextKind::new`] twice with the same `M` yields kinds that neither
/// compare equal nor share state.
pub struct ContextKind<M> {
    id: KindId,
    _map: PhantomData<fn() -> M>,
}

/// Positional argument of [`ContextKind::construct`].
pub enum Seed<'a, M: ContextMap> {
    None,
    Context(&'a ThreadLocalContext<M>),
    Map(&'a M),
}

impl<M: ContextMap> ContextKind<M> {
    // Every call yields a distinct kind, which `Default` would not suggest.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let kind = Self {
            id: KindId(Uuid::new_v4()),
            _map: PhantomData,
        };
        tracing::trace!(kind = %kind.id, "created thread-local context kind");
        kind
    }

    pub fn id(&self) -> KindId {
        self.id
    }

    pub fn name(&self) -> String {
        format!("ThreadLocalContext-{}", self.id)
    }

    /// A handle on this thread's context, leaving its contents untouched.
    pub fn context(&self) -> ThreadLocalContext<M> {
        ThreadLocalContext { kind: *self }
    }

    /// A handle after merging `values` into this thread's context.
    pub fn context_with<I, K, V>(&self, values: I) -> ThreadLocalContext<M>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.construct(Seed::None, values)
    }

    /// Build a handle the way a logger rebinds its context.
    ///
    /// A seed of this same kind already refers to the shared mapping, so only
    /// `values` are merged. Any other seed is merged first, then `values`.
    /// Existing thread state is never reset here.
    pub fn construct<I, K, V>(&self, seed: Seed<'_, M>, values: I) -> ThreadLocalContext<M>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let inherited = match seed {
            Seed::Context(ctx) if ctx.kind == *self => None,
            Seed::Context(ctx) => Some(ctx.entries()),
            Seed::Map(map) => Some(map.entries()),
            Seed::None => None,
        };
        let values = collect_values(values);
        self.with_mut(|map| {
            if let Some(entries) = inherited {
                map.update(entries);
            }
            map.update(values);
        });
        self.context()
    }

    /// Whether the calling thread has materialized its mapping yet.
    pub fn has_thread_state(&self) -> bool {
        SLOTS.with(|slots| slots.borrow().contains_key(&self.id))
    }

    /// Drop the calling thread's mapping; the next access starts empty.
    ///
    /// Returns `false` if there was nothing to drop.
    pub fn discard_thread_state(&self) -> bool {
        let removed = SLOTS.with(|slots| slots.borrow_mut().remove(&self.id));
        if removed.is_some() {
            tracing::trace!(kind = %self.id, "discarded thread-local context");
        }
        removed.is_some()
    }

    /// Replace this thread's contents with exactly `saved`.
    pub(crate) fn restore(&self, saved: M) {
        let entries = saved.entries();
        self.with_mut(|map| {
            map.clear();
            map.update(entries);
        });
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        let slot = self.slot();
        let map = slot.borrow();
        f(&map)
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let slot = self.slot();
        let mut map = slot.borrow_mut();
        f(&mut map)
    }

    fn slot(&self) -> Rc<RefCell<M>> {
        let slot = SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            let slot = slots.entry(self.id).or_insert_with(|| {
                tracing::trace!(kind = %self.id, "materialized thread-local context");
                Rc::new(RefCell::new(M::default())) as Rc<dyn Any>
            });
            Rc::clone(slot)
        });
        // A kind id is only ever paired with one mapping type.
        slot.downcast::<RefCell<M>>()
            .unwrap_or_else(|_| unreachable!("slot {} holds a foreign mapping type", self.id))
    }
}

impl<M> Clone for ContextKind<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for ContextKind<M> {}

impl<M, N> PartialEq<ContextKind<N>> for ContextKind<M> {
    fn eq(&self, other: &ContextKind<N>) -> bool {
        self.id == other.id
    }
}

impl<M> Eq for ContextKind<M> {}

impl<M> fmt::Debug for ContextKind<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKind").field("id", &self.id).finish()
    }
}

/// Handle on the calling thread's mapping for one context kind.
///
/// Handles own no data. Every method resolves the mapping of the thread it
/// runs on, so a handle moved to another thread sees that thread's state.
pub struct ThreadLocalContext<M> {
    kind: ContextKind<M>,
}

impl<M: ContextMap> ThreadLocalContext<M> {
    pub fn kind(&self) -> ContextKind<M> {
        self.kind
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.kind.with(|map| map.get(key).cloned())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.kind.with(|map| map.contains_key(key))
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let (key, value) = (key.into(), value.into());
        self.kind.with_mut(|map| map.insert(key, value))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.kind.with_mut(|map| map.remove(key))
    }

    /// Like [`remove`](Self::remove), but an absent key is an error.
    pub fn pop(&self, key: &str) -> Result<Value> {
        self.remove(key)
            .ok_or_else(|| ContextError::MissingKey(key.to_string()))
    }

    pub fn keys(&self) -> Vec<String> {
        self.kind.with(|map| map.keys())
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.kind.with(|map| map.entries())
    }

    pub fn len(&self) -> usize {
        self.kind.with(|map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// By-value snapshot, independent of later mutation.
    pub fn copy(&self) -> M {
        self.kind.with(|map| map.clone())
    }

    pub fn update<I, K, V>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = collect_values(values);
        self.kind.with_mut(|map| map.update(values))
    }

    pub fn clear(&self) {
        self.kind.with_mut(|map| map.clear())
    }

    pub fn to_json(&self) -> Value {
        self.kind.with(|map| map.to_json())
    }
}

impl<M> Clone for ThreadLocalContext<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for ThreadLocalContext<M> {}

// Same kind means same mapping, so contents are irrelevant.
impl<M, N> PartialEq<ThreadLocalContext<N>> for ThreadLocalContext<M> {
    fn eq(&self, other: &ThreadLocalContext<N>) -> bool {
        self.kind == other.kind
    }
}

impl<M> Eq for ThreadLocalContext<M> {}

impl<M: ContextMap> fmt::Display for ThreadLocalContext<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}({})>", self.kind.name(), self.to_json())
    }
}

impl<M: ContextMap> fmt::Debug for ThreadLocalContext<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<'a, M: ContextMap> IntoIterator for &'a ThreadLocalContext<M> {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys().into_iter()
    }
}

impl<M: ContextMap> Serialize for ThreadLocalContext<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries = self.entries();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in &entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;
    use std::thread;

    type JsonMap = Map<String, Value>;

    #[test]
    fn mapping_is_created_lazily() {
        let kind = wrap_map::<JsonMap>();
        let ctx = kind.context();
        assert!(!kind.has_thread_state());
        assert_eq!(ctx.len(), 0);
        assert!(kind.has_thread_state());
    }

    #[test]
    fn handles_of_one_kind_share_state() {
        let kind = wrap_map::<JsonMap>();
        let first = kind.context();
        let second = kind.context();
        assert_eq!(first, second);

        first.insert("a", 1);
        assert_eq!(second.get("a"), Some(json!(1)));
        second.insert("b", "x");
        assert_eq!(first.keys(), vec!["a", "b"]);
    }

    #[test]
    fn equality_ignores_contents() {
        let kind = wrap_map::<JsonMap>();
        let before = kind.context();
        let after = kind.context_with([("k", json!(true))]);
        assert_eq!(before, after);
        assert_eq!(kind, after.kind());
    }

    #[test]
    fn separate_kinds_are_distinct_and_isolated() {
        let one = wrap_map::<JsonMap>();
        let two = wrap_map::<JsonMap>();
        assert_ne!(one, two);
        assert_ne!(one.context(), two.context());
        assert_ne!(one.name(), two.name());

        one.context().insert("a", 1);
        assert!(!two.context().contains_key("a"));
    }

    #[test]
    fn kinds_over_different_mappings_never_compare_equal() {
        let json = wrap_map::<JsonMap>();
        let btree = wrap_map::<BTreeMap<String, Value>>();
        assert!(json.context() != btree.context());
    }

    #[test]
    fn construction_updates_instead_of_replacing() {
        let kind = wrap_map::<JsonMap>();
        kind.context_with([("a", 1)]);
        let ctx = kind.context_with([("b", 2)]);
        assert_eq!(ctx.to_json(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn same_kind_seed_only_merges_new_values() {
        let kind = wrap_map::<JsonMap>();
        let ctx = kind.context_with([("a", 1)]);
        let rebound = kind.construct(Seed::Context(&ctx), [("b", 2)]);
        assert_eq!(rebound, ctx);
        assert_eq!(ctx.to_json(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn foreign_seeds_are_merged_before_values() {
        let kind = wrap_map::<JsonMap>();
        let other = wrap_map::<JsonMap>();
        let foreign = other.context_with([("from", "other"), ("x", "old")]);

        let ctx = kind.construct(Seed::Context(&foreign), [("x", "new")]);
        assert_eq!(ctx.to_json(), json!({"from": "other", "x": "new"}));

        let mut seed = JsonMap::new();
        seed.insert("m".into(), json!(3));
        let ctx = kind.construct(Seed::Map(&seed), Vec::<(String, Value)>::new());
        assert_eq!(ctx.get("m"), Some(json!(3)));
        assert_eq!(foreign.len(), 2);
    }

    #[test]
    fn other_threads_see_their_own_mapping() {
        let kind = wrap_map::<JsonMap>();
        kind.context().insert("main", true);

        let seen = thread::spawn(move || {
            let ctx = kind.context();
            let inherited = ctx.get("main");
            ctx.insert("worker", true);
            (inherited, ctx.keys())
        })
        .join()
        .unwrap();

        assert_eq!(seen, (None, vec!["worker".to_string()]));
        assert_eq!(kind.context().keys(), vec!["main"]);
    }

    #[test]
    fn values_may_be_derived_lazily_from_the_same_context() {
        let kind = wrap_map::<JsonMap>();
        let ctx = kind.context_with([("a", 1), ("b", 2)]);

        let copies = ctx
            .keys()
            .into_iter()
            .map(|k| (format!("{k}_copy"), ctx.get(&k).unwrap_or_default()));
        kind.construct(Seed::Context(&ctx), copies);
        assert_eq!(
            ctx.to_json(),
            json!({"a": 1, "a_copy": 1, "b": 2, "b_copy": 2})
        );

        ctx.update(ctx.keys().into_iter().map(|k| (k, json!(ctx.len()))));
        assert_eq!(ctx.get("a"), Some(json!(4)));
    }

    #[test]
    fn copy_is_independent_of_later_mutation() {
        let kind = wrap_map::<JsonMap>();
        let ctx = kind.context_with([("a", 1)]);
        let snapshot = ctx.copy();
        ctx.insert("b", 2);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn pop_reports_missing_keys() {
        let kind = wrap_map::<JsonMap>();
        let ctx = kind.context_with([("a", 1)]);
        assert_eq!(ctx.pop("a"), Ok(json!(1)));
        assert_eq!(ctx.pop("a"), Err(ContextError::MissingKey("a".into())));
    }

    #[test]
    fn discarding_starts_over_with_an_empty_mapping() {
        let kind = wrap_map::<JsonMap>();
        let ctx = kind.context_with([("a", 1)]);
        assert!(kind.discard_thread_state());
        assert!(!kind.discard_thread_state());
        assert!(ctx.is_empty());
    }

    #[test]
    fn iteration_and_rendering_follow_current_contents() {
        let kind = wrap_map::<BTreeMap<String, Value>>();
        let ctx = kind.context_with([("b", json!(2)), ("a", json!(1))]);
        let keys: Vec<String> = (&ctx).into_iter().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(
            ctx.to_string(),
            format!("<{}({})>", kind.name(), r#"{"a":1,"b":2}"#)
        );
        assert_eq!(serde_json::to_value(ctx).unwrap(), json!({"a": 1, "b": 2}));
    }
}
