use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A string-keyed mapping that can back a thread-local context.
///
/// One value of the implementing type is created per thread (with
/// `Default::default()`) the first time a context of a given kind is touched
/// there. The provided methods build the update/seed semantics on top of the
/// handful of primitives an implementation has to supply.
pub trait ContextMap: Default + Clone + fmt::Debug + 'static {
    fn get(&self, key: &str) -> Option<&Value>;
    fn insert(&mut self, key: String, value: Value) -> Option<Value>;
    fn remove(&mut self, key: &str) -> Option<Value>;
    fn len(&self) -> usize;
    fn clear(&mut self);
    /// Keys in the mapping's own iteration order.
    fn keys(&self) -> Vec<String>;
    fn entries(&self) -> Vec<(String, Value)>;

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge `values` into the mapping, overwriting existing keys.
    fn update<I, K, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in values {
            self.insert(key.into(), value.into());
        }
    }

    fn to_json(&self) -> Value {
        Value::Object(self.entries().into_iter().collect())
    }
}

macro_rules! impl_context_map {
    ($ty:ty) => {
        impl ContextMap for $ty {
            fn get(&self, key: &str) -> Option<&Value> {
                <$ty>::get(self, key)
            }

            fn insert(&mut self, key: String, value: Value) -> Option<Value> {
                <$ty>::insert(self, key, value)
            }

            fn remove(&mut self, key: &str) -> Option<Value> {
                <$ty>::remove(self, key)
            }

            fn len(&self) -> usize {
                <$ty>::len(self)
            }

            fn clear(&mut self) {
                <$ty>::clear(self)
            }

            fn keys(&self) -> Vec<String> {
                <$ty>::keys(self).cloned().collect()
            }

            fn entries(&self) -> Vec<(String, Value)> {
                <$ty>::iter(self)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
        }
    };
}

impl_context_map!(Map<String, Value>);
impl_context_map!(BTreeMap<String, Value>);
impl_context_map!(HashMap<String, Value>);
