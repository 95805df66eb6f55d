//! Minimal bound logger that carries a context into `tracing` events.

use crate::context::{ContextKind, Seed, ThreadLocalContext};
use crate::errors::{ContextError, Result};
use crate::mapping::ContextMap;
use itertools::Itertools;
use serde_json::{Map, Value};
use std::fmt;

pub type JsonMap = Map<String, Value>;

/// How a logger represents its context.
pub enum ContextClass<M> {
    /// An ordinary mapping owned by each logger.
    Plain,
    /// A thread-local mapping shared by every logger of the kind.
    ThreadLocal(ContextKind<M>),
}

impl<M: ContextMap> ContextClass<M> {
    pub fn thread_local_kind(&self) -> Option<ContextKind<M>> {
        match self {
            ContextClass::Plain => None,
            ContextClass::ThreadLocal(kind) => Some(*kind),
        }
    }

    pub fn instantiate(&self) -> Context<M> {
        match self {
            ContextClass::Plain => Context::Plain(M::default()),
            ContextClass::ThreadLocal(kind) => Context::ThreadLocal(kind.context()),
        }
    }
}

impl<M> Clone for ContextClass<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for ContextClass<M> {}

impl<M: ContextMap> fmt::Display for ContextClass<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextClass::Plain => write!(f, "{}", std::any::type_name::<M>()),
            ContextClass::ThreadLocal(kind) => write!(f, "{}", kind.name()),
        }
    }
}

impl<M: ContextMap> fmt::Debug for ContextClass<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A logger's live context.
#[derive(Clone, Debug)]
pub enum Context<M: ContextMap> {
    Plain(M),
    ThreadLocal(ThreadLocalContext<M>),
}

impl<M: ContextMap> Context<M> {
    pub fn class(&self) -> ContextClass<M> {
        match self {
            Context::Plain(_) => ContextClass::Plain,
            Context::ThreadLocal(ctx) => ContextClass::ThreadLocal(ctx.kind()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Context::Plain(map) => map.get(key).cloned(),
            Context::ThreadLocal(ctx) => ctx.get(key),
        }
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        match self {
            Context::Plain(map) => map.entries(),
            Context::ThreadLocal(ctx) => ctx.entries(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Context::Plain(map) => map.len(),
            Context::ThreadLocal(ctx) => ctx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// By-value copy of the current contents.
    pub fn copy(&self) -> M {
        match self {
            Context::Plain(map) => map.clone(),
            Context::ThreadLocal(ctx) => ctx.copy(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Context::Plain(map) => map.to_json(),
            Context::ThreadLocal(ctx) => ctx.to_json(),
        }
    }

    fn rebind<I, K, V>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        match self {
            Context::Plain(map) => {
                let mut map = map.clone();
                map.update(values);
                Context::Plain(map)
            }
            Context::ThreadLocal(ctx) => {
                Context::ThreadLocal(ctx.kind().construct(Seed::Context(ctx), values))
            }
        }
    }
}

/// `key=value` pairs separated by spaces.
impl<M: ContextMap> fmt::Display for Context<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .entries()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join(" ");
        f.write_str(&rendered)
    }
}

/// Logger with a bound context. Binding returns a new logger; with a
/// thread-local context class the new and the old logger share state.
#[derive(Clone, Debug)]
pub struct BoundLogger<M: ContextMap = JsonMap> {
    context: Context<M>,
}

impl<M: ContextMap> BoundLogger<M> {
    pub fn wrap(class: ContextClass<M>) -> Self {
        Self {
            context: class.instantiate(),
        }
    }

    pub fn context(&self) -> &Context<M> {
        &self.context
    }

    /// The context class in use. Inspecting it has no side effects.
    pub fn context_class(&self) -> ContextClass<M> {
        self.context.class()
    }

    pub fn context_copy(&self) -> M {
        self.context.copy()
    }

    pub fn bind<I, K, V>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            context: self.context.rebind(values),
        }
    }

    /// Clear the context, then bind `values`.
    pub fn new<I, K, V>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let context = match &self.context {
            Context::Plain(_) => Context::Plain(M::default()),
            Context::ThreadLocal(ctx) => {
                ctx.clear();
                Context::ThreadLocal(*ctx)
            }
        };
        Self {
            context: context.rebind(values),
        }
    }

    /// Remove `keys`. Fails without touching the context if any is absent.
    pub fn unbind(&self, keys: &[&str]) -> Result<Self> {
        if let Some(missing) = keys.iter().find(|key| self.context.get(key).is_none()) {
            return Err(ContextError::MissingKey(missing.to_string()));
        }
        let context = match &self.context {
            Context::Plain(map) => {
                let mut map = map.clone();
                for key in keys {
                    map.remove(key);
                }
                Context::Plain(map)
            }
            Context::ThreadLocal(ctx) => {
                for key in keys {
                    ctx.remove(key);
                }
                Context::ThreadLocal(*ctx)
            }
        };
        Ok(Self { context })
    }

    pub fn msg(&self, event: &str) {
        self.info(event)
    }

    pub fn debug(&self, event: &str) {
        tracing::debug!(context = %self.context, "{event}");
    }

    pub fn info(&self, event: &str) {
        tracing::info!(context = %self.context, "{event}");
    }

    pub fn warn(&self, event: &str) {
        tracing::warn!(context = %self.context, "{event}");
    }

    pub fn error(&self, event: &str) {
        tracing::error!(context = %self.context, "{event}");
    }
}
