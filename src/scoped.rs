//! Temporary bindings on thread-local loggers.
//!
//! [`tmp_bind`] snapshots the calling thread's context, binds extra values
//! and hands back a guard. Whatever was bound through the guard, or through
//! any other logger sharing the same kind, is erased when the guard drops:
//! the mapping is cleared and refilled from the snapshot.
//!
//! Scopes nest per kind and thread. Leaving a scope also closes every scope
//! opened inside it, so guards dropped out of order still end with the
//! content from before the outermost one that was left.

use crate::context::{ContextKind, KindId};
use crate::errors::{ContextError, Result};
use crate::logger::{BoundLogger, ContextClass};
use crate::mapping::ContextMap;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;

thread_local! {
    // Number of open temporary bindings per kind on this thread.
    static OPEN_SCOPES: RefCell<HashMap<KindId, usize>> = RefCell::new(HashMap::new());
}

fn enter_scope(kind: KindId) -> usize {
    OPEN_SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        let open = scopes.entry(kind).or_insert(0);
        *open += 1;
        *open - 1
    })
}

/// Close the scope at `depth` together with everything nested in it.
///
/// Returns `None` if an enclosing scope already closed it, otherwise the
/// number of inner scopes that were still open.
fn leave_scope(kind: KindId, depth: usize) -> Option<usize> {
    OPEN_SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        let open = scopes.get(&kind).copied().unwrap_or(0);
        if depth >= open {
            return None;
        }
        if depth == 0 {
            scopes.remove(&kind);
        } else {
            scopes.insert(kind, depth);
        }
        Some(open - depth - 1)
    })
}

/// What the scoped binder needs from a logger.
pub trait Bindable: Sized {
    type Map: ContextMap;

    fn context_class(&self) -> ContextClass<Self::Map>;

    fn context_copy(&self) -> Self::Map;

    fn bind<I, K, V>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>;
}

impl<M: ContextMap> Bindable for BoundLogger<M> {
    type Map = M;

    fn context_class(&self) -> ContextClass<M> {
        BoundLogger::context_class(self)
    }

    fn context_copy(&self) -> M {
        BoundLogger::context_copy(self)
    }

    fn bind<I, K, V>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        BoundLogger::bind(self, values)
    }
}

/// Bind `values` on `logger` until the returned guard is dropped.
///
/// Fails before touching any state if the logger's context class is not
/// thread-local. Use the guard (it derefs to the bound logger) rather than
/// `logger` inside the scope.
pub fn tmp_bind<L, I, K, V>(logger: &L, values: I) -> Result<TmpBind<L>>
where
    L: Bindable,
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let class = logger.context_class();
    let kind = class
        .thread_local_kind()
        .ok_or_else(|| ContextError::Configuration {
            class: class.to_string(),
        })?;

    let saved = logger.context_copy();
    tracing::debug!(kind = %kind.id(), saved = saved.len(), "entering temporary binding");
    let restore = Restore {
        kind,
        depth: enter_scope(kind.id()),
        saved: Some(saved),
    };
    let logger = logger.bind(values);

    Ok(TmpBind {
        logger,
        _restore: restore,
        _not_send: PhantomData,
    })
}

/// Run `f` with a temporarily bound logger and restore afterwards.
///
/// The closure's own return value, `Result` or otherwise, is passed through
/// once the context has been restored. Restoration also runs if `f` panics.
pub fn with_tmp_bind<L, I, K, V, R>(logger: &L, values: I, f: impl FnOnce(&L) -> R) -> Result<R>
where
    L: Bindable,
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let tmp = tmp_bind(logger, values)?;
    Ok(f(&tmp))
}

/// Guard returned by [`tmp_bind`].
///
/// `!Send`: it must drop on the thread whose context it saved.
pub struct TmpBind<L: Bindable> {
    logger: L,
    _restore: Restore<L::Map>,
    _not_send: PhantomData<*const ()>,
}

impl<L: Bindable> TmpBind<L> {
    pub fn logger(&self) -> &L {
        &self.logger
    }
}

impl<L: Bindable> Deref for TmpBind<L> {
    type Target = L;

    fn deref(&self) -> &L {
        &self.logger
    }
}

struct Restore<M: ContextMap> {
    kind: ContextKind<M>,
    depth: usize,
    saved: Option<M>,
}

impl<M: ContextMap> Drop for Restore<M> {
    fn drop(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        match leave_scope(self.kind.id(), self.depth) {
            None => {
                tracing::debug!(kind = %self.kind.id(), depth = self.depth, "temporary binding already closed by an enclosing one");
            }
            Some(inner) => {
                if inner > 0 {
                    tracing::warn!(kind = %self.kind.id(), depth = self.depth, inner, "temporary binding left before its inner bindings");
                }
                tracing::debug!(kind = %self.kind.id(), restored = saved.len(), "leaving temporary binding");
                self.kind.restore(saved);
            }
        }
    }
}
