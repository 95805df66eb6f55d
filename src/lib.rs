pub mod errors;
pub mod mapping;
pub mod context;    // thread-local context kinds and handles
pub mod logger;     // bound logger collaborator
pub mod scoped;

pub use context::{wrap_map, ContextKind, KindId, Seed, ThreadLocalContext};
pub use errors::{ContextError, Result};
pub use logger::{BoundLogger, Context, ContextClass, JsonMap};
pub use mapping::ContextMap;
pub use scoped::{tmp_bind, with_tmp_bind, Bindable, TmpBind};

use serde_json::Value;

/// Convenience: a logger whose context lives in a fresh thread-local kind.
pub fn thread_local_logger() -> BoundLogger {
    BoundLogger::wrap(ContextClass::ThreadLocal(wrap_map::<JsonMap>()))
}

/// Parse a `key=value` binding. The value is read as JSON and falls back to
/// a plain string when it is not valid JSON.
pub fn parse_binding(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ContextError::InvalidBinding(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ContextError::InvalidBinding(raw.to_string()));
    }
    let value = serde_json::from_str::<Value>(value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
