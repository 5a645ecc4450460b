//! The request-scoped store the deduplication layer attaches its state to.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Type-erased value kept in a request context.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// A per-request key/value store supplied by the request-handling framework.
///
/// The framework owns its lifetime and drops it when the request ends.
pub trait RequestContext: Send + Sync {
    fn get(&self, key: &str) -> Option<ContextValue>;
    fn set(&self, key: &str, value: ContextValue);
}

/// Fetch the value under `key`, attaching a fresh one on first use.
///
/// A value of a different type under the same key is replaced.
pub fn get_or_attach<C, T, F>(ctx: &C, key: &str, init: F) -> Arc<T>
where
    C: RequestContext + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> T,
{
    if let Some(existing) = ctx.get(key) {
        if let Ok(value) = existing.downcast::<T>() {
            return value;
        }
    }
    let value = Arc::new(init());
    ctx.set(key, Arc::clone(&value) as ContextValue);
    value
}

/// A ready-made [`RequestContext`] for one logical request.
#[derive(Debug)]
pub struct RequestScope {
    id: Uuid,
    values: Mutex<HashMap<String, ContextValue>>,
}

impl RequestScope {
    /// Create a scope with a random request id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Create a scope for a known request id.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext for RequestScope {
    fn get(&self, key: &str) -> Option<ContextValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: ContextValue) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}
