//! Per-exchange attribute bag shared by every policy of one traversal.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

type Attribute = Arc<dyn Any + Send + Sync>;

/// Mutable key/value context for one exchange.
///
/// Policies use it to talk to each other, e.g. a quota policy recording its
/// remaining allowance for a later logging policy. Values are type-erased;
/// reads downcast to the requested type. Last write wins.
pub struct PolicyContext {
    exchange_id: Uuid,
    attributes: DashMap<String, Attribute>,
}

impl PolicyContext {
    /// Create an empty context with a fresh exchange ID.
    pub fn new() -> Self {
        Self::with_exchange_id(Uuid::new_v4())
    }

    pub fn with_exchange_id(exchange_id: Uuid) -> Self {
        Self {
            exchange_id,
            attributes: DashMap::new(),
        }
    }

    pub fn exchange_id(&self) -> Uuid {
        self.exchange_id
    }

    /// Store a value, replacing any previous value under the same key.
    pub fn set_attribute<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.attributes.insert(key.into(), Arc::new(value));
    }

    /// Read a value. Returns `None` if the key is absent or holds another type.
    pub fn attribute<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.attributes.get(key)?.value().clone();
        value.downcast::<T>().ok()
    }

    /// Remove a value; returns whether the key was present.
    pub fn remove_attribute(&self, key: &str) -> bool {
        self.attributes.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl Default for PolicyContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.attributes.iter().map(|r| r.key().clone()).collect();
        f.debug_struct("PolicyContext")
            .field("exchange_id", &self.exchange_id)
            .field("keys", &keys)
            .finish()
    }
}
