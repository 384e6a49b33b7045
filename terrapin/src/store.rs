use fnv::FnvHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use terrapin_integration::hash::canonical_json;
use thiserror::Error;

/// The backing store explicitly reported itself unusable. This is the only
/// store failure callers may treat as a cache miss; everything else is a
/// programming error.
#[derive(Debug, Clone, Error)]
#[error("store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

/// Pluggable persistence for entity state and idempotency records.
///
/// Keys are `{kind}:{id}`; values are stable, field-ordered JSON produced by
/// [`encode_value`]. The default deployment is in-memory.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreUnavailable>;

    fn put(&self, key: &str, value: String) -> Result<(), StoreUnavailable>;

    fn remove(&self, key: &str) -> Result<(), StoreUnavailable>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreUnavailable>;
}

/// Compose the canonical `{kind}:{id}` key.
pub fn entity_key(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}

/// Stable, field-ordered JSON encoding for stored values.
pub fn encode_value<T: Serialize>(value: &T) -> Result<String, StoreUnavailable> {
    canonical_json(value).map_err(|error| StoreUnavailable(error.to_string()))
}

/// Default in-memory store. Never reports unavailability.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<FnvHashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreUnavailable> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreUnavailable> {
        self.entries.write().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreUnavailable> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreUnavailable> {
        let mut keys = self
            .entries
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();
        keys.sort_unstable();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_keys_and_prefix_listing() {
        let store = InMemoryStore::new();
        store.put(&entity_key("order", "ord_1"), "{}".into()).unwrap();
        store.put(&entity_key("order", "ord_2"), "{}".into()).unwrap();
        store.put(&entity_key("fill", "fil_1"), "{}".into()).unwrap();

        let orders = store.keys_with_prefix("order:").unwrap();
        assert_eq!(orders, vec!["order:ord_1", "order:ord_2"]);
    }

    #[test]
    fn test_encode_value_is_field_ordered() {
        #[derive(Serialize)]
        struct Entity {
            zulu: u32,
            alpha: u32,
        }

        let encoded = encode_value(&Entity { zulu: 1, alpha: 2 }).unwrap();
        assert_eq!(encoded, r#"{"alpha":2,"zulu":1}"#);
    }
}
