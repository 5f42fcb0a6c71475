use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use moka::sync::Cache;

/// In-memory cache for compiled schemas, keyed by schema content.
///
/// `moka` handles concurrent access and makes sure a schema is compiled only once
/// even when several validations request it at the same time.
pub struct CompiledSchemaCache<V> {
    cache: Cache<String, V>,
}

impl<V> CompiledSchemaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();

        Self { cache }
    }

    /// Generate a cache key from schema bytes
    pub fn generate_key(content: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        format!("schema_{:x}_{}", hasher.finish(), content.len())
    }

    /// Get a compiled schema from the cache, or compile it if missing.
    ///
    /// The `loader` only runs if the key is missing; concurrent callers for the
    /// same key wait for the single leader to finish.
    pub fn get_or_load<F, E>(&self, key: String, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
        E: Send + Sync + Clone + 'static,
    {
        self.cache
            .try_get_with(key, loader)
            .map_err(|e| (*e).clone())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cache_key_generation() {
        type C = CompiledSchemaCache<u32>;
        let key1 = C::generate_key(b"<xs:schema/>");
        let key2 = C::generate_key(b"<xs:schema/>");
        let key3 = C::generate_key(b"<xs:schema targetNamespace='urn:a'/>");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert!(key1.starts_with("schema_"));
    }

    #[test]
    fn test_get_or_load_runs_loader_once() {
        let cache = CompiledSchemaCache::<u32>::new(10);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u32, String> = cache.get_or_load("k".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            });
            assert_eq!(value, Ok(7));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("k"));
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.entry_count(), 1);

        cache.clear();
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_loader_errors_are_not_cached() {
        let cache = CompiledSchemaCache::<u32>::new(10);
        let failed: Result<u32, String> =
            cache.get_or_load("k".to_string(), || Err("broken".to_string()));
        assert_eq!(failed, Err("broken".to_string()));
        assert!(!cache.contains("k"));

        let loaded: Result<u32, String> = cache.get_or_load("k".to_string(), || Ok(1));
        assert_eq!(loaded, Ok(1));
    }

    #[test]
    fn test_concurrent_cache_access() {
        use rayon::prelude::*;

        let cache = Arc::new(CompiledSchemaCache::<u32>::new(10));
        let calls = Arc::new(AtomicUsize::new(0));

        (0..32).into_par_iter().for_each(|_| {
            let value: Result<u32, String> = cache.get_or_load("shared".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            });
            assert_eq!(value, Ok(42));
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
