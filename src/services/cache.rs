//! Embedding cache with LFU eviction.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A thread-safe LFU-based cache of face embeddings, keyed by image content.
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Arc<RwLock<HashMap<String, Vec<f32>>>>,
    access_count: Arc<RwLock<HashMap<String, u64>>>,
    max_size: usize,
}

impl EmbeddingCache {
    /// Create a new cache with the specified maximum size.
    ///
    /// A size of zero disables caching.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            access_count: Arc::new(RwLock::new(HashMap::new())),
            max_size,
        }
    }

    /// Generate a cache key from image bytes and model.
    pub fn generate_key(image: &[u8], model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(image);
        format!("{:x}", hasher.finalize())
    }

    /// Get an embedding from the cache.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let embedding = cache.get(key)?;
        let mut access = self
            .access_count
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *access.entry(key.to_string()).or_insert(0) += 1;
        Some(embedding.clone())
    }

    /// Insert an embedding into the cache.
    pub fn insert(&self, key: String, value: Vec<f32>) {
        if self.max_size == 0 {
            return;
        }
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        if cache.len() >= self.max_size && !cache.contains_key(&key) {
            self.evict_lfu(&mut cache);
        }

        cache.insert(key.clone(), value);
        let mut access = self
            .access_count
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        access.insert(key, 1);
    }

    /// Evict the least frequently used item.
    fn evict_lfu(&self, cache: &mut HashMap<String, Vec<f32>>) {
        let mut access = self
            .access_count
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let lfu_key = access
            .iter()
            .min_by_key(|(_, &count)| count)
            .map(|(key, _)| key.clone());
        if let Some(lfu_key) = lfu_key {
            cache.remove(&lfu_key);
            access.remove(&lfu_key);
        }
    }

    /// Get cache statistics as `(entries, capacity)`.
    pub fn stats(&self) -> (usize, usize) {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        (cache.len(), self.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic_operations() {
        let cache = EmbeddingCache::new(2);

        let key1 = EmbeddingCache::generate_key(b"alice-front", "VGG-Face");
        let key2 = EmbeddingCache::generate_key(b"alice-side", "VGG-Face");

        cache.insert(key1.clone(), vec![1.0, 2.0, 3.0]);
        cache.insert(key2.clone(), vec![4.0, 5.0, 6.0]);

        assert!(cache.get(&key1).is_some());
        assert!(cache.get(&key2).is_some());

        let (size, max) = cache.stats();
        assert_eq!(size, 2);
        assert_eq!(max, 2);
    }

    #[test]
    fn test_cache_eviction() {
        let cache = EmbeddingCache::new(2);

        let key1 = EmbeddingCache::generate_key(b"a", "model");
        let key2 = EmbeddingCache::generate_key(b"b", "model");
        let key3 = EmbeddingCache::generate_key(b"c", "model");

        cache.insert(key1.clone(), vec![1.0]);
        cache.insert(key2.clone(), vec![2.0]);

        cache.get(&key1);
        cache.get(&key1);

        // key2 has the lower access count and goes first
        cache.insert(key3.clone(), vec![3.0]);

        assert!(cache.get(&key1).is_some());
        assert!(cache.get(&key3).is_some());
        assert!(cache.get(&key2).is_none());
    }

    #[test]
    fn test_key_depends_on_model() {
        let a = EmbeddingCache::generate_key(b"same image", "VGG-Face");
        let b = EmbeddingCache::generate_key(b"same image", "Facenet");
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = EmbeddingCache::new(0);
        cache.insert("k".into(), vec![1.0]);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats(), (0, 0));
    }
}
