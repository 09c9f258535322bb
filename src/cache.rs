//! Bounded cache of encoded frames.
//!
//! Purely an optimization: composition is deterministic, so a hit returns the
//! same bytes a fresh render would. Keys include the quote's content revision,
//! which keeps a resynced quote from ever serving a stale frame.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Identity of one rendered frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    /// Quote shown
    pub quote_id: String,
    /// [`Quote::revision`](crate::Quote::revision) at render time
    pub revision: u64,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// [`Palette::cache_key`](crate::compose::Palette::cache_key), `None` when unquantized
    pub palette: Option<String>,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<RenderKey, Arc<Vec<u8>>>,
    order: VecDeque<RenderKey>,
}

/// First-in first-out cache of PNG bytes.
#[derive(Debug)]
pub struct RenderCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl RenderCache {
    /// Create a cache holding at most `capacity` frames. A zero capacity
    /// caches nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Cached bytes for `key`, if present.
    pub fn get(&self, key: &RenderKey) -> Option<Arc<Vec<u8>>> {
        let entries = self.entries.lock().ok()?;
        entries.map.get(key).cloned()
    }

    /// Store `bytes` under `key`, evicting the oldest entry when full.
    pub fn insert(&self, key: RenderKey, bytes: Arc<Vec<u8>>) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            tracing::warn!("Render cache lock poisoned, skipping insert");
            return;
        };
        if entries.map.insert(key.clone(), bytes).is_none() {
            entries.order.push_back(key);
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.map.remove(&oldest);
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            let dropped = entries.map.len();
            entries.map.clear();
            entries.order.clear();
            tracing::debug!(dropped, "Cleared render cache");
        }
    }

    /// Number of cached frames.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.map.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> RenderKey {
        RenderKey {
            quote_id: id.to_string(),
            revision: 1,
            width: 800,
            height: 480,
            palette: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = RenderCache::new(4);
        cache.insert(key("a"), Arc::new(vec![1, 2, 3]));
        assert_eq!(cache.get(&key("a")).as_deref(), Some(&vec![1, 2, 3]));
        assert!(cache.get(&key("b")).is_none());
    }

    #[test]
    fn test_key_includes_revision_and_palette() {
        let cache = RenderCache::new(4);
        cache.insert(key("a"), Arc::new(vec![1]));

        let mut newer = key("a");
        newer.revision = 2;
        assert!(cache.get(&newer).is_none());

        let mut quantized = key("a");
        quantized.palette = Some("inky7:dither".to_string());
        assert!(cache.get(&quantized).is_none());
    }

    #[test]
    fn test_evicts_oldest() {
        let cache = RenderCache::new(2);
        cache.insert(key("a"), Arc::new(vec![1]));
        cache.insert(key("b"), Arc::new(vec![2]));
        cache.insert(key("c"), Arc::new(vec![3]));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let cache = RenderCache::new(0);
        cache.insert(key("a"), Arc::new(vec![1]));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = RenderCache::new(4);
        cache.insert(key("a"), Arc::new(vec![1]));
        cache.clear();
        assert!(cache.is_empty());
    }
}
