//! TTL-bounded cache of node metadata (§5), so a reconcile or monitor tick
//! doesn't re-list every `Node` on every pass. Entries expire after
//! [`consts::NODE_CACHE_TTL_SECS`] and are dropped eagerly on node deletion.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::consts::NODE_CACHE_TTL_SECS;

#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub name: String,
    pub internal_ip: Option<String>,
    pub zone: Option<String>,
    pub labels: HashMap<String, String>,
}

struct CacheEntry {
    metadata: NodeMetadata,
    inserted_at: Instant,
}

/// Shared, thread-safe node metadata cache. One instance lives for the
/// lifetime of the process and is handed to both the reconciler and the
/// monitor loop.
pub struct NodeCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl NodeCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(NODE_CACHE_TTL_SECS),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached metadata for `name` if present and not expired.
    pub async fn get(&self, name: &str) -> Option<NodeMetadata> {
        let entries = self.entries.read().await;
        entries.get(name).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.ttl {
                Some(entry.metadata.clone())
            } else {
                None
            }
        })
    }

    pub async fn insert(&self, metadata: NodeMetadata) {
        let mut entries = self.entries.write().await;
        entries.insert(
            metadata.name.clone(),
            CacheEntry {
                metadata,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Invalidate the entry for a deleted node. No-op if absent.
    pub async fn invalidate(&self, name: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(name);
    }

    /// Drop every expired entry. Called opportunistically from the monitor
    /// tick; not required for correctness since `get` already ignores stale
    /// entries.
    pub async fn sweep_expired(&self) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
    }

    /// Drop every entry whose node name is not in `current_names` — the
    /// "invalidated on observed node deletion" half of §5's cache policy,
    /// called once per reconcile with the freshly listed node set.
    pub async fn retain_names(&self, current_names: &std::collections::HashSet<String>) {
        let mut entries = self.entries.write().await;
        entries.retain(|name, _| current_names.contains(name));
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(name: &str) -> NodeMetadata {
        NodeMetadata {
            name: name.to_string(),
            internal_ip: Some("10.0.0.1".to_string()),
            zone: Some("zone1".to_string()),
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let cache = NodeCache::new();
        cache.insert(metadata("node-1")).await;
        let got = cache.get("node-1").await.unwrap();
        assert_eq!(got.internal_ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn missing_entry_returns_none() {
        let cache = NodeCache::new();
        assert!(cache.get("node-1").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = NodeCache::new();
        cache.insert(metadata("node-1")).await;
        cache.invalidate("node-1").await;
        assert!(cache.get("node-1").await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = NodeCache::with_ttl(Duration::from_millis(10));
        cache.insert(metadata("node-1")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("node-1").await.is_none());
    }

    #[tokio::test]
    async fn sweep_expired_drops_stale_entries() {
        let cache = NodeCache::with_ttl(Duration::from_millis(10));
        cache.insert(metadata("node-1")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.sweep_expired().await;
        assert_eq!(cache.entries.read().await.len(), 0);
    }

    #[tokio::test]
    async fn retain_names_drops_entries_for_deleted_nodes() {
        let cache = NodeCache::new();
        cache.insert(metadata("node-1")).await;
        cache.insert(metadata("node-2")).await;
        let current: std::collections::HashSet<String> = ["node-1".to_string()].into_iter().collect();
        cache.retain_names(&current).await;
        assert!(cache.get("node-1").await.is_some());
        assert!(cache.get("node-2").await.is_none());
    }
}
