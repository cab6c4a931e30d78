//! DataLoader utilities for batch loading
//!
//! Implements the DataLoader pattern for preventing N+1 fetches against the
//! content API. See: https://github.com/graphql/dataloader
//!
//! Every loader built for one incoming query shares a single [`CacheMap`],
//! keyed by the string each [`BatchLoader::cache_key`] derives, so the same
//! logical fetch is issued at most once per request whichever loader asks.

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::GraphQLError;

/// Batch loader trait for loading multiple items at once
#[async_trait]
pub trait BatchLoader<K, V>: Send + Sync
where
    K: Send + Sync + Clone + Eq + Hash,
    V: Send + Sync + Clone,
{
    /// Loader dimension, used in logs
    fn name(&self) -> &'static str;

    /// Stable cache key for `key`.
    ///
    /// Keys of different loaders sharing a cache map must live in disjoint
    /// namespaces unless they name the same logical fetch.
    fn cache_key(&self, key: &K) -> String;

    /// Load batch of items by keys
    ///
    /// Called once per batch with distinct keys. An `Err` rejects every key
    /// of the batch; a key missing from the map resolves to `NotFound`.
    async fn load_batch(&self, keys: &[K]) -> crate::Result<HashMap<K, crate::Result<V>>>;
}

type Slot<V> = Shared<BoxFuture<'static, crate::Result<V>>>;

/// Request-scoped map from cache key to a pending or resolved value.
///
/// Never share one across requests: build a new map for every query.
pub struct CacheMap<V> {
    entries: Arc<Mutex<HashMap<String, Slot<V>>>>,
}

impl<V> CacheMap<V>
where
    V: Send + Sync + Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, cache_key: &str) -> bool {
        self.entries.lock().await.contains_key(cache_key)
    }
}

impl<V> Default for CacheMap<V>
where
    V: Send + Sync + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for CacheMap<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

struct PendingKey<K, V> {
    key: K,
    cache_key: String,
    slot: Slot<V>,
    tx: oneshot::Sender<crate::Result<V>>,
}

/// DataLoader with caching and batching
///
/// Keys requested before a batch is dispatched are coalesced into one
/// [`BatchLoader::load_batch`] call. The first key of a batch schedules the
/// dispatch after `delay`; [`DataLoader::flush`] dispatches immediately.
pub struct DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    loader: Arc<L>,
    cache: CacheMap<V>,
    pending: Arc<Mutex<Vec<PendingKey<K, V>>>>,
    dispatched: Arc<AtomicUsize>,
    delay: Duration,
}

impl<K, V, L> DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    /// Create new DataLoader with its own cache map
    pub fn new(loader: L) -> Self {
        Self::with_cache(loader, CacheMap::new())
    }

    /// Create a DataLoader sharing `cache` with the other loaders of a request
    pub fn with_cache(loader: L, cache: CacheMap<V>) -> Self {
        Self {
            loader: Arc::new(loader),
            cache,
            pending: Arc::new(Mutex::new(Vec::new())),
            dispatched: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_millis(1),
        }
    }

    /// Set how long a new batch waits for more keys before dispatch
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Load a single item by key
    ///
    /// Every call for the same cache key within the request shares one
    /// upstream fetch and one result.
    pub async fn load(&self, key: K) -> crate::Result<V> {
        let cache_key = self.loader.cache_key(&key);

        let slot = {
            let mut entries = self.cache.entries.lock().await;
            match entries.get(&cache_key) {
                Some(slot) => {
                    trace!(loader = self.loader.name(), %cache_key, "DataLoader cache hit");
                    slot.clone()
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    let dropped_key = cache_key.clone();
                    let slot = async move {
                        rx.await.unwrap_or_else(|_| {
                            Err(GraphQLError::fetch(&dropped_key, "batch dropped before completion"))
                        })
                    }
                    .boxed()
                    .shared();
                    entries.insert(cache_key.clone(), slot.clone());
                    self.enqueue(PendingKey {
                        key,
                        cache_key,
                        slot: slot.clone(),
                        tx,
                    })
                    .await;
                    slot
                }
            }
        };

        slot.await
    }

    /// Load multiple items by keys
    ///
    /// Results follow the order of `keys`, one per key.
    pub async fn load_many(&self, keys: Vec<K>) -> Vec<crate::Result<V>> {
        future::join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Dispatch every pending key now as one batch
    pub async fn flush(&self) {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        if batch.is_empty() {
            return;
        }

        let keys: Vec<K> = batch.iter().map(|p| p.key.clone()).collect();
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(
            loader = self.loader.name(),
            key_count = keys.len(),
            "Dispatching DataLoader batch"
        );

        match self.loader.load_batch(&keys).await {
            Ok(mut results) => {
                for PendingKey { key, cache_key, tx, .. } in batch {
                    let result = results
                        .remove(&key)
                        .unwrap_or(Err(GraphQLError::NotFound(cache_key)));
                    let _ = tx.send(result);
                }
            }
            Err(err) => {
                warn!(loader = self.loader.name(), error = %err, "DataLoader batch failed");
                // Failed batches are not cached; a later wave asks again.
                let mut entries = self.cache.entries.lock().await;
                for PendingKey {
                    cache_key, slot, tx, ..
                } in batch
                {
                    // The key may have been cleared and reloaded meanwhile.
                    if entries.get(&cache_key).is_some_and(|current| current.ptr_eq(&slot)) {
                        entries.remove(&cache_key);
                    }
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }

    /// Number of keys waiting for the next dispatch
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Number of batches handed to the [`BatchLoader`] so far
    pub fn batches_dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Evict one key from the cache
    pub async fn clear(&self, key: &K) {
        let cache_key = self.loader.cache_key(key);
        self.cache.entries.lock().await.remove(&cache_key);
    }

    /// Prime the cache with a value
    ///
    /// Keeps an existing entry; useful for seeding the cache with data you
    /// already have.
    pub async fn prime(&self, key: &K, value: V) {
        let cache_key = self.loader.cache_key(key);
        self.cache
            .entries
            .lock()
            .await
            .entry(cache_key)
            .or_insert_with(|| future::ready(Ok(value)).boxed().shared());
    }

    async fn enqueue(&self, pending: PendingKey<K, V>) {
        let mut queue = self.pending.lock().await;
        let starts_batch = queue.is_empty();
        queue.push(pending);
        drop(queue);

        if starts_batch {
            let this = self.clone();
            tokio::spawn(async move {
                if this.delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(this.delay).await;
                }
                this.flush().await;
            });
        }
    }
}

impl<K, V, L> Clone for DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            cache: self.cache.clone(),
            pending: self.pending.clone(),
            dispatched: self.dispatched.clone(),
            delay: self.delay,
        }
    }
}
