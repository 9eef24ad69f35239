//! Key buffers for contentql.
//!
//! Provides request-scoped batching and caching to prevent N+1 queries.
//! Resolvers add keys and get [`Deferred`] handles back; the first handle to be
//! resolved fetches every key pending in its batch with a single loader call.

use crate::deferred::Deferred;
use crate::resolver::ResolverError;
use async_trait::async_trait;
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Default maximum number of keys handed to one loader call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Bulk loader behind a [`KeyBuffer`].
///
/// Keys missing from the returned map are "not found", which is a valid
/// result rather than an error.
#[async_trait]
pub trait BatchLoad<K, V>: Send + Sync {
    /// Loads every key in one round trip.
    async fn load(&self, keys: &[K]) -> Result<HashMap<K, V>, ResolverError>;
}

struct FnBatchLoad<F>(F);

#[async_trait]
impl<K, V, F, Fut> BatchLoad<K, V> for FnBatchLoad<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HashMap<K, V>, ResolverError>> + Send,
{
    async fn load(&self, keys: &[K]) -> Result<HashMap<K, V>, ResolverError> {
        (self.0)(keys.to_vec()).await
    }
}

type BatchOutcome<K, V> = Result<Arc<HashMap<K, V>>, ResolverError>;

/// One group of keys fetched together.
struct Batch<K, V> {
    keys: Mutex<IndexSet<K>>,
    outcome: OnceCell<BatchOutcome<K, V>>,
}

struct BufferState<K, V> {
    pending: Option<Arc<Batch<K, V>>>,
    cache: FxHashMap<K, Option<V>>,
    flushes: usize,
}

/// A request-scoped collector coalescing lookups by key.
///
/// Cloning shares the pending batch and the cache.
pub struct KeyBuffer<K, V> {
    loader: Arc<dyn BatchLoad<K, V>>,
    state: Arc<Mutex<BufferState<K, V>>>,
    max_batch_size: usize,
}

impl<K, V> Clone for KeyBuffer<K, V> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            state: Arc::clone(&self.state),
            max_batch_size: self.max_batch_size,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> KeyBuffer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a buffer over a bulk loader.
    pub fn new(loader: Arc<dyn BatchLoad<K, V>>) -> Self {
        Self {
            loader,
            state: Arc::new(Mutex::new(BufferState {
                pending: None,
                cache: FxHashMap::default(),
                flushes: 0,
            })),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Creates a buffer from an async batch function.
    pub fn from_fn<F, Fut>(batch_fn: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K, V>, ResolverError>> + Send + 'static,
    {
        Self::new(Arc::new(FnBatchLoad(batch_fn)))
    }

    /// Sets the maximum number of keys per loader call.
    ///
    /// A larger batch is still flushed at once, split over several calls.
    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Registers a lookup and returns a handle to its eventual result.
    ///
    /// A key already pending in the current batch joins it once; every handle
    /// for it observes the same fetch. A key loaded by an earlier batch of
    /// this request is served from the cache.
    pub fn add(&self, key: K) -> Deferred<Option<V>> {
        let mut state = lock(&self.state);
        if let Some(hit) = state.cache.get(&key) {
            return Deferred::ready(hit.clone());
        }

        let batch = Arc::clone(state.pending.get_or_insert_with(|| {
            Arc::new(Batch {
                keys: Mutex::new(IndexSet::new()),
                outcome: OnceCell::new(),
            })
        }));
        lock(&batch.keys).insert(key.clone());
        drop(state);

        let buffer = self.clone();
        Deferred::new(move || async move {
            let values = buffer.flush(&batch).await?;
            Ok(values.get(&key).cloned())
        })
    }

    /// Registers several lookups at once.
    pub fn add_many(&self, keys: impl IntoIterator<Item = K>) -> Vec<Deferred<Option<V>>> {
        keys.into_iter().map(|key| self.add(key)).collect()
    }

    async fn flush(&self, batch: &Arc<Batch<K, V>>) -> BatchOutcome<K, V> {
        batch
            .outcome
            .get_or_init(|| async {
                let keys: Vec<K> = {
                    let mut state = lock(&self.state);
                    if state
                        .pending
                        .as_ref()
                        .is_some_and(|pending| Arc::ptr_eq(pending, batch))
                    {
                        state.pending = None;
                    }
                    state.flushes += 1;
                    let keys = lock(&batch.keys);
                    keys.iter().cloned().collect()
                };

                debug!(keys = keys.len(), "flushing key buffer");
                let mut values = HashMap::with_capacity(keys.len());
                for chunk in keys.chunks(self.max_batch_size) {
                    values.extend(self.loader.load(chunk).await?);
                }

                let mut state = lock(&self.state);
                for key in &keys {
                    state.cache.insert(key.clone(), values.get(key).cloned());
                }
                Ok(Arc::new(values))
            })
            .await
            .clone()
    }

    /// Seeds the cache with a known value.
    pub fn prime(&self, key: K, value: Option<V>) {
        lock(&self.state).cache.insert(key, value);
    }

    /// Forgets a cached key.
    pub fn clear_key(&self, key: &K) {
        lock(&self.state).cache.remove(key);
    }

    /// Forgets every cached key. Pending keys are untouched.
    pub fn clear(&self) {
        lock(&self.state).cache.clear();
    }

    /// Number of keys waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        lock(&self.state)
            .pending
            .as_ref()
            .map_or(0, |batch| lock(&batch.keys).len())
    }

    /// Number of batches flushed so far.
    pub fn flush_count(&self) -> usize {
        lock(&self.state).flushes
    }
}
