//! Per-key request coalescing ("singleflight").
//!
//! At most one computation per key runs at a time within a process; every
//! concurrent caller for that key waits on the same result. The bound is
//! per process only, there is no distributed lock.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::trace;

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct Flight<V, E> {
    id: u64,
    result: SharedResult<V, E>,
}

/// In-flight computations keyed by `K`.
pub struct Flights<K, V, E>
where
    K: Hash + Eq,
{
    inflight: Arc<DashMap<K, Flight<V, E>>>,
    next_id: AtomicU64,
}

impl<K, V, E> Flights<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Display + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<tokio::task::JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key`, or join the computation already running for it.
    ///
    /// `work` is spawned onto the runtime, so callers that give up waiting
    /// do not cancel it for the others. Once it finishes the key is released,
    /// whatever the outcome; failures are never remembered.
    pub async fn run<F>(&self, key: K, work: F) -> Result<V, E>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let result = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                trace!("Joining in-flight computation for {}", key);
                entry.get().result.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);

                let inflight = Arc::clone(&self.inflight);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = work.await;
                    inflight.remove_if(&task_key, |_, flight| flight.id == id);
                    result
                });

                // Also release the key here in case the task panicked before
                // it could do so itself.
                let inflight = Arc::clone(&self.inflight);
                let join_key = key.clone();
                let result = async move {
                    let result = handle.await.unwrap_or_else(|e| Err(E::from(e)));
                    inflight.remove_if(&join_key, |_, flight| flight.id == id);
                    result
                }
                .boxed()
                .shared();

                entry.insert(Flight {
                    id,
                    result: result.clone(),
                });
                result
            }
        };

        result.await
    }

    /// Detach in-flight computations whose key matches `predicate`.
    ///
    /// Callers already waiting still get their result; new callers start a
    /// fresh computation.
    pub fn forget<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let before = self.inflight.len();
        self.inflight.retain(|key, _| !predicate(key));
        before.saturating_sub(self.inflight.len())
    }

    /// Number of computations currently running.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

impl<K, V, E> Default for Flights<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Display + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<tokio::task::JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
