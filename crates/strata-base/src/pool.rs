use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Default bound on idle objects kept by a pool for each key.
pub const DEFAULT_MAX_IDLE: usize = 16;

type Refurbish<T> = Box<dyn FnOnce(&mut T) -> bool + Send>;

/// A lock-protected, bounded cache of expensive reusable objects (codec
/// contexts and the like), keyed by configuration.
///
/// Handles are exclusively owned by their holder. When a [`Recycled`] handle
/// is dropped, its `reset` closure restores the object to a clean state and
/// the object returns to the pool. Each key keeps at most `max_idle` idle
/// objects; returning one more evicts the oldest idle object of that key,
/// so a busy key never pushes out the objects of another.
///
/// Pools are ordinary values: construct one and pass clones (they share
/// state) to the components that should share it.
pub struct KeyedRecyclingPool<K, T> {
    shared: Arc<PoolShared<K, T>>,
}

/// A pool with a single implicit key.
pub type RecyclingPool<T> = KeyedRecyclingPool<(), T>;

struct PoolShared<K, T> {
    /// Oldest first.
    idle: Mutex<VecDeque<(K, T)>>,
    max_idle: usize,
    same_key: fn(&K, &K) -> bool,
    metrics: PoolMetrics,
}

#[derive(Default)]
struct PoolMetrics {
    created: AtomicU64,
    reused: AtomicU64,
    evicted: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time counters of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects produced by a factory on a cache miss.
    pub created: u64,
    /// Objects handed out from the idle list.
    pub reused: u64,
    /// Idle objects dropped to respect the bound.
    pub evicted: u64,
    /// Returned objects dropped because `reset` reported failure.
    pub discarded: u64,
    /// Objects currently idle, over all keys.
    pub idle: usize,
}

impl<K, T> KeyedRecyclingPool<K, T>
where
    K: Eq + Clone,
{
    /// Keeps up to `max_idle` idle objects for each key.
    pub fn new(max_idle: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                idle: Mutex::new(VecDeque::new()),
                max_idle,
                same_key: <K as PartialEq>::eq,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// Checks out an object for `key`, constructing one with `factory` on a
    /// miss.
    ///
    /// Returns `None` if `factory` fails; the caller reports the
    /// initialization failure. `reset` runs exactly once, when the handle is
    /// released, and returns `false` if the object cannot be reused.
    pub fn get<F, R>(&self, key: K, factory: F, reset: R) -> Option<Recycled<K, T>>
    where
        F: FnOnce() -> Option<T>,
        R: FnOnce(&mut T) -> bool + Send + 'static,
    {
        let reused = {
            let mut idle = self.shared.idle.lock().expect("pool lock poisoned");
            // Most recently returned first: it is the likeliest to be warm.
            idle.iter()
                .rposition(|(k, _)| *k == key)
                .and_then(|index| idle.remove(index))
                .map(|(_, value)| value)
        };
        let value = match reused {
            Some(value) => {
                self.shared.metrics.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                let value = factory()?;
                self.shared.metrics.created.fetch_add(1, Ordering::Relaxed);
                debug!("recycling pool miss; constructed a new object");
                value
            }
        };
        Some(Recycled {
            value: Some(value),
            key: Some(key),
            reset: Some(Box::new(reset)),
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let m = &self.shared.metrics;
        PoolStats {
            created: m.created.load(Ordering::Relaxed),
            reused: m.reused.load(Ordering::Relaxed),
            evicted: m.evicted.load(Ordering::Relaxed),
            discarded: m.discarded.load(Ordering::Relaxed),
            idle: self.shared.idle.lock().expect("pool lock poisoned").len(),
        }
    }

    /// Drops every idle object. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut idle = self.shared.idle.lock().expect("pool lock poisoned");
        let count = idle.len();
        idle.clear();
        count
    }
}

impl<K: Eq + Clone, T> Default for KeyedRecyclingPool<K, T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl<K, T> Clone for KeyedRecyclingPool<K, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, T> fmt::Debug for KeyedRecyclingPool<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedRecyclingPool")
            .field("max_idle", &self.shared.max_idle)
            .finish_non_exhaustive()
    }
}

impl<K, T> PoolShared<K, T> {
    fn put(&self, key: K, value: T) {
        if self.max_idle == 0 {
            self.metrics.evicted.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let evicted = {
            let mut idle = self.idle.lock().expect("pool lock poisoned");
            let same_key = |(k, _): &(K, T)| (self.same_key)(k, &key);
            let idle_for_key = idle.iter().filter(|entry| same_key(*entry)).count();
            let evicted = if idle_for_key >= self.max_idle {
                idle.iter()
                    .position(same_key)
                    .and_then(|index| idle.remove(index))
            } else {
                None
            };
            idle.push_back((key, value));
            evicted
        };
        // Dropped outside the lock: destructors of codec contexts may be slow.
        if evicted.is_some() {
            self.metrics.evicted.fetch_add(1, Ordering::Relaxed);
            debug!("recycling pool full for this key; evicted its oldest idle object");
        }
    }
}

/// An object checked out of a [`KeyedRecyclingPool`].
///
/// Dereferences to the object. Dropping the handle refurbishes the object
/// and returns it to the pool.
pub struct Recycled<K, T> {
    value: Option<T>,
    key: Option<K>,
    reset: Option<Refurbish<T>>,
    shared: Arc<PoolShared<K, T>>,
}

impl<K, T> Deref for Recycled<K, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("recycled object already released")
    }
}

impl<K, T> DerefMut for Recycled<K, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("recycled object already released")
    }
}

impl<K, T> Drop for Recycled<K, T> {
    fn drop(&mut self) {
        let (Some(mut value), Some(key), Some(reset)) =
            (self.value.take(), self.key.take(), self.reset.take())
        else {
            return;
        };
        if reset(&mut value) {
            self.shared.put(key, value);
        } else {
            self.shared.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("recycled object failed to reset; discarding it");
        }
    }
}

impl<K, T: fmt::Debug> fmt::Debug for Recycled<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Recycled").field(&self.value).finish()
    }
}
