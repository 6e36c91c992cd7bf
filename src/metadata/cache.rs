use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;

type Slot<V> = Arc<OnceCell<(V, Instant)>>;

/// Short-lived, load-coalescing cache.
///
/// - A value lives for `ttl` after its load finished
/// - Concurrent lookups of a missing key share one load: the first
///   caller runs it, the others await the same `OnceCell`
/// - A failed load leaves nothing behind; the next lookup loads
///   again
///
/// The slot map lock is never held across an `.await`.
pub struct TtlCache<K, V> {
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slots: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached value for `key`, loading it with `load`
    /// on a miss.
    ///
    /// The flag is `true` when this call did not run `load` itself
    /// (cache hit or coalesced onto another caller's load).
    pub async fn get_or_try_load<F, Fut, E>(&self, key: K, load: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(&key);

        let mut loaded_here = false;
        let result = slot
            .get_or_try_init(|| {
                loaded_here = true;
                let fut = load();
                async move { fut.await.map(|v| (v, Instant::now())) }
            })
            .await;

        match result {
            Ok((value, _)) => Ok((value.clone(), !loaded_here)),
            Err(e) => {
                self.forget_failed(&key, &slot);
                Err(e)
            }
        }
    }

    /// Live slot for `key`, dropping expired entries on the way.
    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        slots.retain(|_, slot| {
            slot.get().is_none_or(|(_, loaded_at)| now.duration_since(*loaded_at) < self.ttl)
        });

        slots.entry(key.clone()).or_default().clone()
    }

    fn forget_failed(&self, key: &K, slot: &Slot<V>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let same = slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
        if same && !slot.initialized() {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
