use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::error::CacheError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// In-flight request coalescing: concurrent callers for the same key share
/// one outstanding future. The slot is cleared once the request settles,
/// success or failure, so errors are never served as negative cache entries.
pub(crate) struct FlightMap<K, V>
where
    V: Clone,
{
    inner: Mutex<HashMap<K, SharedFetch<V>>>,
}

impl<K, V> FlightMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: K, fetch: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let shared = {
            let mut slots = self.inner.lock().unwrap();
            if let Some(existing) = slots.get(&key) {
                existing.clone()
            } else {
                let shared = fetch().boxed().shared();
                slots.insert(key.clone(), shared.clone());
                shared
            }
        };

        let result = shared.clone().await;

        // First finisher clears the slot; ptr_eq keeps a newer request for
        // the same key (started after an invalidation) alive.
        let mut slots = self.inner.lock().unwrap();
        if slots.get(&key).is_some_and(|current| current.ptr_eq(&shared)) {
            slots.remove(&key);
        }

        result
    }

    pub fn remove(&self, key: &K) {
        self.inner.lock().unwrap().remove(key);
    }

    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.inner.lock().unwrap().retain(|key, _| keep(key));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let flights: Arc<FlightMap<String, u32>> = Arc::new(FlightMap::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("key".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_served_to_later_callers() {
        let flights: FlightMap<String, u32> = FlightMap::new();

        let first = flights
            .run("key".to_string(), || async {
                Err(CacheError::Transport("boom".into()))
            })
            .await;
        assert!(first.is_err());

        let second = flights
            .run("key".to_string(), || async { Ok(9) })
            .await;
        assert_eq!(second.unwrap(), 9);
    }
}
