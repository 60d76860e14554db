//! A "once-in-flight future" cell with an optional TTL (design note §9).
//!
//! Backs the bank fetch cache, the `equipForCombat` loadout cache keyed by
//! `(character, monster, level)`, and the achievements cache. Concurrent
//! callers that miss the cache at the same time share a single in-flight
//! fetch rather than issuing redundant requests.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// A waiter's in-flight fetch owner finished without ever sending a result —
/// the owning task panicked, was cancelled, or the fetch itself failed (the
/// owner clears the in-flight slot on failure rather than broadcasting an
/// error, so every waiter needs its own error here instead of a channel
/// panic). A documented, expected failure mode per spec §7, never a crash.
#[derive(Debug)]
pub struct CacheFetchLost;

impl fmt::Display for CacheFetchLost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in-flight cache fetch was lost before it completed")
    }
}

impl std::error::Error for CacheFetchLost {}

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

enum Slot<T> {
    Empty,
    Fresh(Entry<T>),
    /// A fetch is already underway; latecomers subscribe and wait for it.
    InFlight(broadcast::Sender<Arc<T>>),
}

pub struct TtlCache<T: Clone + Send + Sync + 'static> {
    ttl: Duration,
    slot: Mutex<Slot<T>>,
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Drop any cached value, forcing the next `get_or_fetch` to refetch.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Fresh(_)) {
            *slot = Slot::Empty;
        }
    }

    /// Return the cached value if fresh, otherwise run `fetch` exactly once
    /// even if called concurrently from multiple tasks.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheFetchLost>,
    {
        // Fast path: fresh value already cached.
        {
            let slot = self.slot.lock();
            if let Slot::Fresh(entry) = &*slot {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::new(entry.value.clone()));
                }
            }
        }

        // Either empty, stale, or another caller is already fetching.
        let mut rx_opt = None;
        {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::InFlight(tx) => rx_opt = Some(tx.subscribe()),
                _ => {
                    let (tx, _rx) = broadcast::channel(1);
                    *slot = Slot::InFlight(tx);
                }
            }
        }

        if let Some(mut rx) = rx_opt {
            // Someone else owns the fetch; wait for their result. A closed
            // channel means the owner's fetch failed (and cleared the slot
            // without broadcasting) or its task was dropped — a real error
            // for this waiter, never a panic.
            return match rx.recv().await {
                Ok(value) => Ok(value),
                Err(_) => Err(E::from(CacheFetchLost)),
            };
        }

        // We own the fetch.
        let result = fetch().await;
        let mut slot = self.slot.lock();
        match result {
            Ok(value) => {
                let arc = Arc::new(value.clone());
                if let Slot::InFlight(tx) = std::mem::replace(
                    &mut *slot,
                    Slot::Fresh(Entry {
                        value,
                        fetched_at: Instant::now(),
                    }),
                ) {
                    let _ = tx.send(arc.clone());
                }
                Ok(arc)
            }
            Err(e) => {
                // Fetch failed: clear the in-flight marker so the next caller
                // retries rather than waiting on a channel nobody will fill.
                *slot = Slot::Empty;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(50));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let v = cache
                .get_or_fetch(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, EngineErrStub>(7u32)
                })
                .await
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_invalidate() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        let fetch_once = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, EngineErrStub>(1u32)
            }
        };
        cache.get_or_fetch(fetch_once).await.unwrap();
        cache.invalidate();
        cache.get_or_fetch(fetch_once).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[derive(Debug)]
    struct EngineErrStub;

    impl From<CacheFetchLost> for EngineErrStub {
        fn from(_: CacheFetchLost) -> Self {
            EngineErrStub
        }
    }

    #[tokio::test]
    async fn lost_in_flight_fetch_errors_waiters_instead_of_panicking() {
        let cache: Arc<TtlCache<u32>> = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let mut gate_rx = Some(gate_rx);

        let owner_cache = cache.clone();
        let owner = tokio::spawn(async move {
            let _ = owner_cache
                .get_or_fetch(|| async move {
                    let _ = gate_rx.take().unwrap().await;
                    Err::<u32, EngineErrStub>(EngineErrStub)
                })
                .await;
        });

        // Give the owner a chance to install the in-flight slot before the
        // waiter subscribes.
        tokio::task::yield_now().await;
        let waiter_cache = cache.clone();
        let waiter = tokio::spawn(async move { waiter_cache.get_or_fetch(|| async { unreachable!() }).await });

        let _ = gate_tx.send(());
        owner.await.unwrap();
        let result = waiter.await.unwrap();
        assert!(result.is_err());
    }
}
