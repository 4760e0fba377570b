//! Epoch key cache
//!
//! Many tokens share an epoch, and the first token of a new epoch usually
//! arrives together with a burst of others. Each epoch has one slot:
//! - `Ready`: key material, read without blocking other readers
//! - `Pending`: a fetch in flight; later lookups wait on its outcome
//!
//! The first lookup of a missing epoch leads the fetch and broadcasts its
//! single outcome to every waiter, so N tokens cost one request and one
//! timeout. A failed, timed-out or abandoned fetch removes its slot; the
//! next token retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use prt_core::EpochKeyMaterial;

use crate::error::{ClientError, Result};
use crate::key_provider::KeyMaterialProvider;
use crate::DEFAULT_FETCH_TIMEOUT_MS;

/// Fetch outcome shared with waiters; errors travel as their message
type Outcome = std::result::Result<Arc<EpochKeyMaterial>, String>;

enum Slot {
    Ready(Arc<EpochKeyMaterial>),
    Pending {
        id: u64,
        done: watch::Receiver<Option<Outcome>>,
    },
}

type Slots = Mutex<HashMap<String, Slot>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a lookup has to do once the map lock is released
enum Role {
    Lead {
        id: u64,
        done: watch::Sender<Option<Outcome>>,
    },
    Wait(watch::Receiver<Option<Outcome>>),
}

/// Clears a pending slot unless it was fulfilled; also runs when the
/// leading lookup is dropped mid-fetch
struct PendingSlot<'a> {
    slots: &'a Slots,
    epoch: &'a str,
    id: u64,
}

impl PendingSlot<'_> {
    fn is_ours(&self, slot: Option<&Slot>) -> bool {
        matches!(slot, Some(Slot::Pending { id, .. }) if *id == self.id)
    }

    fn fulfil(&self, key: Arc<EpochKeyMaterial>) {
        let mut slots = lock(self.slots);
        // An evict during the fetch wins
        if self.is_ours(slots.get(self.epoch)) {
            slots.insert(self.epoch.to_string(), Slot::Ready(key));
        }
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let mut slots = lock(self.slots);
        if self.is_ours(slots.get(self.epoch)) {
            slots.remove(self.epoch);
        }
    }
}

/// Caching, de-duplicating wrapper around a key provider
pub struct CachingKeyProvider<P> {
    inner: P,
    slots: Slots,
    next_id: AtomicU64,
    fetch_timeout: Duration,
}

impl<P: KeyMaterialProvider> CachingKeyProvider<P> {
    pub fn new(inner: P) -> Self {
        Self::with_timeout(inner, Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS))
    }

    pub fn with_timeout(inner: P, fetch_timeout: Duration) -> Self {
        Self {
            inner,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            fetch_timeout,
        }
    }

    /// Get key material for an epoch, with at most one fetch in flight.
    ///
    /// Waiters on a failed fetch get `KeyUnavailable` carrying the
    /// leader's error message.
    pub async fn get(&self, epoch_id_base64: &str) -> Result<Arc<EpochKeyMaterial>> {
        loop {
            let role = {
                let mut slots = lock(&self.slots);
                match slots.get(epoch_id_base64) {
                    Some(Slot::Ready(key)) => return Ok(Arc::clone(key)),
                    Some(Slot::Pending { done, .. }) => Role::Wait(done.clone()),
                    None => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = watch::channel(None);
                        slots.insert(
                            epoch_id_base64.to_string(),
                            Slot::Pending { id, done: rx },
                        );
                        Role::Lead { id, done: tx }
                    }
                }
            };

            match role {
                Role::Lead { id, done } => return self.lead(epoch_id_base64, id, done).await,
                Role::Wait(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => (*outcome).clone(),
                        // Leader dropped before finishing; its slot is gone
                        Err(_) => continue,
                    };
                    match outcome {
                        Some(Ok(key)) => return Ok(key),
                        Some(Err(reason)) => {
                            return Err(ClientError::KeyUnavailable {
                                epoch: epoch_id_base64.to_string(),
                                reason,
                            })
                        }
                        None => continue,
                    }
                }
            }
        }
    }

    async fn lead(
        &self,
        epoch: &str,
        id: u64,
        done: watch::Sender<Option<Outcome>>,
    ) -> Result<Arc<EpochKeyMaterial>> {
        let pending = PendingSlot {
            slots: &self.slots,
            epoch,
            id,
        };

        let result = self.fetch_with_timeout(epoch).await;
        let outcome = match &result {
            Ok(key) => {
                pending.fulfil(Arc::clone(key));
                Ok(Arc::clone(key))
            }
            Err(e) => Err(e.to_string()),
        };
        drop(pending);
        done.send_replace(Some(outcome));
        result
    }

    async fn fetch_with_timeout(&self, epoch: &str) -> Result<Arc<EpochKeyMaterial>> {
        let outcome = tokio::time::timeout(self.fetch_timeout, self.inner.fetch(epoch)).await;

        let result = match outcome {
            Ok(Ok(key)) => Ok(Arc::new(key)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Timeout {
                epoch: epoch.to_string(),
                timeout_ms: self.fetch_timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => {
                metrics::counter!("prt_key_fetches_total", "outcome" => "ok").increment(1);
                tracing::info!(epoch, "Cached key material");
            }
            Err(e) => {
                metrics::counter!("prt_key_fetches_total", "outcome" => e.kind()).increment(1);
                tracing::warn!(epoch, error = %e, "Key material unavailable");
            }
        }
        result
    }

    /// Epochs with key material currently cached
    pub fn cached_epochs(&self) -> Vec<String> {
        let slots = lock(&self.slots);
        let mut epochs: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(epoch, _)| epoch.clone())
            .collect();
        epochs.sort_unstable();
        epochs
    }

    /// Number of epochs cached or being fetched
    pub fn tracked_epochs(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Drop an epoch so the next lookup refetches it
    pub fn evict(&self, epoch_id_base64: &str) -> bool {
        lock(&self.slots).remove(epoch_id_base64).is_some()
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const KEY_JSON: &[u8] = br#"{"privateKey":"AQ","hmacSecret":"c2VjcmV0"}"#;

    /// Counts fetches and optionally stalls or fails
    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
        fail_first: usize,
    }

    impl CountingProvider {
        fn new(delay: Duration, fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail_first,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl KeyMaterialProvider for CountingProvider {
        async fn fetch(&self, epoch: &str) -> Result<EpochKeyMaterial> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.fail_first {
                return Err(ClientError::Server {
                    status: 503,
                    message: format!("epoch {epoch} not published yet"),
                });
            }
            Ok(EpochKeyMaterial::from_json(KEY_JSON)?)
        }
    }

    async fn concurrent_gets<P: KeyMaterialProvider + 'static>(
        cache: &Arc<CachingKeyProvider<P>>,
        epoch: &'static str,
        n: usize,
    ) -> Vec<Result<Arc<EpochKeyMaterial>>> {
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let cache = Arc::clone(cache);
                tokio::spawn(async move { cache.get(epoch).await })
            })
            .collect();
        let mut results = Vec::with_capacity(n);
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let cache = Arc::new(CachingKeyProvider::new(CountingProvider::new(
            Duration::from_millis(50),
            0,
        )));

        let results = concurrent_gets(&cache, "epoch-a", 16).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(cache.inner().calls(), 1);
        assert_eq!(cache.cached_epochs(), vec!["epoch-a".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_failure() {
        let cache = Arc::new(CachingKeyProvider::new(CountingProvider::new(
            Duration::from_millis(50),
            usize::MAX,
        )));

        let results = concurrent_gets(&cache, "epoch-x", 16).await;
        assert_eq!(cache.inner().calls(), 1);
        assert!(results.iter().all(Result::is_err));
        let shared = results
            .iter()
            .filter(|r| matches!(r, Err(ClientError::KeyUnavailable { .. })))
            .count();
        assert_eq!(shared, 15);
        assert_eq!(cache.tracked_epochs(), 0);
    }

    #[tokio::test]
    async fn test_stalled_fetch_times_out_once_for_all_waiters() {
        let cache = Arc::new(CachingKeyProvider::with_timeout(
            CountingProvider::new(Duration::from_secs(60), 0),
            Duration::from_millis(100),
        ));

        let start = Instant::now();
        let results = concurrent_gets(&cache, "epoch-a", 5).await;
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(400), "waited {elapsed:?}");
        assert_eq!(cache.inner().calls(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ClientError::Timeout { timeout_ms: 100, .. }))));
        assert!(results.iter().all(Result::is_err));
        assert!(cache.cached_epochs().is_empty());
    }

    #[tokio::test]
    async fn test_failed_epochs_leave_no_slots() {
        let cache = CachingKeyProvider::new(CountingProvider::new(Duration::ZERO, usize::MAX));
        for i in 0..1000 {
            assert!(cache.get(&format!("bogus-{i}")).await.is_err());
        }
        assert_eq!(cache.tracked_epochs(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = CachingKeyProvider::new(CountingProvider::new(Duration::ZERO, 1));

        let err = cache.get("epoch-a").await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 503, .. }));
        assert!(cache.cached_epochs().is_empty());

        assert!(cache.get("epoch-a").await.is_ok());
        assert_eq!(cache.inner().calls(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_lets_waiter_retry() {
        let cache = Arc::new(CachingKeyProvider::new(CountingProvider::new(
            Duration::from_millis(100),
            0,
        )));

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("epoch-a").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("epoch-a").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(cache.inner().calls(), 2);
        assert_eq!(cache.cached_epochs(), vec!["epoch-a".to_string()]);
    }

    #[tokio::test]
    async fn test_distinct_epochs_fetch_separately() {
        let cache = CachingKeyProvider::new(CountingProvider::new(Duration::ZERO, 0));
        cache.get("epoch-a").await.unwrap();
        cache.get("epoch-b").await.unwrap();
        cache.get("epoch-a").await.unwrap();
        assert_eq!(cache.inner().calls(), 2);
    }

    #[tokio::test]
    async fn test_evict_forces_refetch() {
        let cache = CachingKeyProvider::new(CountingProvider::new(Duration::ZERO, 0));
        cache.get("epoch-a").await.unwrap();
        assert!(cache.evict("epoch-a"));
        assert!(!cache.evict("epoch-a"));
        cache.get("epoch-a").await.unwrap();
        assert_eq!(cache.inner().calls(), 2);
    }
}
