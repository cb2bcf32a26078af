//! A keyed, timed-release, coalescing delay queue.
//!
//! Each entry is keyed; offering a key that already has a pending entry
//! replaces it in place (the caller is expected to have merged the values
//! — see the coordinator's `Schedule`). A single background task tracks
//! the soonest expiry, wakes when it elapses, promotes every entry within
//! a small epsilon of "now" (to absorb scheduler jitter), and delivers
//! them on a bounded channel in expiration order.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::Instant;

use crate::error::{Result, ScanhookError};

/// Tolerance for treating an entry as expired: absorbs scheduling jitter
/// between the timer firing and the promotion check running.
const EPSILON: Duration = Duration::from_millis(1);

struct Entry<K, V> {
    key: K,
    value: V,
    expire_at: Instant,
}

struct Inner<K, V> {
    data: Vec<Entry<K, V>>,
    index: HashMap<K, usize>,
    blacklist: HashSet<K>,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
            blacklist: HashSet::new(),
        }
    }

    fn earliest(&self) -> Option<Instant> {
        self.data.iter().map(|e| e.expire_at).min()
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, e) in self.data.iter().enumerate() {
            self.index.insert(e.key.clone(), i);
        }
    }
}

/// A handle to the delay queue. Cheap to clone; every public method is safe
/// for concurrent callers.
pub struct DelayQueue<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
    notify: Arc<Notify>,
    stop_tx: watch::Sender<bool>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl<K, V> Clone for DelayQueue<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
            stop_tx: self.stop_tx.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<K, V> DelayQueue<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Construct the queue and its output channel. The background driver
    /// task is already running by the time this returns.
    pub fn new() -> (Self, mpsc::Receiver<(K, V)>) {
        let (tx, rx) = mpsc::channel(1);
        let (stop_tx, _) = watch::channel(false);
        let queue = Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            notify: Arc::new(Notify::new()),
            stop_tx,
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        queue.spawn_driver(tx);
        (queue, rx)
    }

    fn spawn_driver(&self, tx: mpsc::Sender<(K, V)>) {
        let inner = self.inner.clone();
        let notify = self.notify.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let next = inner.lock().await.earliest();

                let fire = async {
                    match next {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                    _ = notify.notified() => {
                        continue;
                    }
                    _ = fire => {
                        let expired = promote_expired(&inner).await;
                        for item in expired {
                            tokio::select! {
                                _ = stop_rx.changed() => {
                                    if *stop_rx.borrow() {
                                        return;
                                    }
                                }
                                res = tx.send(item) => {
                                    if res.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Register `value` under `key` for release at absolute time `at`. An
    /// existing entry for `key` is replaced, not duplicated.
    pub async fn offer_with_time(&self, key: K, value: V, at: Instant) -> Result<()> {
        if self.stopped.load(std::sync::atomic::Ordering::Acquire) {
            return Err(ScanhookError::QueueStopped);
        }

        let mut inner = self.inner.lock().await;
        if inner.blacklist.contains(&key) {
            return Err(ScanhookError::KeyRejected("key is on the forbidden list".to_string()));
        }

        let becomes_earliest = match inner.index.get(&key) {
            Some(&i) => {
                inner.data[i].value = value;
                inner.data[i].expire_at = at;
                inner.earliest() == Some(at)
            }
            None => {
                inner.data.push(Entry {
                    key: key.clone(),
                    value,
                    expire_at: at,
                });
                let idx = inner.data.len() - 1;
                inner.index.insert(key, idx);
                inner.data.len() == 1 || inner.earliest() == Some(at)
            }
        };
        drop(inner);

        if becomes_earliest {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Sugar for `offer_with_time(key, value, Instant::now() + delay)`.
    pub async fn offer_with_delay(&self, key: K, value: V, delay: Duration) -> Result<()> {
        self.offer_with_time(key, value, Instant::now() + delay).await
    }

    /// Remove the pending entry for `key`, if any.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let idx = inner.index.remove(key)?;
        let entry = inner.data.remove(idx);
        inner.rebuild_index();
        Some(entry.value)
    }

    /// Non-destructive lookup.
    pub async fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.lock().await;
        let idx = *inner.index.get(key)?;
        Some(inner.data[idx].value.clone())
    }

    /// Reject future offers for `key`. Entries already pending are unaffected.
    pub async fn forbid(&self, key: K) {
        self.inner.lock().await.blacklist.insert(key);
    }

    /// Allow future offers for `key` again.
    pub async fn allow(&self, key: &K) {
        self.inner.lock().await.blacklist.remove(key);
    }

    /// Drop all pending entries (blacklist is left untouched).
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.data.clear();
        inner.index.clear();
    }

    /// Stop the queue: the driver task exits and further offers fail with
    /// `QueueStopped`.
    pub fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::Release);
        let _ = self.stop_tx.send(true);
    }
}

async fn promote_expired<K, V>(inner: &Arc<Mutex<Inner<K, V>>>) -> Vec<(K, V)>
where
    K: Eq + Hash + Clone,
{
    let mut inner = inner.lock().await;
    if inner.data.is_empty() {
        return Vec::new();
    }

    inner.data.sort_by_key(|e| e.expire_at);

    let now = Instant::now();
    let mut expired_count = 0;
    for entry in &inner.data {
        if entry.expire_at.saturating_duration_since(now) < EPSILON {
            expired_count += 1;
        } else {
            break;
        }
    }

    if expired_count == 0 {
        return Vec::new();
    }

    let expired: Vec<Entry<K, V>> = inner.data.drain(0..expired_count).collect();
    inner.rebuild_index();

    expired.into_iter().map(|e| (e.key, e.value)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn delivers_in_expiration_order() {
        let (queue, mut rx) = DelayQueue::<&'static str, u32>::new();

        queue.offer_with_delay("b", 2, Duration::from_millis(20)).await.unwrap();
        queue.offer_with_delay("a", 1, Duration::from_millis(10)).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, ("a", 1));
        assert_eq!(second, ("b", 2));
    }

    #[tokio::test(start_paused = true)]
    async fn offering_same_key_replaces_pending_entry() {
        let (queue, mut rx) = DelayQueue::<&'static str, u32>::new();

        queue.offer_with_delay("k", 1, Duration::from_millis(50)).await.unwrap();
        queue.offer_with_delay("k", 2, Duration::from_millis(50)).await.unwrap();

        let released = rx.recv().await.unwrap();
        assert_eq!(released, ("k", 2));
    }

    #[tokio::test]
    async fn forbidden_key_rejects_offers() {
        let (queue, _rx) = DelayQueue::<&'static str, u32>::new();
        queue.forbid("k").await;

        let result = queue.offer_with_delay("k", 1, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ScanhookError::KeyRejected(_))));
    }

    #[tokio::test]
    async fn stopped_queue_rejects_offers() {
        let (queue, _rx) = DelayQueue::<&'static str, u32>::new();
        queue.stop();

        let result = queue.offer_with_delay("k", 1, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ScanhookError::QueueStopped)));
    }

    #[tokio::test]
    async fn remove_takes_entry_out_before_expiry() {
        let (queue, _rx) = DelayQueue::<&'static str, u32>::new();
        queue.offer_with_delay("k", 7, Duration::from_secs(60)).await.unwrap();

        let removed = queue.remove(&"k").await;
        assert_eq!(removed, Some(7));
        assert_eq!(queue.find(&"k").await, None);
    }
}
