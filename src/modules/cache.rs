//! Bounded TTL + LRU cache for expensive reshaping work.
//!
//! Two instances exist process-wide: the message-shape cache (translated
//! upstream message sequences) and the tool-sanitization cache. Both are
//! keyed by hex SHA-1 digests of a stable serialization of their input.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// LRU order, front = least recently used.
    order: VecDeque<String>,
}

pub struct TtlLruCache<V> {
    inner: Mutex<CacheInner<V>>,
    capacity: usize,
}

impl<V: Clone + Send + 'static> TtlLruCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Miss if absent or expired-at-access; a hit promotes the entry to MRU.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => Instant::now() >= entry.expires_at,
        };
        if expired {
            inner.entries.remove(key);
            remove_from_order(&mut inner.order, key);
            return None;
        }
        promote(&mut inner.order, key);
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert or replace, evicting the LRU entry when over capacity.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        if inner.entries.insert(key.to_string(), entry).is_some() {
            remove_from_order(&mut inner.order, key);
        }
        inner.order.push_back(key.to_string());
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose expiry has passed. Memory hygiene only; reads
    /// already treat expired entries as misses.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.entries.remove(key);
            remove_from_order(&mut inner.order, key);
        }
        expired.len()
    }

    /// Background sweeper, every 5 minutes until cancelled.
    pub fn start_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                crate::constants::CACHE_SWEEP_INTERVAL_SECS,
            ));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::debug!("Cache sweeper removed {} expired entrie(s)", removed);
                        }
                    }
                }
            }
        })
    }
}

fn promote(order: &mut VecDeque<String>, key: &str) {
    if order.back().map(String::as_str) == Some(key) {
        return;
    }
    remove_from_order(order, key);
    order.push_back(key.to_string());
}

fn remove_from_order(order: &mut VecDeque<String>, key: &str) {
    if let Some(idx) = order.iter().position(|k| k == key) {
        order.remove(idx);
    }
}

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable key over the roles and textual content of a message sequence.
pub fn messages_cache_key(parts: impl Iterator<Item = (String, String)>) -> String {
    let mut buf = String::new();
    for (role, text) in parts {
        buf.push_str(&role);
        buf.push_str(&text);
    }
    sha1_hex(&buf)
}

/// Stable key over tool kinds and names.
pub fn tools_cache_key(parts: impl Iterator<Item = (String, String)>) -> String {
    let mut buf = String::new();
    for (kind, name) in parts {
        buf.push_str(&kind);
        buf.push_str(&name);
    }
    sha1_hex(&buf)
}
