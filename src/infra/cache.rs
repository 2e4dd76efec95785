//! Resilient state cache with local fallback
//!
//! The remote store is Redis. Every remote call is best-effort: a transport
//! error or timeout marks the store unavailable and the call returns a
//! neutral result instead of an error. A background probe re-checks the
//! store on a fixed interval and flips availability back on success.
//!
//! Callers branch on `is_available()` to choose between the remote store and
//! the process-local `LocalCache`, so the union of the two always holds the
//! most recent state. `StateStore` packages that branch for the detectors.

use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sentinel key used by the liveness probe; an EXISTS round-trip is enough
/// to prove the store is reachable.
const PROBE_KEY: &str = "fleet:probe";

struct Inner {
    manager: RwLock<Option<ConnectionManager>>,
    available: AtomicBool,
}

/// Best-effort Redis client that never raises to its callers
#[derive(Clone)]
pub struct ResilientCache {
    inner: Arc<Inner>,
    client: Option<redis::Client>,
    op_timeout: Duration,
}

impl ResilientCache {
    /// Connect to the remote store. Connection failure is not fatal: the
    /// cache starts unavailable and the probe keeps trying.
    pub async fn connect(url: &str, op_timeout: Duration) -> Self {
        let client = match redis::Client::open(url) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "cache_url_invalid");
                None
            }
        };

        let mut manager = None;
        if let Some(client) = &client {
            match tokio::time::timeout(op_timeout, client.get_connection_manager()).await {
                Ok(Ok(m)) => {
                    info!("cache_connected");
                    manager = Some(m);
                }
                Ok(Err(e)) => warn!(error = %e, "cache_connect_failed"),
                Err(_) => warn!(timeout_ms = %op_timeout.as_millis(), "cache_connect_timeout"),
            }
        }

        let available = manager.is_some();
        Self {
            inner: Arc::new(Inner {
                manager: RwLock::new(manager),
                available: AtomicBool::new(available),
            }),
            client,
            op_timeout,
        }
    }

    /// A cache with no remote store at all; every call falls back locally.
    pub fn disconnected() -> Self {
        Self {
            inner: Arc::new(Inner {
                manager: RwLock::new(None),
                available: AtomicBool::new(false),
            }),
            client: None,
            op_timeout: Duration::from_millis(100),
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Relaxed)
    }

    fn mark_unavailable(&self, op: &str, error: &str) {
        warn!(op = %op, error = %error, "cache_degraded");
        self.inner.available.store(false, Ordering::Relaxed);
    }

    fn manager(&self) -> Option<ConnectionManager> {
        self.inner.manager.read().clone()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut manager = self.manager()?;
        if !self.is_available() {
            return None;
        }
        match tokio::time::timeout(self.op_timeout, manager.get::<_, Option<String>>(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.mark_unavailable("get", &e.to_string());
                None
            }
            Err(_) => {
                self.mark_unavailable("get", "timeout");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) {
        let Some(mut manager) = self.manager() else { return };
        if !self.is_available() {
            return;
        }
        match tokio::time::timeout(self.op_timeout, manager.set::<_, _, ()>(key, value)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.mark_unavailable("set", &e.to_string()),
            Err(_) => self.mark_unavailable("set", "timeout"),
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, seconds: u64) {
        let Some(mut manager) = self.manager() else { return };
        if !self.is_available() {
            return;
        }
        match tokio::time::timeout(self.op_timeout, manager.set_ex::<_, _, ()>(key, value, seconds))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.mark_unavailable("set_with_ttl", &e.to_string()),
            Err(_) => self.mark_unavailable("set_with_ttl", "timeout"),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(mut manager) = self.manager() else { return false };
        if !self.is_available() {
            return false;
        }
        match tokio::time::timeout(self.op_timeout, manager.exists::<_, bool>(key)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                self.mark_unavailable("exists", &e.to_string());
                false
            }
            Err(_) => {
                self.mark_unavailable("exists", "timeout");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(mut manager) = self.manager() else { return };
        if !self.is_available() {
            return;
        }
        match tokio::time::timeout(self.op_timeout, manager.del::<_, ()>(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.mark_unavailable("delete", &e.to_string()),
            Err(_) => self.mark_unavailable("delete", "timeout"),
        }
    }

    /// Cursor-based SCAN over keys matching the pattern. The whole iteration
    /// shares one timeout budget.
    pub async fn scan_keys(&self, pattern: &str) -> Vec<String> {
        let Some(mut manager) = self.manager() else { return Vec::new() };
        if !self.is_available() {
            return Vec::new();
        }
        let scan = async {
            let mut iter = manager.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok::<_, redis::RedisError>(keys)
        };
        match tokio::time::timeout(self.op_timeout, scan).await {
            Ok(Ok(keys)) => keys,
            Ok(Err(e)) => {
                self.mark_unavailable("scan_keys", &e.to_string());
                Vec::new()
            }
            Err(_) => {
                self.mark_unavailable("scan_keys", "timeout");
                Vec::new()
            }
        }
    }

    /// Spawn the periodic liveness probe. Only the probe (and failing calls)
    /// ever write the availability flag; everyone else just reads it.
    pub fn spawn_probe(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.probe_once().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("cache_probe_stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn probe_once(&self) {
        // Re-establish the connection if the initial connect never succeeded.
        if self.manager().is_none() {
            let Some(client) = &self.client else { return };
            match tokio::time::timeout(self.op_timeout, client.get_connection_manager()).await {
                Ok(Ok(manager)) => {
                    *self.inner.manager.write() = Some(manager);
                }
                _ => return,
            }
        }

        let Some(mut manager) = self.manager() else { return };
        let alive = matches!(
            tokio::time::timeout(self.op_timeout, manager.exists::<_, bool>(PROBE_KEY)).await,
            Ok(Ok(_))
        );

        let was_available = self.inner.available.swap(alive, Ordering::Relaxed);
        if alive && !was_available {
            info!("cache_recovered");
        } else if !alive && was_available {
            warn!("cache_probe_failed");
        }
    }
}

/// Process-local fallback map, constructed at startup and injected into each
/// detector. Holds state written while the remote store is down.
#[derive(Clone, Default)]
pub struct LocalCache {
    map: Arc<RwLock<FxHashMap<String, String>>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.map.write().insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.map.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

/// The read/write discipline shared by every detector: remote store when
/// available, local map otherwise.
#[derive(Clone)]
pub struct StateStore {
    cache: ResilientCache,
    local: LocalCache,
    ttl_secs: u64,
}

impl StateStore {
    pub fn new(cache: ResilientCache, local: LocalCache, ttl_secs: u64) -> Self {
        Self { cache, local, ttl_secs }
    }

    /// A store with no remote side, for tests and degraded startup.
    pub fn local_only() -> Self {
        Self::new(ResilientCache::disconnected(), LocalCache::new(), 0)
    }

    pub async fn load(&self, key: &str) -> Option<String> {
        if self.cache.is_available() {
            self.cache.get(key).await
        } else {
            self.local.get(key)
        }
    }

    pub async fn save(&self, key: &str, value: &str) {
        if self.cache.is_available() {
            if self.ttl_secs > 0 {
                self.cache.set_with_ttl(key, value, self.ttl_secs).await;
            } else {
                self.cache.set(key, value).await;
            }
        } else {
            self.local.set(key, value);
        }
    }
}
