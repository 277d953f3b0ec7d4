use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use microbox_protocol::{Cache, KernelError, KernelResult};
use parking_lot::RwLock;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// Expiring byte cache. Usable only between `connect` and `close`.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    connected: Arc<AtomicBool>,
    default_ttl: Option<Duration>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL applied when `set` is called without one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> KernelResult<()> {
        if !self.is_connected() {
            return Err(KernelError::InvalidState("cache is not connected".to_owned()));
        }
        Ok(())
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn connect(&self) -> KernelResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("cache connected");
        Ok(())
    }

    async fn close(&self) -> KernelResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.entries.write().clear();
        debug!("cache closed");
        Ok(())
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KernelResult<()> {
        self.ensure_connected()?;
        // A TTL past the clock's range never expires.
        let expires_at = ttl
            .or(self.default_ttl)
            .and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .write()
            .insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> KernelResult<Vec<u8>> {
        self.ensure_connected()?;
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
            .ok_or_else(|| KernelError::NotFound(key.to_owned()))
    }

    async fn keys(&self) -> KernelResult<Vec<String>> {
        self.ensure_connected()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
