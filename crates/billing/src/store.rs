//! Storage abstraction for metering records.
//!
//! Engines talk to a [`Repository`] with key-addressable upsert, point
//! lookup and filtered scan. [`MemoryRepository`] is the in-process store
//! used for development and tests; production wiring swaps in a durable
//! adapter behind the same trait, usually wrapped in
//! [`RetryingRepository`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commerce_core::config::StorageConfig;
use commerce_core::{MeteringError, MeteringResult};
use parking_lot::RwLock;
use tracing::warn;

/// A storable item with a unique key and an owning tenant.
pub trait Record: Clone + Send + Sync + 'static {
    fn key(&self) -> String;
    fn tenant_id(&self) -> &str;
}

/// Backing store contract. Implementations must allow concurrent `put`
/// calls without read-modify-write races.
pub trait Repository<T: Record>: Send + Sync {
    /// Insert or replace the item stored under `item.key()`.
    fn put(&self, item: T) -> MeteringResult<()>;

    fn get(&self, key: &str) -> MeteringResult<Option<T>>;

    /// Items matching `filter`, in insertion order.
    fn scan(&self, filter: &dyn Fn(&T) -> bool) -> MeteringResult<Vec<T>>;

    fn scan_tenant(&self, tenant_id: &str) -> MeteringResult<Vec<T>> {
        self.scan(&|item: &T| item.tenant_id() == tenant_id)
    }
}

impl<T: Record, R: Repository<T> + ?Sized> Repository<T> for Arc<R> {
    fn put(&self, item: T) -> MeteringResult<()> {
        (**self).put(item)
    }

    fn get(&self, key: &str) -> MeteringResult<Option<T>> {
        (**self).get(key)
    }

    fn scan(&self, filter: &dyn Fn(&T) -> bool) -> MeteringResult<Vec<T>> {
        (**self).scan(filter)
    }
}

struct Slots<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

/// Insertion-ordered in-memory repository.
///
/// Replacing an existing key keeps the item in its original slot. The
/// store can be taken offline to exercise degraded-mode behaviour.
pub struct MemoryRepository<T> {
    slots: RwLock<Slots<T>>,
    online: AtomicBool,
}

impl<T: Record> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                items: Vec::new(),
                index: HashMap::new(),
            }),
            online: AtomicBool::new(true),
        }
    }

    /// Toggle availability; while offline every call fails with
    /// `StorageUnavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.slots.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut slots = self.slots.write();
        slots.items.clear();
        slots.index.clear();
    }

    fn ensure_online(&self) -> MeteringResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MeteringError::StorageUnavailable(
                "in-memory store is offline".into(),
            ))
        }
    }
}

impl<T: Record> Repository<T> for MemoryRepository<T> {
    fn put(&self, item: T) -> MeteringResult<()> {
        self.ensure_online()?;
        let key = item.key();
        let mut slots = self.slots.write();
        match slots.index.get(&key).copied() {
            Some(pos) => slots.items[pos] = item,
            None => {
                let pos = slots.items.len();
                slots.items.push(item);
                slots.index.insert(key, pos);
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> MeteringResult<Option<T>> {
        self.ensure_online()?;
        let slots = self.slots.read();
        Ok(slots.index.get(key).map(|&pos| slots.items[pos].clone()))
    }

    fn scan(&self, filter: &dyn Fn(&T) -> bool) -> MeteringResult<Vec<T>> {
        self.ensure_online()?;
        Ok(self
            .slots
            .read()
            .items
            .iter()
            .filter(|item| filter(item))
            .cloned()
            .collect())
    }
}

/// Retries failed writes with exponential backoff. Reads pass straight
/// through.
pub struct RetryingRepository<R> {
    inner: R,
    attempts: u32,
    backoff: Duration,
}

impl<R> RetryingRepository<R> {
    pub fn new(inner: R, config: &StorageConfig) -> Self {
        Self {
            inner,
            attempts: config.put_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<T: Record, R: Repository<T>> Repository<T> for RetryingRepository<R> {
    fn put(&self, item: T) -> MeteringResult<()> {
        let mut attempt = 0;
        loop {
            match self.inner.put(item.clone()) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_storage() && attempt + 1 < self.attempts => {
                    let delay = self.backoff * 2u32.pow(attempt);
                    warn!(
                        key = %item.key(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store write failed, retrying"
                    );
                    metrics::counter!("store.put_retries").increment(1);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get(&self, key: &str) -> MeteringResult<Option<T>> {
        self.inner.get(key)
    }

    fn scan(&self, filter: &dyn Fn(&T) -> bool) -> MeteringResult<Vec<T>> {
        self.inner.scan(filter)
    }
}
