//! Pooled Memory Allocation
//!
//! [`UmemMgr`] hands out fixed-shape byte allocations ([`Umem`]) and recycles
//! them through size-classed freelists, so steady-state pipelines allocate
//! from the pool rather than the system allocator.
//!
//! Managers are cheap shared handles: cloning one shares the pool. A [`Umem`]
//! returns its backing storage to the pool when dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Smallest size class, in octets.
const MIN_CLASS: usize = 64;

/// Default number of buffers kept per size class.
const DEFAULT_POOL_DEPTH: usize = 32;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct UmemConfig {
    /// Maximum number of recycled buffers kept per size class.
    pub pool_depth: usize,
}

impl Default for UmemConfig {
    fn default() -> Self {
        Self {
            pool_depth: DEFAULT_POOL_DEPTH,
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default)]
pub struct UmemStats {
    /// Allocations served from a freelist.
    pub pool_hits: u64,
    /// Allocations that went to the system allocator.
    pub pool_misses: u64,
    /// Buffers returned to a freelist.
    pub recycled: u64,
}

struct UmemMgrInner {
    pool_depth: usize,
    pools: Mutex<HashMap<usize, Vec<Box<[u8]>>>>,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    recycled: AtomicU64,
}

/// Shared manager producing pooled byte allocations.
#[derive(Clone)]
pub struct UmemMgr {
    inner: Arc<UmemMgrInner>,
}

impl UmemMgr {
    /// Creates a manager with the default pool depth.
    pub fn new() -> Self {
        Self::with_config(UmemConfig::default())
    }

    /// Creates a manager with an explicit configuration.
    pub fn with_config(config: UmemConfig) -> Self {
        Self {
            inner: Arc::new(UmemMgrInner {
                pool_depth: config.pool_depth,
                pools: Mutex::new(HashMap::new()),
                pool_hits: AtomicU64::new(0),
                pool_misses: AtomicU64::new(0),
                recycled: AtomicU64::new(0),
            }),
        }
    }

    /// Allocates `size` octets, zero-initialised on first use only.
    ///
    /// The returned buffer derefs to exactly `size` octets; the backing
    /// storage may be larger (rounded up to the size class).
    pub fn alloc(&self, size: usize) -> Umem {
        let class = size_class(size);
        let storage = {
            let mut pools = self.inner.pools.lock();
            pools.get_mut(&class).and_then(Vec::pop)
        };
        let storage = match storage {
            Some(buf) => {
                self.inner.pool_hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.inner.pool_misses.fetch_add(1, Ordering::Relaxed);
                vec![0u8; class].into_boxed_slice()
            }
        };
        Umem {
            storage,
            len: size,
            mgr: Some(self.clone()),
        }
    }

    /// Drops every pooled buffer.
    pub fn vacuum(&self) {
        self.inner.pools.lock().clear();
    }

    /// Returns a snapshot of the pool statistics.
    pub fn stats(&self) -> UmemStats {
        UmemStats {
            pool_hits: self.inner.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.inner.pool_misses.load(Ordering::Relaxed),
            recycled: self.inner.recycled.load(Ordering::Relaxed),
        }
    }

    fn recycle(&self, storage: Box<[u8]>) {
        let class = storage.len();
        let mut pools = self.inner.pools.lock();
        let list = pools.entry(class).or_default();
        if list.len() < self.inner.pool_depth {
            list.push(storage);
            self.inner.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for UmemMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UmemMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UmemMgr")
            .field("pool_depth", &self.inner.pool_depth)
            .finish()
    }
}

/// One pooled allocation.
///
/// Derefs to the requested number of octets. Returned to its manager's pool
/// on drop.
pub struct Umem {
    storage: Box<[u8]>,
    len: usize,
    mgr: Option<UmemMgr>,
}

impl Umem {
    /// Creates an unpooled allocation, for callers without a manager.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            storage: data.into_boxed_slice(),
            len,
            mgr: None,
        }
    }

    /// Size in octets.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocation is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for Umem {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.storage[..self.len]
    }
}

impl DerefMut for Umem {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.storage[..self.len]
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        if let Some(mgr) = self.mgr.take() {
            let storage = std::mem::take(&mut self.storage);
            mgr.recycle(storage);
        }
    }
}

impl std::fmt::Debug for Umem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Umem").field("len", &self.len).finish()
    }
}

fn size_class(size: usize) -> usize {
    size.max(MIN_CLASS).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_rounding() {
        assert_eq!(size_class(0), MIN_CLASS);
        assert_eq!(size_class(64), 64);
        assert_eq!(size_class(65), 128);
        assert_eq!(size_class(1000), 1024);
    }

    #[test]
    fn test_alloc_len() {
        let mgr = UmemMgr::new();
        let mem = mgr.alloc(100);
        assert_eq!(mem.len(), 100);
        assert_eq!(mem.iter().filter(|&&b| b != 0).count(), 0);
    }

    #[test]
    fn test_pool_recycles() {
        let mgr = UmemMgr::new();
        drop(mgr.alloc(100));
        let stats = mgr.stats();
        assert_eq!(stats.pool_misses, 1);
        assert_eq!(stats.recycled, 1);

        // Same class, served from the pool this time.
        drop(mgr.alloc(120));
        assert_eq!(mgr.stats().pool_hits, 1);
    }

    #[test]
    fn test_pool_depth_bound() {
        let mgr = UmemMgr::with_config(UmemConfig { pool_depth: 1 });
        let a = mgr.alloc(10);
        let b = mgr.alloc(10);
        drop(a);
        drop(b);
        // Only one buffer fits in the pool.
        assert_eq!(mgr.stats().recycled, 1);
    }

    #[test]
    fn test_write_read() {
        let mgr = UmemMgr::new();
        let mut mem = mgr.alloc(32);
        mem[5] = 0xab;
        assert_eq!(mem[5], 0xab);
    }
}
