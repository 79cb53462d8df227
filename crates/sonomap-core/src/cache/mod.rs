//! # Result Cache
//!
//! Memoizes expensive intermediate and final results (cross-spectral
//! matrices, eigendecompositions, PSFs, beamformer maps) keyed by
//! [`Fingerprint`].
//!
//! ## Policies
//!
//! | Policy      | memory read | disk read | compute on miss | writes        |
//! |-------------|-------------|-----------|-----------------|---------------|
//! | `Never`     | no          | no        | always          | none          |
//! | `Always`    | yes         | yes       | yes             | memory + disk |
//! | `ReadOnly`  | yes         | yes       | yes, with warn  | none to disk  |
//! | `Overwrite` | no          | no        | always          | memory + disk |
//!
//! The process-wide default lives in [`CacheConfig`]; every component may
//! override it and passes the resolved policy explicitly into each call.
//!
//! ## Concurrency
//!
//! Each key owns a slot guarded by its own lock. The lock is held across
//! lookup, computation and store, so at most one writer exists per key;
//! concurrent callers for the same key wait and then reuse the result.
//!
//! ## Example
//!
//! ```rust
//! use sonomap_core::cache::{ArrayRecord, Cache, Cacheable, CachePolicy, Fingerprint};
//! use sonomap_core::types::BeamResult;
//!
//! struct Squares(Vec<f64>);
//!
//! impl Cacheable for Squares {
//!     fn to_record(&self) -> ArrayRecord {
//!         ArrayRecord::real(vec![self.0.len()], self.0.clone())
//!     }
//!     fn from_record(record: ArrayRecord) -> BeamResult<Self> {
//!         Ok(Squares(record.values))
//!     }
//! }
//!
//! let cache = Cache::in_memory();
//! let fp = Fingerprint::builder("Squares").param("n", &4usize).build();
//! let v = cache
//!     .get_or_compute(&fp, CachePolicy::Always, || Ok(Squares((0..4).map(|i| (i * i) as f64).collect())))
//!     .unwrap();
//! assert_eq!(v.0, vec![0.0, 1.0, 4.0, 9.0]);
//! ```

mod fingerprint;
mod store;

pub use fingerprint::{ContentHasher, Fingerprint, FingerprintBuilder, HashValue};
pub use store::{ArrayRecord, DType, DiskStore, FORMAT_NAME, FORMAT_VERSION};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::{BeamError, BeamResult};

/// A result that can be stored in the cache
pub trait Cacheable: Send + Sync + Sized + 'static {
    fn to_record(&self) -> ArrayRecord;
    fn from_record(record: ArrayRecord) -> BeamResult<Self>;
}

/// Caching policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// No caching; always compute
    Never,
    /// Read existing entries, compute and store on miss
    #[default]
    Always,
    /// Read existing entries, compute on miss without storing to disk
    ReadOnly,
    /// Always compute and replace the stored entry
    Overwrite,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CachePolicy::Never => "never",
            CachePolicy::Always => "always",
            CachePolicy::ReadOnly => "read_only",
            CachePolicy::Overwrite => "overwrite",
        };
        f.write_str(s)
    }
}

/// Process-wide cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default policy for components without an override
    pub policy: CachePolicy,
    /// Directory for persisted entries (None = memory only)
    pub dir: Option<PathBuf>,
    /// Keep results in process memory
    pub memory: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::Always,
            dir: None,
            memory: true,
        }
    }
}

impl CacheConfig {
    /// Per-user cache directory (`~/.cache/sonomap` on Linux).
    pub fn default_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sonomap").map(|d| d.cache_dir().to_path_buf())
    }
}

/// Counters for cache activity
#[derive(Debug, Default)]
struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    computes: AtomicU64,
    disk_writes: AtomicU64,
    fallbacks: AtomicU64,
}

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub computes: u64,
    pub disk_writes: u64,
    /// Unreadable entries and read-only misses that fell back to recomputation
    pub fallbacks: u64,
}

type Entry = Arc<dyn Any + Send + Sync>;
type Slot = Arc<Mutex<Option<Entry>>>;

/// Two-tier (memory + disk) result cache
pub struct Cache {
    policy: CachePolicy,
    memory: bool,
    slots: Mutex<HashMap<String, Slot>>,
    store: Option<DiskStore>,
    stats: CacheStats,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("policy", &self.policy)
            .field("memory", &self.memory)
            .field("store", &self.store.as_ref().map(|s| s.root().to_path_buf()))
            .finish()
    }
}

impl Cache {
    /// Build a cache from configuration.
    ///
    /// A read-only cache never creates its directory.
    pub fn new(config: &CacheConfig) -> BeamResult<Self> {
        let store = match &config.dir {
            Some(dir) if config.policy == CachePolicy::ReadOnly => {
                Some(DiskStore::open_existing(dir))
            }
            Some(dir) => Some(DiskStore::open(dir)?),
            None => None,
        };
        tracing::debug!(
            policy = %config.policy,
            dir = ?config.dir,
            memory = config.memory,
            "cache initialized"
        );
        Ok(Self::with_parts(config.policy, config.memory, store))
    }

    /// Memory-only cache with the `Always` policy.
    pub fn in_memory() -> Self {
        Self::with_parts(CachePolicy::Always, true, None)
    }

    /// Cache that never stores anything.
    pub fn disabled() -> Self {
        Self::with_parts(CachePolicy::Never, false, None)
    }

    /// Disk-backed cache rooted at `dir`.
    pub fn on_disk(dir: impl AsRef<Path>, policy: CachePolicy) -> BeamResult<Self> {
        Self::new(&CacheConfig {
            policy,
            dir: Some(dir.as_ref().to_path_buf()),
            memory: true,
        })
    }

    fn with_parts(policy: CachePolicy, memory: bool, store: Option<DiskStore>) -> Self {
        Self {
            policy,
            memory,
            slots: Mutex::new(HashMap::new()),
            store,
            stats: CacheStats::default(),
        }
    }

    /// Process-wide default policy
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Component override if present, otherwise the default.
    pub fn resolve(&self, local: Option<CachePolicy>) -> CachePolicy {
        local.unwrap_or(self.policy)
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Drop the map's reference to an unused empty slot.
    ///
    /// A memory-less cache never fills its slots; they exist only to
    /// serialize writers of one key and are forgotten once the last user
    /// is done.
    fn release(&self, key: &str, slot: Slot) {
        if self.memory {
            return;
        }
        let mut slots = self.slots.lock();
        // the map and `slot` are the only holders; nobody can clone it now
        if Arc::strong_count(&slot) == 2 && slot.try_lock().map(|g| g.is_none()).unwrap_or(false) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn live_slots(&self) -> usize {
        self.slots.lock().len()
    }

    /// Return the cached value for `fp` or compute, store and return it.
    ///
    /// Corrupt or incompatible stored entries are discarded with a warning
    /// and recomputed. Errors from `compute` propagate unchanged.
    pub fn get_or_compute<T, F>(
        &self,
        fp: &Fingerprint,
        policy: CachePolicy,
        compute: F,
    ) -> BeamResult<Arc<T>>
    where
        T: Cacheable,
        F: FnOnce() -> BeamResult<T>,
    {
        if policy == CachePolicy::Never {
            self.stats.computes.fetch_add(1, Ordering::Relaxed);
            return compute().map(Arc::new);
        }

        let key = fp.key();
        let slot = self.slot(&key);
        let result = self.get_or_compute_in(fp, policy, &slot, compute);
        self.release(&key, slot);
        result
    }

    fn get_or_compute_in<T, F>(
        &self,
        fp: &Fingerprint,
        policy: CachePolicy,
        slot: &Slot,
        compute: F,
    ) -> BeamResult<Arc<T>>
    where
        T: Cacheable,
        F: FnOnce() -> BeamResult<T>,
    {
        let mut guard = slot.lock();

        if policy != CachePolicy::Overwrite {
            if let Some(entry) = guard.as_ref() {
                match entry.clone().downcast::<T>() {
                    Ok(value) => {
                        self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(fingerprint = %fp, "cache memory hit");
                        return Ok(value);
                    }
                    Err(_) => {
                        self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(fingerprint = %fp, "cached value has an unexpected type; recomputing");
                    }
                }
            }

            if let Some(store) = &self.store {
                match store.load(fp).and_then(|r| r.map(T::from_record).transpose()) {
                    Ok(Some(value)) => {
                        self.stats.disk_hits.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(fingerprint = %fp, "cache disk hit");
                        let value = Arc::new(value);
                        if self.memory {
                            let entry: Entry = value.clone();
                            *guard = Some(entry);
                        }
                        return Ok(value);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(fingerprint = %fp, error = %e, "discarding unreadable cache entry; recomputing");
                    }
                }
            }

            if policy == CachePolicy::ReadOnly {
                self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                self.stats.computes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(fingerprint = %fp, "cache miss under read-only policy; recomputing without storing");
                return compute().map(Arc::new);
            }
        }

        self.stats.computes.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(compute()?);
        self.put(fp, &mut guard, &value);
        Ok(value)
    }

    /// Direct lookup without computing.
    ///
    /// Unlike [`Cache::get_or_compute`], incompatible entries are reported as
    /// [`BeamError::CacheConsistency`] instead of being discarded.
    pub fn load<T: Cacheable>(&self, fp: &Fingerprint) -> BeamResult<Option<Arc<T>>> {
        let key = fp.key();
        let slot = self.slot(&key);
        let result = self.load_in(fp, &slot);
        self.release(&key, slot);
        result
    }

    fn load_in<T: Cacheable>(&self, fp: &Fingerprint, slot: &Slot) -> BeamResult<Option<Arc<T>>> {
        let mut guard = slot.lock();
        if let Some(entry) = guard.as_ref() {
            return entry
                .clone()
                .downcast::<T>()
                .map(Some)
                .map_err(|_| {
                    BeamError::CacheConsistency(format!(
                        "{} holds a value of another type",
                        fp
                    ))
                });
        }
        let store = match &self.store {
            Some(s) => s,
            None => return Ok(None),
        };
        match store.load(fp)? {
            Some(record) => {
                let value = Arc::new(T::from_record(record)?);
                self.stats.disk_hits.fetch_add(1, Ordering::Relaxed);
                if self.memory {
                    let entry: Entry = value.clone();
                    *guard = Some(entry);
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Store a value computed outside the cache, honoring `policy`.
    pub fn store<T: Cacheable>(
        &self,
        fp: &Fingerprint,
        policy: CachePolicy,
        value: T,
    ) -> Arc<T> {
        let value = Arc::new(value);
        if matches!(policy, CachePolicy::Never | CachePolicy::ReadOnly) {
            return value;
        }
        let key = fp.key();
        let slot = self.slot(&key);
        self.put(fp, &mut slot.lock(), &value);
        self.release(&key, slot);
        value
    }

    fn put<T: Cacheable>(&self, fp: &Fingerprint, guard: &mut Option<Entry>, value: &Arc<T>) {
        if self.memory {
            let entry: Entry = value.clone();
            *guard = Some(entry);
        }
        if let Some(store) = &self.store {
            match store.save(fp, &value.to_record()) {
                Ok(()) => {
                    self.stats.disk_writes.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(fingerprint = %fp, "cache entry written");
                }
                Err(e) => {
                    tracing::warn!(fingerprint = %fp, error = %e, "failed to persist cache entry");
                }
            }
        }
    }

    /// True when an entry exists in memory or on disk.
    pub fn contains(&self, fp: &Fingerprint) -> bool {
        let key = fp.key();
        let slot = self.slots.lock().get(&key).cloned();
        let in_memory = slot.map(|s| s.lock().is_some()).unwrap_or(false);
        in_memory || self.store.as_ref().map(|s| s.contains(fp)).unwrap_or(false)
    }

    /// Drop all in-memory entries.
    pub fn clear_memory(&self) {
        self.slots.lock().clear();
    }

    /// Drop in-memory entries and delete persisted ones.
    pub fn clear(&self) -> BeamResult<()> {
        self.clear_memory();
        if let Some(store) = &self.store {
            let removed = store.clear()?;
            tracing::info!(removed, "cache cleared");
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.stats.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.stats.disk_hits.load(Ordering::Relaxed),
            computes: self.stats.computes.load(Ordering::Relaxed),
            disk_writes: self.stats.disk_writes.load(Ordering::Relaxed),
            fallbacks: self.stats.fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Plain real-valued array; the simplest cacheable result.
#[derive(Debug, Clone, PartialEq)]
pub struct RealArray {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl Cacheable for RealArray {
    fn to_record(&self) -> ArrayRecord {
        ArrayRecord::real(self.shape.clone(), self.values.clone())
    }

    fn from_record(record: ArrayRecord) -> BeamResult<Self> {
        let rank = record.shape.len();
        record.check(DType::Real, rank)?;
        Ok(Self {
            shape: record.shape,
            values: record.values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::AtomicUsize;

    fn fp(n: usize) -> Fingerprint {
        Fingerprint::builder("RealArray").param("n", &n).data("src").build()
    }

    fn array(n: usize) -> RealArray {
        RealArray {
            shape: vec![n],
            values: (0..n).map(|i| i as f64 * 0.5).collect(),
        }
    }

    // ========================================================================
    // Policies
    // ========================================================================

    #[test]
    fn test_always_computes_once() {
        let cache = Cache::in_memory();
        let calls = Cell::new(0);
        let a = cache
            .get_or_compute(&fp(4), CachePolicy::Always, || {
                calls.set(calls.get() + 1);
                Ok(array(4))
            })
            .unwrap();
        let b = cache
            .get_or_compute(&fp(4), CachePolicy::Always, || {
                calls.set(calls.get() + 1);
                Ok(array(4))
            })
            .unwrap();
        assert_eq!(calls.get(), 1, "compute must run exactly once");
        assert_eq!(a.values, b.values);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[test]
    fn test_fingerprint_change_forces_recompute() {
        let cache = Cache::in_memory();
        let calls = Cell::new(0);
        for n in [4, 5] {
            cache
                .get_or_compute(&fp(n), CachePolicy::Always, || {
                    calls.set(calls.get() + 1);
                    Ok(array(n))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_never_policy() {
        let cache = Cache::in_memory();
        let calls = Cell::new(0);
        for _ in 0..2 {
            cache
                .get_or_compute(&fp(3), CachePolicy::Never, || {
                    calls.set(calls.get() + 1);
                    Ok(array(3))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
        assert!(!cache.contains(&fp(3)));
    }

    #[test]
    fn test_overwrite_policy_recomputes() {
        let cache = Cache::in_memory();
        cache
            .get_or_compute(&fp(2), CachePolicy::Always, || Ok(array(2)))
            .unwrap();
        let replaced = cache
            .get_or_compute(&fp(2), CachePolicy::Overwrite, || {
                Ok(RealArray {
                    shape: vec![2],
                    values: vec![9.0, 9.0],
                })
            })
            .unwrap();
        assert_eq!(replaced.values, vec![9.0, 9.0]);
        let again = cache
            .get_or_compute(&fp(2), CachePolicy::Always, || Ok(array(2)))
            .unwrap();
        assert_eq!(again.values, vec![9.0, 9.0]);
    }

    #[test]
    fn test_compute_error_propagates_and_is_not_cached() {
        let cache = Cache::in_memory();
        let err = cache.get_or_compute::<RealArray, _>(&fp(1), CachePolicy::Always, || {
            Err(BeamError::config("boom"))
        });
        assert!(matches!(err, Err(BeamError::Configuration(_))));
        assert!(!cache.contains(&fp(1)));
    }

    #[test]
    fn test_resolve_override() {
        let cache = Cache::in_memory();
        assert_eq!(cache.resolve(None), CachePolicy::Always);
        assert_eq!(cache.resolve(Some(CachePolicy::Never)), CachePolicy::Never);
        assert_eq!(Cache::disabled().policy(), CachePolicy::Never);
    }

    // ========================================================================
    // Disk tier
    // ========================================================================

    #[test]
    fn test_disk_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first = Cache::on_disk(dir.path(), CachePolicy::Always).unwrap();
        first
            .get_or_compute(&fp(5), CachePolicy::Always, || Ok(array(5)))
            .unwrap();
        assert_eq!(first.stats().disk_writes, 1);

        let second = Cache::on_disk(dir.path(), CachePolicy::Always).unwrap();
        let calls = Cell::new(0);
        let v = second
            .get_or_compute(&fp(5), CachePolicy::Always, || {
                calls.set(calls.get() + 1);
                Ok(array(5))
            })
            .unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(v.values, array(5).values);
        assert_eq!(second.stats().disk_hits, 1);
    }

    #[test]
    fn test_read_only_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let cache = Cache::on_disk(&root, CachePolicy::ReadOnly).unwrap();
        let calls = Cell::new(0);
        for _ in 0..2 {
            cache
                .get_or_compute(&fp(3), CachePolicy::ReadOnly, || {
                    calls.set(calls.get() + 1);
                    Ok(array(3))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2, "read-only misses recompute every time");
        assert!(!root.exists(), "read-only cache must not create files");
        assert_eq!(cache.stats().fallbacks, 2);
    }

    #[test]
    fn test_read_only_serves_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        Cache::on_disk(dir.path(), CachePolicy::Always)
            .unwrap()
            .get_or_compute(&fp(3), CachePolicy::Always, || Ok(array(3)))
            .unwrap();
        let ro = Cache::on_disk(dir.path(), CachePolicy::ReadOnly).unwrap();
        let v = ro
            .get_or_compute::<RealArray, _>(&fp(3), CachePolicy::ReadOnly, || {
                panic!("must not compute")
            })
            .unwrap();
        assert_eq!(v.values, array(3).values);
    }

    #[test]
    fn test_corrupt_entry_falls_back_to_compute() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::on_disk(dir.path(), CachePolicy::Always).unwrap();
        cache
            .get_or_compute(&fp(4), CachePolicy::Always, || Ok(array(4)))
            .unwrap();
        let meta = dir
            .path()
            .join("RealArray")
            .join(format!("{}.json", fp(4).key()));
        std::fs::write(&meta, b"{ not json").unwrap();

        let fresh = Cache::on_disk(dir.path(), CachePolicy::Always).unwrap();
        assert!(fresh.load::<RealArray>(&fp(4)).is_err());
        let v = fresh
            .get_or_compute(&fp(4), CachePolicy::Always, || Ok(array(4)))
            .unwrap();
        assert_eq!(v.values, array(4).values);
        assert_eq!(fresh.stats().fallbacks, 1);
        // the recomputed entry replaced the corrupt one
        let third = Cache::on_disk(dir.path(), CachePolicy::Always).unwrap();
        assert!(third.load::<RealArray>(&fp(4)).unwrap().is_some());
    }

    #[test]
    fn test_type_mismatch_is_consistency_error() {
        #[derive(Debug)]
        struct Other;
        impl Cacheable for Other {
            fn to_record(&self) -> ArrayRecord {
                ArrayRecord::real(vec![0], vec![])
            }
            fn from_record(_: ArrayRecord) -> BeamResult<Self> {
                Ok(Other)
            }
        }
        let cache = Cache::in_memory();
        cache
            .get_or_compute(&fp(2), CachePolicy::Always, || Ok(array(2)))
            .unwrap();
        assert!(matches!(
            cache.load::<Other>(&fp(2)),
            Err(BeamError::CacheConsistency(_))
        ));
    }

    #[test]
    fn test_single_writer_per_key() {
        let cache = Arc::new(Cache::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_compute(&fp(16), CachePolicy::Always, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(array(16))
                        })
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().values.len(), 16);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_memoryless_cache_forgets_slots() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(&CacheConfig {
            policy: CachePolicy::Always,
            dir: Some(dir.path().to_path_buf()),
            memory: false,
        })
        .unwrap();
        for n in 0..20 {
            cache
                .get_or_compute(&fp(n), CachePolicy::Always, || Ok(array(n)))
                .unwrap();
            assert!(cache.load::<RealArray>(&fp(n)).unwrap().is_some());
            cache.store(&fp(n + 100), CachePolicy::Always, array(n));
        }
        assert!(cache.load::<RealArray>(&fp(1000)).unwrap().is_none());
        assert_eq!(cache.live_slots(), 0);
        assert_eq!(cache.stats().disk_writes, 40);

        // a second request is served from disk
        let again = cache
            .get_or_compute(&fp(3), CachePolicy::Always, || Ok(array(99)))
            .unwrap();
        assert_eq!(again.values, array(3).values);
        assert_eq!(cache.live_slots(), 0);

        let memory = Cache::in_memory();
        memory
            .get_or_compute(&fp(1), CachePolicy::Always, || Ok(array(1)))
            .unwrap();
        assert_eq!(memory.live_slots(), 1);
    }

    #[test]
    fn test_config_serde() {
        let yaml = "policy: read_only\nmemory: false\n";
        let config: CacheConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.policy, CachePolicy::ReadOnly);
        assert!(!config.memory);
        assert!(config.dir.is_none());
    }
}
