//! Generic per-key cache manager.
//!
//! A [`CacheManager`] owns the cached values of one object kind (tenants,
//! products, services, ...) and fetches missing or outdated values through
//! its [`Loader`]. Every domain cache in a process is an instance of this
//! one type.
//!
//! # Read path
//!
//! ```text
//! get(key)
//!   │
//!   ├─ table lookup (shared lock) ──► slot for key
//!   │
//!   ├─ entry fresh and not modified? ──► touch, return clone      (shared lock on entry)
//!   │
//!   └─ lock slot's load mutex (async, per key)
//!        ├─ attempt we waited on failed?  ──► same error
//!        ├─ attempt we waited on loaded?  ──► its value
//!        └─ load / reload ──► swap entry ──► destroy replaced value
//! ```
//!
//! # Locking
//!
//! - The table (`RwLock<HashMap<K, Arc<Slot>>>`) is locked only for lookups
//!   and eviction scans, never across an `.await`.
//! - Each slot's load mutex is held across the loader call, so loads of one
//!   key are totally ordered and concurrent callers share one attempt.
//!   Other keys are unaffected.
//! - Dormant eviction skips slots whose load mutex is busy. A flush empties
//!   busy slots too but leaves them in the table for the in-flight load.
//! - Removed values are destroyed after the table lock is released.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, EntryInfo, EntryState};
use super::policy::CachePolicy;
use crate::error::{BoxError, SharedError};
use crate::kind::CacheKind;
use crate::lifecycle::Status;
use crate::loader::Loader;
use crate::lock::{rw_read, rw_write};
use crate::telemetry;
use crate::{CacheError, Result};

/// Error code used when the builder is not given one.
pub const DEFAULT_ERROR_CODE: &str = "CACHE_LOAD_ERROR";

// ============================================================================
// Slot
// ============================================================================

/// Outcome of the most recent loader call for a slot.
struct Attempt {
    id: u64,
    failure: Option<CacheError>,
}

/// State guarded by the per-key load mutex.
#[derive(Default)]
struct LoadState {
    last_attempt: Option<Attempt>,
    /// Set once the slot has been removed from the table. A caller that
    /// finds its slot detached starts over with a fresh lookup.
    detached: bool,
}

struct Slot<V> {
    entry: RwLock<Option<CacheEntry<V>>>,
    load: Mutex<LoadState>,
    started: AtomicU64,
    finished: AtomicU64,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            entry: RwLock::new(None),
            load: Mutex::new(LoadState::default()),
            started: AtomicU64::new(0),
            finished: AtomicU64::new(0),
        }
    }

    /// Id of the attempt a caller arriving now should share.
    ///
    /// If an attempt is in flight, that one; otherwise whichever attempt
    /// starts next.
    fn ticket(&self) -> u64 {
        let finished = self.finished.load(Ordering::Acquire);
        let started = self.started.load(Ordering::Acquire);
        if started > finished {
            started
        } else {
            started + 1
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder<L> {
    loader: L,
    name: String,
    error_code: &'static str,
    policy: CachePolicy,
}

impl<L: Loader> CacheManagerBuilder<L> {
    /// Manager name used in logs, metrics and admin listings.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Error code attached to load and reload failures.
    pub fn error_code(mut self, code: &'static str) -> Self {
        self.error_code = code;
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Take name and error code from a domain kind.
    pub fn kind(self, kind: CacheKind) -> Self {
        self.name(kind.name()).error_code(kind.error_code())
    }

    /// Build the manager in [`Status::New`].
    ///
    /// Fails if the policy is invalid.
    pub fn build(self) -> Result<CacheManager<L>> {
        self.policy.validate()?;
        Ok(CacheManager {
            name: self.name,
            error_code: self.error_code,
            policy: self.policy,
            loader: self.loader,
            status: AtomicU8::new(Status::New.as_u8()),
            epoch: Instant::now(),
            slots: RwLock::new(HashMap::new()),
        })
    }
}

// ============================================================================
// CacheManager
// ============================================================================

/// Per-key cache for one object kind, backed by a [`Loader`].
///
/// Values are handed out as clones; wrap expensive values in `Arc`.
/// Managers start in [`Status::New`] and serve requests once initialised,
/// which [`DormantCacheCleaner::register`](crate::DormantCacheCleaner::register)
/// does.
pub struct CacheManager<L: Loader> {
    name: String,
    error_code: &'static str,
    policy: CachePolicy,
    loader: L,
    status: AtomicU8,
    epoch: Instant,
    slots: RwLock<HashMap<L::Key, Arc<Slot<L::Value>>>>,
}

impl<L: Loader> CacheManager<L> {
    /// Start building a manager around `loader`.
    pub fn builder(loader: L) -> CacheManagerBuilder<L> {
        CacheManagerBuilder {
            loader,
            name: "cache".to_string(),
            error_code: DEFAULT_ERROR_CODE,
            policy: CachePolicy::default(),
        }
    }

    /// Build the manager for a domain kind.
    pub fn for_kind(kind: CacheKind, loader: L, policy: CachePolicy) -> Result<Self> {
        Self::builder(loader).kind(kind).policy(policy).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error_code(&self) -> &'static str {
        self.error_code
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Move from [`Status::New`] to [`Status::Initialized`].
    ///
    /// Idempotent on an initialised manager; fails on a destroyed one.
    pub fn initialize(&self) -> Result<()> {
        match self.status.compare_exchange(
            Status::New.as_u8(),
            Status::Initialized.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!(cache = %self.name, "cache initialized");
                Ok(())
            }
            Err(current) => match Status::from_u8(current) {
                Status::Initialized => Ok(()),
                status => Err(self.invalid_state(status, "initialize")),
            },
        }
    }

    /// Move to [`Status::Destroyed`], then evict and destroy every entry.
    ///
    /// Loads still in flight finish, but their values are destroyed instead
    /// of being cached or returned.
    pub fn destroy(&self) -> Result<()> {
        let previous = Status::from_u8(
            self.status
                .swap(Status::Destroyed.as_u8(), Ordering::AcqRel),
        );
        if previous == Status::Destroyed {
            return Err(self.invalid_state(previous, "destroy"));
        }
        let evicted = self.flush("flush");
        debug!(cache = %self.name, evicted, "cache destroyed");
        Ok(())
    }

    fn ensure_serving(&self, operation: &'static str) -> Result<()> {
        match self.status() {
            Status::Initialized => Ok(()),
            status => Err(self.invalid_state(status, operation)),
        }
    }

    fn invalid_state(&self, status: Status, operation: &'static str) -> CacheError {
        CacheError::invalid_state(format!("cache '{}'", self.name), status.as_str(), operation)
    }

    // ------------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------------

    /// Get the value for `key`, loading or reloading it if needed.
    ///
    /// - Miss: loads; a failure leaves no entry behind.
    /// - Fresh and not modified: served from the cache.
    /// - Stale or modified: reloads; a failure keeps the previous value in
    ///   the cache but is returned to this caller.
    ///
    /// Concurrent calls for the same key share one loader call and its
    /// outcome.
    pub async fn get(&self, key: &L::Key) -> Result<L::Value> {
        loop {
            self.ensure_serving("get")?;
            let slot = self.slot_for(key);

            if let Some(value) = self.read_fresh(key, &slot) {
                self.record_hit();
                return Ok(value);
            }

            let ticket = slot.ticket();
            let mut load = slot.load.lock().await;
            if load.detached {
                continue;
            }

            // Someone else ran the attempt we were waiting on
            if let Some(attempt) = load.last_attempt.as_ref().filter(|a| a.id >= ticket) {
                if let Some(err) = &attempt.failure {
                    return Err(err.clone());
                }
                let now = Instant::now();
                let entry = rw_read(&slot.entry, &self.name, "get");
                if let Some(entry) = entry.as_ref() {
                    entry.touch(now);
                    self.record_hit();
                    return Ok(entry.value.clone());
                }
            }

            // Re-check under the load lock: a load may have finished between
            // the fast path and acquiring the lock.
            if let Some(value) = self.read_fresh(key, &slot) {
                self.record_hit();
                return Ok(value);
            }

            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => self.name.clone())
                .increment(1);

            let previous = {
                let entry = rw_read(&slot.entry, &self.name, "get");
                entry.as_ref().map(|e| {
                    e.set_state(EntryState::Stale);
                    e.value.clone()
                })
            };

            let id = slot.started.fetch_add(1, Ordering::AcqRel) + 1;
            let outcome = match &previous {
                Some(old) => {
                    self.call_loader("reload", key, self.loader.reload(key, old))
                        .await
                }
                None => self.call_loader("load", key, self.loader.load(key)).await,
            };

            let result = match outcome {
                Ok(value) => self.install(key, &slot, &mut load, id, value),
                Err(source) => {
                    let source: SharedError = Arc::from(source);
                    let err = self.wrap_failure(key, previous.is_some(), source);
                    load.last_attempt = Some(Attempt {
                        id,
                        failure: Some(err.clone()),
                    });
                    Err(err)
                }
            };
            slot.finished.store(id, Ordering::Release);
            return result;
        }
    }

    /// Serve `key` from its entry if it is fresh and unmodified.
    fn read_fresh(&self, key: &L::Key, slot: &Slot<L::Value>) -> Option<L::Value> {
        let now = Instant::now();
        let entry = rw_read(&slot.entry, &self.name, "get");
        let entry = entry.as_ref()?;
        if entry.state() != EntryState::Loaded
            || !entry.is_fresh(now, self.policy.fresh_time)
            || self.loader.is_modified(key, &entry.value)
        {
            return None;
        }
        entry.touch(now);
        Some(entry.value.clone())
    }

    /// Store a freshly loaded value, destroying the one it replaces.
    ///
    /// The status is checked after the value is in place: `destroy` sets
    /// the status before flushing, so either its flush sees the new entry
    /// or this check sees `Destroyed`.
    fn install(
        &self,
        key: &L::Key,
        slot: &Slot<L::Value>,
        load: &mut LoadState,
        id: u64,
        value: L::Value,
    ) -> Result<L::Value> {
        let now = Instant::now();
        let previous = rw_write(&slot.entry, &self.name, "install")
            .replace(CacheEntry::new(value.clone(), self.epoch, now));
        if let Some(old) = previous {
            old.set_state(EntryState::Evicted);
            self.discard(key, &old.value);
        }

        if self.status() == Status::Destroyed {
            // Nothing may stay cached. If the flush already took the new
            // entry it has destroyed it as well.
            let ours = rw_write(&slot.entry, &self.name, "install").take();
            load.detached = true;
            load.last_attempt = None;
            self.detach(key, slot);
            if let Some(entry) = ours {
                entry.set_state(EntryState::Evicted);
                self.discard(key, &entry.value);
            }
            return Err(self.invalid_state(Status::Destroyed, "get"));
        }

        load.last_attempt = Some(Attempt { id, failure: None });
        Ok(value)
    }

    /// Remove `slot` from the table if it is still the one filed under `key`.
    fn detach(&self, key: &L::Key, slot: &Slot<L::Value>) {
        let mut slots = rw_write(&self.slots, &self.name, "detach");
        if slots
            .get(key)
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), slot))
        {
            slots.remove(key);
        }
    }

    async fn call_loader<F>(
        &self,
        kind: &'static str,
        key: &L::Key,
        fut: F,
    ) -> std::result::Result<L::Value, BoxError>
    where
        F: Future<Output = std::result::Result<L::Value, BoxError>>,
    {
        let start = std::time::Instant::now();
        let outcome = fut.await;
        let status = if outcome.is_ok() { "ok" } else { "error" };

        metrics::counter!(telemetry::LOADS_TOTAL,
            "cache" => self.name.clone(),
            "kind" => kind,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::LOAD_DURATION_SECONDS,
            "cache" => self.name.clone(),
            "kind" => kind,
        )
        .record(start.elapsed().as_secs_f64());

        match &outcome {
            Ok(_) => debug!(cache = %self.name, key = %key, kind, "loaded"),
            Err(e) => warn!(cache = %self.name, key = %key, kind, error = %e, "loader failed"),
        }
        outcome
    }

    fn wrap_failure(&self, key: &L::Key, reload: bool, source: SharedError) -> CacheError {
        let cache = self.name.clone();
        let key = key.to_string();
        if reload {
            CacheError::Reload {
                code: self.error_code,
                cache,
                key,
                source,
            }
        } else {
            CacheError::Load {
                code: self.error_code,
                cache,
                key,
                source,
            }
        }
    }

    fn record_hit(&self) {
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => self.name.clone()).increment(1);
    }

    fn slot_for(&self, key: &L::Key) -> Arc<Slot<L::Value>> {
        if let Some(slot) = rw_read(&self.slots, &self.name, "lookup").get(key) {
            return Arc::clone(slot);
        }
        let mut slots = rw_write(&self.slots, &self.name, "lookup");
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    // ------------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------------

    /// Evict every entry not accessed for at least the dormancy threshold.
    ///
    /// Freshness is irrelevant here. Keys with a load in flight are skipped.
    /// Returns the number of entries evicted.
    pub fn evict_dormant(&self, now: Instant) -> Result<usize> {
        self.ensure_serving("evict dormant entries")?;
        let dormant_time = self.policy.dormant_time;
        let removed = self.remove_where(false, |entry| entry.is_dormant(now, dormant_time));
        Ok(self.finish_eviction(removed, "dormant"))
    }

    /// Evict and destroy every entry.
    ///
    /// Keys with a load in flight are emptied as well; the value that load
    /// produces is cached when it completes.
    pub fn evict_all(&self) -> Result<usize> {
        self.ensure_serving("evict all entries")?;
        Ok(self.flush("flush"))
    }

    /// Evict a single key. Waits for an in-flight load of that key first.
    ///
    /// Returns whether an entry was removed.
    pub async fn invalidate(&self, key: &L::Key) -> Result<bool> {
        self.ensure_serving("invalidate")?;
        let Some(slot) = rw_read(&self.slots, &self.name, "invalidate").get(key).cloned() else {
            return Ok(false);
        };

        let mut load = slot.load.lock().await;
        if load.detached {
            return Ok(false);
        }
        load.detached = true;
        self.detach(key, &slot);
        let removed = rw_write(&slot.entry, &self.name, "invalidate").take();
        drop(load);

        Ok(match removed {
            Some(entry) => {
                self.finish_eviction(vec![(key.clone(), entry)], "invalidate");
                true
            }
            None => false,
        })
    }

    fn flush(&self, reason: &'static str) -> usize {
        let removed = self.remove_where(true, |_| true);
        self.finish_eviction(removed, reason)
    }

    /// Take every entry matching `pred` out of the table and return them.
    ///
    /// Idle slots are detached and dropped. Slots with a load in flight are
    /// skipped unless `include_busy` is set, in which case their entry is
    /// taken but the slot stays for the running load to fill.
    fn remove_where<F>(
        &self,
        include_busy: bool,
        pred: F,
    ) -> Vec<(L::Key, CacheEntry<L::Value>)>
    where
        F: Fn(&CacheEntry<L::Value>) -> bool,
    {
        let mut removed = Vec::new();
        let mut slots = rw_write(&self.slots, &self.name, "evict");
        slots.retain(|key, slot| {
            let load = slot.load.try_lock();
            if load.is_err() && !include_busy {
                return true;
            }
            let mut entry = rw_write(&slot.entry, &self.name, "evict");
            if entry.as_ref().is_some_and(|e| !pred(e)) {
                return true;
            }
            if let Some(e) = entry.take() {
                e.set_state(EntryState::Evicted);
                removed.push((key.clone(), e));
            }
            match load {
                Ok(mut load) => {
                    load.detached = true;
                    false
                }
                Err(_) => true,
            }
        });
        removed
    }

    /// Destroy evicted values outside the table lock.
    fn finish_eviction(
        &self,
        removed: Vec<(L::Key, CacheEntry<L::Value>)>,
        reason: &'static str,
    ) -> usize {
        let count = removed.len();
        for (key, entry) in removed {
            debug!(cache = %self.name, key = %key, reason, "evicted");
            self.discard(&key, &entry.value);
        }
        if count > 0 {
            metrics::counter!(telemetry::EVICTIONS_TOTAL,
                "cache" => self.name.clone(),
                "reason" => reason,
            )
            .increment(count as u64);
        }
        count
    }

    /// Hand a value the cache no longer holds to the loader's `destroy`.
    fn discard(&self, key: &L::Key, value: &L::Value) {
        if catch_unwind(AssertUnwindSafe(|| self.loader.destroy(key, value))).is_err() {
            warn!(cache = %self.name, key = %key, "destroy panicked, value dropped");
        }
    }

    // ------------------------------------------------------------------------
    // Introspection (never loads)
    // ------------------------------------------------------------------------

    /// Keys that currently hold a value.
    pub fn keys(&self) -> Result<Vec<L::Key>> {
        self.ensure_serving("list keys")?;
        let slots = rw_read(&self.slots, &self.name, "keys");
        Ok(slots
            .iter()
            .filter(|(_, slot)| rw_read(&slot.entry, &self.name, "keys").is_some())
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Number of keys that currently hold a value.
    pub fn len(&self) -> Result<usize> {
        self.ensure_serving("count entries")?;
        let slots = rw_read(&self.slots, &self.name, "len");
        Ok(slots
            .values()
            .filter(|slot| rw_read(&slot.entry, &self.name, "len").is_some())
            .count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// The cached value for `key`, without loading and without counting as
    /// an access.
    pub fn peek(&self, key: &L::Key) -> Result<Option<L::Value>> {
        self.ensure_serving("peek")?;
        let Some(slot) = rw_read(&self.slots, &self.name, "peek").get(key).cloned() else {
            return Ok(None);
        };
        let entry = rw_read(&slot.entry, &self.name, "peek");
        Ok(entry.as_ref().map(|e| e.value.clone()))
    }

    /// Bookkeeping of the entry for `key`, if any.
    pub fn entry_info(&self, key: &L::Key) -> Result<Option<EntryInfo>> {
        self.ensure_serving("inspect entry")?;
        let Some(slot) = rw_read(&self.slots, &self.name, "entry_info").get(key).cloned() else {
            return Ok(None);
        };
        let entry = rw_read(&slot.entry, &self.name, "entry_info");
        Ok(entry.as_ref().map(|e| e.info(Instant::now())))
    }
}

// ============================================================================
// ManagedCache
// ============================================================================

/// Type-erased view of a cache manager, for the cleaner and admin tooling.
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;

    fn error_code(&self) -> &'static str;

    fn status(&self) -> Status;

    fn initialize(&self) -> Result<()>;

    fn destroy(&self) -> Result<()>;

    /// Evict entries dormant at `now`. Returns the number evicted.
    fn evict_dormant(&self, now: Instant) -> Result<usize>;

    /// Evict every entry. Returns the number evicted.
    fn evict_all(&self) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    /// Cached keys rendered with `Display`.
    fn key_strings(&self) -> Result<Vec<String>>;
}

impl<L: Loader> ManagedCache for CacheManager<L> {
    fn name(&self) -> &str {
        CacheManager::name(self)
    }

    fn error_code(&self) -> &'static str {
        CacheManager::error_code(self)
    }

    fn status(&self) -> Status {
        CacheManager::status(self)
    }

    fn initialize(&self) -> Result<()> {
        CacheManager::initialize(self)
    }

    fn destroy(&self) -> Result<()> {
        CacheManager::destroy(self)
    }

    fn evict_dormant(&self, now: Instant) -> Result<usize> {
        CacheManager::evict_dormant(self, now)
    }

    fn evict_all(&self) -> Result<usize> {
        CacheManager::evict_all(self)
    }

    fn len(&self) -> Result<usize> {
        CacheManager::len(self)
    }

    fn key_strings(&self) -> Result<Vec<String>> {
        Ok(CacheManager::keys(self)?
            .iter()
            .map(ToString::to_string)
            .collect())
    }
}
