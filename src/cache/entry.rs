//! Per-key cache entry and its bookkeeping.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// State of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Loaded (or reloaded) and servable while fresh.
    Loaded,
    /// Freshness check failed and no reload has succeeded since.
    Stale,
    /// Removed from the table; its value is being or has been destroyed.
    Evicted,
}

impl EntryState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EntryState::Loaded,
            1 => EntryState::Stale,
            _ => EntryState::Evicted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EntryState::Loaded => 0,
            EntryState::Stale => 1,
            EntryState::Evicted => 2,
        }
    }
}

/// Read-only view of an entry's bookkeeping, for admin tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub state: EntryState,
    /// Time since the value was loaded or last reloaded.
    #[serde(rename = "age_ms", serialize_with = "as_millis")]
    pub age: Duration,
    /// Time since the value was last handed to a caller.
    #[serde(rename = "idle_ms", serialize_with = "as_millis")]
    pub idle: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// One cached value plus its load and access times.
///
/// Access time and state are atomics so that a fresh hit only needs a
/// shared lock on the entry. Times are stored as nanoseconds since the
/// owning manager's epoch.
pub(crate) struct CacheEntry<V> {
    pub(crate) value: V,
    epoch: Instant,
    loaded_at: Instant,
    last_accessed: AtomicU64,
    state: AtomicU8,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, epoch: Instant, now: Instant) -> Self {
        Self {
            value,
            epoch,
            loaded_at: now,
            last_accessed: AtomicU64::new(offset(epoch, now)),
            state: AtomicU8::new(EntryState::Loaded.as_u8()),
        }
    }

    pub(crate) fn last_accessed_at(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_accessed.load(Ordering::Acquire))
    }

    /// Record an access. Never moves the access time backwards.
    pub(crate) fn touch(&self, now: Instant) {
        self.last_accessed
            .fetch_max(offset(self.epoch, now), Ordering::AcqRel);
    }

    pub(crate) fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: EntryState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn is_fresh(&self, now: Instant, fresh_time: Duration) -> bool {
        now.saturating_duration_since(self.loaded_at) < fresh_time
    }

    pub(crate) fn is_dormant(&self, now: Instant, dormant_time: Duration) -> bool {
        now.saturating_duration_since(self.last_accessed_at()) >= dormant_time
    }

    pub(crate) fn info(&self, now: Instant) -> EntryInfo {
        EntryInfo {
            state: self.state(),
            age: now.saturating_duration_since(self.loaded_at),
            idle: now.saturating_duration_since(self.last_accessed_at()),
        }
    }
}

fn offset(epoch: Instant, t: Instant) -> u64 {
    t.saturating_duration_since(epoch).as_nanos() as u64
}
