//! Read-only views and clean triggers for admin tooling.
//!
//! Everything here is `Serialize` so an HTTP layer can return it as JSON
//! unchanged. Nothing in this module ever triggers a load.

use serde::Serialize;

use crate::Result;
use crate::cache::{
    CachePolicy, CleanerState, DormantCacheCleaner, ManagedCache, SweepKind, SweepReport,
};
use crate::lifecycle::Status;

/// One manager as seen by admin tooling.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub name: String,
    pub error_code: &'static str,
    pub status: Status,
    /// `None` when the manager is not serving (new or destroyed).
    pub size: Option<usize>,
    /// Cached keys; empty unless requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

/// The cleaner and every registered manager.
#[derive(Debug, Clone, Serialize)]
pub struct CleanerSnapshot {
    pub state: CleanerState,
    pub background_task: bool,
    pub policy: CachePolicy,
    pub caches: Vec<CacheSnapshot>,
}

/// Outcome of a manual clean, without per-key detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub kind: SweepKind,
    pub success: bool,
    pub managers: usize,
    pub evicted: usize,
    pub failed_managers: usize,
}

impl From<&SweepReport> for CleanSummary {
    fn from(report: &SweepReport) -> Self {
        Self {
            kind: report.kind,
            success: report.is_success(),
            managers: report.managers,
            evicted: report.evicted,
            failed_managers: report.failures.len(),
        }
    }
}

/// Snapshot one manager. Keys are listed only when `with_keys` is set.
pub fn snapshot_cache(cache: &dyn ManagedCache, with_keys: bool) -> CacheSnapshot {
    let keys = if with_keys {
        let mut keys = cache.key_strings().unwrap_or_default();
        keys.sort();
        keys
    } else {
        Vec::new()
    };
    CacheSnapshot {
        name: cache.name().to_string(),
        error_code: cache.error_code(),
        status: cache.status(),
        size: cache.len().ok(),
        keys,
    }
}

/// Snapshot every registered manager, sorted by name.
pub fn snapshot_managers(cleaner: &DormantCacheCleaner, with_keys: bool) -> Vec<CacheSnapshot> {
    let mut caches: Vec<_> = cleaner
        .managers()
        .iter()
        .map(|m| snapshot_cache(m.as_ref(), with_keys))
        .collect();
    caches.sort_by(|a, b| a.name.cmp(&b.name));
    caches
}

pub fn snapshot_cleaner(cleaner: &DormantCacheCleaner, with_keys: bool) -> CleanerSnapshot {
    CleanerSnapshot {
        state: cleaner.state(),
        background_task: cleaner.is_running(),
        policy: *cleaner.policy(),
        caches: snapshot_managers(cleaner, with_keys),
    }
}

/// Manually evict dormant entries everywhere.
pub fn trigger_dormant_clean(cleaner: &DormantCacheCleaner) -> Result<CleanSummary> {
    cleaner.clean_dormant_cache().map(|r| CleanSummary::from(&r))
}

/// Manually flush every manager.
pub fn trigger_full_clean(cleaner: &DormantCacheCleaner) -> Result<CleanSummary> {
    cleaner.clean_all_cache().map(|r| CleanSummary::from(&r))
}
