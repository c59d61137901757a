//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus, statsd);
//! without a recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `tenant_cache_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `cache`: manager name (e.g. "tenant", "service")
//! - `kind`: "load" | "reload" for loader calls, "dormant" | "all" for sweeps
//! - `status`: outcome: "ok" or "error"
//! - `reason`: why an entry left the cache: "dormant" | "flush" | "invalidate"

/// Reads served from a fresh entry.
///
/// Labels: `cache`.
pub const CACHE_HITS_TOTAL: &str = "tenant_cache_hits_total";

/// Reads that had to call the loader (miss, stale or modified).
///
/// Labels: `cache`.
pub const CACHE_MISSES_TOTAL: &str = "tenant_cache_misses_total";

/// Loader invocations.
///
/// Labels: `cache`, `kind` ("load" | "reload"), `status` ("ok" | "error").
pub const LOADS_TOTAL: &str = "tenant_cache_loads_total";

/// Loader call duration in seconds.
///
/// Labels: `cache`, `kind`.
pub const LOAD_DURATION_SECONDS: &str = "tenant_cache_load_duration_seconds";

/// Entries removed from a manager.
///
/// Labels: `cache`, `reason`.
pub const EVICTIONS_TOTAL: &str = "tenant_cache_evictions_total";

/// Sweeps run by the cleaner.
///
/// Labels: `kind` ("dormant" | "all"), `status` ("ok" | "error").
pub const SWEEPS_TOTAL: &str = "tenant_cache_sweeps_total";

/// Background ticks skipped because a sweep was still running.
pub const SWEEPS_SKIPPED_TOTAL: &str = "tenant_cache_sweeps_skipped_total";
