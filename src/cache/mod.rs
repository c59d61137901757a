//! Caching subsystem.
//!
//! - [`CachePolicy`]: the three durations every manager and the cleaner
//!   share: freshness window, dormancy threshold, sweep interval.
//!
//! - [`CacheManager`]: per-key get-or-load cache for one object kind,
//!   backed by a [`Loader`](crate::Loader). Reloads stale or modified
//!   entries on access and destroys every value it discards.
//!
//! - [`DormantCacheCleaner`]: registry of all managers in the process.
//!   Periodically evicts entries nobody has read for `dormant_time`, and
//!   offers manual "clean dormant" / "clean all" triggers.
//!
//! Everything is in-process; no coherency across processes is attempted.

pub mod cleaner;
mod entry;
pub mod manager;
pub mod policy;

pub use cleaner::{CleanerState, DormantCacheCleaner, SweepFailure, SweepKind, SweepReport};
pub use entry::{EntryInfo, EntryState};
pub use manager::{CacheManager, CacheManagerBuilder, DEFAULT_ERROR_CODE, ManagedCache};
pub use policy::CachePolicy;
