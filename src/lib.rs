//! tenant-cache - per-key caching for multi-tenant configuration objects
//!
//! Tenants, products, clients, contexts, services and applications are
//! expensive to fetch and rarely change. This crate serves them through
//! one generic [`CacheManager`] per object kind, with
//!
//! - a freshness window after which a value is reloaded on access,
//! - reload-on-access for values whose source reports a modification,
//! - at most one in-flight load per key, shared by concurrent callers,
//! - dormancy-based eviction driven by a single process-wide
//!   [`DormantCacheCleaner`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use tenant_cache::{BoxError, CacheKind, CacheManager, CachePolicy, DormantCacheCleaner, Loader};
//!
//! struct TenantLoader;
//!
//! #[async_trait]
//! impl Loader for TenantLoader {
//!     type Key = String;
//!     type Value = Arc<String>;
//!
//!     async fn load(&self, key: &String) -> Result<Arc<String>, BoxError> {
//!         Ok(Arc::new(format!("settings for {key}")))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> tenant_cache::Result<()> {
//!     let policy = CachePolicy::from_millis(60_000, 600_000, 30_000);
//!     let cleaner = DormantCacheCleaner::start(policy)?;
//!
//!     let tenants = Arc::new(CacheManager::for_kind(CacheKind::Tenant, TenantLoader, policy)?);
//!     cleaner.register(tenants.clone())?;
//!
//!     let settings = tenants.get(&"acme".to_string()).await?;
//!     println!("{settings}");
//!
//!     cleaner.shutdown_and_wait().await;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod kind;
pub mod lifecycle;
pub mod loader;
mod lock;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{
    CacheManager, CachePolicy, CleanerState, DormantCacheCleaner, EntryInfo, EntryState,
    ManagedCache, SweepKind, SweepReport,
};
pub use config::Config;
pub use error::{BoxError, CacheError, Result};
pub use kind::CacheKind;
pub use lifecycle::{Manageable, Modifiable, Status};
pub use loader::{Loader, ManagedLoader, ModifiableLoader};
