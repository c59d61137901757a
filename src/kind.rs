//! Domain object kinds served through the cache.
//!
//! Each kind is one [`CacheManager`](crate::CacheManager) instance in a
//! running process; the kind only supplies its name and the error code that
//! load failures are tagged with.

use std::fmt;

use serde::Serialize;

/// The configuration object kinds a multi-tenant process caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Tenant,
    Product,
    Client,
    Context,
    Service,
    Application,
}

impl CacheKind {
    /// All kinds, in wiring order.
    pub const ALL: [CacheKind; 6] = [
        CacheKind::Tenant,
        CacheKind::Product,
        CacheKind::Client,
        CacheKind::Context,
        CacheKind::Service,
        CacheKind::Application,
    ];

    /// Manager name used in logs, metrics and admin listings.
    pub fn name(self) -> &'static str {
        match self {
            CacheKind::Tenant => "tenant",
            CacheKind::Product => "product",
            CacheKind::Client => "client",
            CacheKind::Context => "context",
            CacheKind::Service => "service",
            CacheKind::Application => "application",
        }
    }

    /// Error code attached to load and reload failures.
    pub fn error_code(self) -> &'static str {
        match self {
            CacheKind::Tenant => "TENANT_LOAD_ERROR",
            CacheKind::Product => "PRODUCT_LOAD_ERROR",
            CacheKind::Client => "CLIENT_LOAD_ERROR",
            CacheKind::Context => "CONTEXT_LOAD_ERROR",
            CacheKind::Service => "SERVICE_LOAD_ERROR",
            CacheKind::Application => "APPLICATION_LOAD_ERROR",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
