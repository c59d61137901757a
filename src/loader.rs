//! Loader contract and capability decorators.
//!
//! A [`Loader`] knows how to fetch one kind of object (tenant, product,
//! service, ...) from its authoritative source. The cache never talks to a
//! backing store directly; it only calls these methods.
//!
//! Value capabilities are attached by wrapping the loader once, when the
//! manager is built, instead of being probed on every call:
//!
//! ```ignore
//! // Values implement Manageable and Modifiable
//! let loader = ManagedLoader::new(ModifiableLoader::new(TemplateLoader::new(store)));
//! let templates = CacheManager::for_kind(CacheKind::Application, loader, policy)?;
//! ```

use std::fmt::Display;
use std::hash::Hash;

use async_trait::async_trait;
use tracing::warn;

use crate::error::BoxError;
use crate::lifecycle::{Manageable, Modifiable};

// ============================================================================
// Loader
// ============================================================================

/// Fetches values for one key type from an authoritative source.
///
/// Loader failures are returned as [`BoxError`]; the manager wraps them with
/// its own error code. Timeouts are the loader's business: the cache never
/// cancels an in-flight call.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Display + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Load the value for a key that is not cached.
    async fn load(&self, key: &Self::Key) -> Result<Self::Value, BoxError>;

    /// Refresh a stale or modified value.
    ///
    /// Default implementation ignores `previous` and calls `load`.
    async fn reload(
        &self,
        key: &Self::Key,
        previous: &Self::Value,
    ) -> Result<Self::Value, BoxError> {
        let _ = previous;
        self.load(key).await
    }

    /// Whether the source of `value` changed since it was loaded. Checked
    /// before a fresh entry is served.
    fn is_modified(&self, _key: &Self::Key, _value: &Self::Value) -> bool {
        false
    }

    /// Release a value the cache is discarding. Best effort, must not fail.
    fn destroy(&self, _key: &Self::Key, _value: &Self::Value) {}
}

// ============================================================================
// ManagedLoader
// ============================================================================

/// Decorator for loaders whose values implement [`Manageable`].
///
/// Initialises every value it hands to the cache, destroys every value the
/// cache discards, and reports values that are no longer valid as modified
/// so they are reloaded on next access.
pub struct ManagedLoader<L> {
    inner: L,
}

impl<L> ManagedLoader<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L> ManagedLoader<L>
where
    L: Loader,
    L::Value: Manageable,
{
    fn initialized(&self, key: &L::Key, value: L::Value) -> Result<L::Value, BoxError> {
        match value.initialize() {
            Ok(()) => Ok(value),
            Err(e) => {
                warn!(key = %key, error = %e, "value failed to initialize, destroying it");
                self.destroy(key, &value);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<L> Loader for ManagedLoader<L>
where
    L: Loader,
    L::Value: Manageable,
{
    type Key = L::Key;
    type Value = L::Value;

    async fn load(&self, key: &Self::Key) -> Result<Self::Value, BoxError> {
        let value = self.inner.load(key).await?;
        self.initialized(key, value)
    }

    async fn reload(
        &self,
        key: &Self::Key,
        previous: &Self::Value,
    ) -> Result<Self::Value, BoxError> {
        let value = self.inner.reload(key, previous).await?;
        self.initialized(key, value)
    }

    fn is_modified(&self, key: &Self::Key, value: &Self::Value) -> bool {
        !value.is_valid() || self.inner.is_modified(key, value)
    }

    fn destroy(&self, key: &Self::Key, value: &Self::Value) {
        self.inner.destroy(key, value);
        value.destroy();
    }
}

// ============================================================================
// ModifiableLoader
// ============================================================================

/// Decorator for loaders whose values implement [`Modifiable`].
///
/// A value that reports itself modified is reloaded on its next access even
/// inside the freshness window.
pub struct ModifiableLoader<L> {
    inner: L,
}

impl<L> ModifiableLoader<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L> Loader for ModifiableLoader<L>
where
    L: Loader,
    L::Value: Modifiable,
{
    type Key = L::Key;
    type Value = L::Value;

    async fn load(&self, key: &Self::Key) -> Result<Self::Value, BoxError> {
        self.inner.load(key).await
    }

    async fn reload(
        &self,
        key: &Self::Key,
        previous: &Self::Value,
    ) -> Result<Self::Value, BoxError> {
        self.inner.reload(key, previous).await
    }

    fn is_modified(&self, key: &Self::Key, value: &Self::Value) -> bool {
        value.is_modified() || self.inner.is_modified(key, value)
    }

    fn destroy(&self, key: &Self::Key, value: &Self::Value) {
        self.inner.destroy(key, value);
    }
}
