//! tenant-cache error types

use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed error returned by loaders.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Shared loader failure.
///
/// Wrapped in an `Arc` so one failed attempt can be handed to every caller
/// that was waiting on it.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// tenant-cache error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    // Loader errors
    /// Initial population of a key failed. No entry was created.
    #[error("[{code}] {cache}: failed to load '{key}': {source}")]
    Load {
        code: &'static str,
        cache: String,
        key: String,
        #[source]
        source: SharedError,
    },

    /// Refreshing a stale or modified entry failed. The previous value is
    /// still in the table.
    #[error("[{code}] {cache}: failed to reload '{key}': {source}")]
    Reload {
        code: &'static str,
        cache: String,
        key: String,
        #[source]
        source: SharedError,
    },

    // Lifecycle errors
    #[error("{component} is {state}, cannot {operation}")]
    InvalidState {
        component: String,
        state: &'static str,
        operation: &'static str,
    },

    /// A manager panicked while being swept by the cleaner.
    #[error("cache '{cache}' panicked during {operation}")]
    ManagerPanicked {
        cache: String,
        operation: &'static str,
    },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Domain error code of a load/reload failure.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            CacheError::Load { code, .. } | CacheError::Reload { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether this error came from the loader (initial load or reload).
    pub fn is_load_failure(&self) -> bool {
        matches!(self, CacheError::Load { .. } | CacheError::Reload { .. })
    }

    /// Whether this error reports an operation on a destroyed, uninitialised
    /// or stopped component.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, CacheError::InvalidState { .. })
    }

    pub(crate) fn invalid_state(
        component: impl Into<String>,
        state: &'static str,
        operation: &'static str,
    ) -> Self {
        CacheError::InvalidState {
            component: component.into(),
            state,
            operation,
        }
    }
}

/// Result type alias for tenant-cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
