//! Lifecycle and staleness capabilities.
//!
//! [`Status`] is shared by cache managers and [`Manageable`] values.
//! [`Manageable`] and [`Modifiable`] are optional capabilities of cached
//! value types; a manager learns about them through the loader decorators in
//! [`crate::loader`], chosen once when the manager is wired up.
//!
//! A consumer must not hold a [`Manageable`] value across requests: the
//! manager destroys it when it is reloaded or evicted. Fetch it from the
//! manager on every use.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::BoxError;

/// Lifecycle status of a manager or a managed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Constructed, not yet initialised.
    New,
    /// Initialised and serving.
    Initialized,
    /// Torn down. Terminal.
    Destroyed,
}

impl Status {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Status::New => 0,
            Status::Initialized => 1,
            Status::Destroyed => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::New,
            1 => Status::Initialized,
            _ => Status::Destroyed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Initialized => "initialized",
            Status::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hot-swappable resource whose lifetime ends at explicit destruction.
///
/// Implementations must tolerate `destroy` being the last call they see;
/// the cache calls it exactly once per value it discards.
pub trait Manageable: Send + Sync {
    /// Prepare the value for use. Called once after it has been loaded.
    fn initialize(&self) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Release the resources held by this value.
    fn destroy(&self);

    /// Current lifecycle status.
    fn status(&self) -> Status;

    /// Whether the value can still be served. An invalid value is reloaded
    /// on its next access.
    fn is_valid(&self) -> bool {
        self.status() == Status::Initialized
    }
}

/// A value that can tell whether its backing source changed since it was
/// loaded.
pub trait Modifiable: Send + Sync {
    fn is_modified(&self) -> bool;
}

impl<T: Manageable + ?Sized> Manageable for Arc<T> {
    fn initialize(&self) -> std::result::Result<(), BoxError> {
        (**self).initialize()
    }

    fn destroy(&self) {
        (**self).destroy()
    }

    fn status(&self) -> Status {
        (**self).status()
    }

    fn is_valid(&self) -> bool {
        (**self).is_valid()
    }
}

impl<T: Modifiable + ?Sized> Modifiable for Arc<T> {
    fn is_modified(&self) -> bool {
        (**self).is_modified()
    }
}
