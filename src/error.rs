use std::io;

use thiserror::Error;

use crate::lock::LockState;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("thread already has a client: {0}")]
    AlreadyInitialized(String),

    #[error("no client installed for this thread")]
    NoClient,

    #[error("no active context on this thread")]
    NoContext,

    /// Assertion 12600: the shared hold could not be dropped cleanly.
    #[error("releaseAndWriteLock: unlock_shared failed, probably recursive (state {0})")]
    RecursiveUpgrade(LockState),

    #[error("lock acquire would recurse on this thread (state {0})")]
    RecursiveLock(LockState),

    #[error("release of {wanted} lock not held by this thread (state {found})")]
    NotHeld { wanted: &'static str, found: LockState },

    #[error("context for `{0}` was not suspended across an unlocked gap")]
    UnvalidatedContext(String),

    #[error("context used on a thread other than the one that created it")]
    WrongThread,

    #[error("database handle for `{0}` is stale")]
    StaleDatabase(String),

    #[error("context for `{0}` is suspended")]
    Suspended(String),

    #[error("database for `{0}` used while its lock is not held")]
    Unlocked(String),

    #[error("invalid namespace `{ns}`: {reason}")]
    InvalidNamespace { ns: String, reason: String },

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Programming errors in the caller; never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInitialized(_)
                | Self::NoClient
                | Self::NoContext
                | Self::RecursiveUpgrade(_)
                | Self::RecursiveLock(_)
                | Self::NotHeld { .. }
                | Self::UnvalidatedContext(_)
                | Self::WrongThread
        )
    }

    /// Numeric assertion code, where one is assigned.
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::RecursiveUpgrade(_) => Some(12600),
            _ => None,
        }
    }
}
