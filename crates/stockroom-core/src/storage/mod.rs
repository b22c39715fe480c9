//! Durable key-value storage behind a small port.
//!
//! The session store and idle settings only ever talk to the [`Storage`]
//! trait, so the backing mechanism can differ per platform:
//! - `MemoryStorage`: process-local, used in tests
//! - `FileStorage`: a JSON file shared by every process of one user
//!
//! Every write is announced on a broadcast channel. Writes made through the
//! same handle arrive as [`ChangeOrigin::Local`]; changes picked up from
//! another process arrive as [`ChangeOrigin::External`].

pub mod file;
pub mod memory;

use thiserror::Error;
use tokio::sync::broadcast;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Capacity of the change notification channel.
/// Slow subscribers that fall further behind see a `Lagged` error and
/// should re-read the keys they care about.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode storage: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Written through this handle.
    Local,
    /// Observed from another process sharing the same backing store.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// New value, `None` when the key was removed.
    pub value: Option<String>,
    pub origin: ChangeOrigin,
}

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Receive a notification for every change made after this call.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Fan-out helper shared by the storage implementations.
#[derive(Debug, Clone)]
pub(crate) struct StorageEvents {
    tx: broadcast::Sender<StorageEvent>,
}

impl StorageEvents {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, key: &str, value: Option<String>, origin: ChangeOrigin) {
        // No subscribers is not an error
        let _ = self.tx.send(StorageEvent {
            key: key.to_string(),
            value,
            origin,
        });
    }
}
