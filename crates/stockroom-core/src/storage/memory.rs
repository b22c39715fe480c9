use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::{ChangeOrigin, Storage, StorageError, StorageEvent, StorageEvents};

/// Process-local storage. Nothing survives a restart.
#[derive(Debug)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    events: StorageEvents,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            events: StorageEvents::new(),
        }
    }

    /// Seed a value without emitting a notification, as if it had been
    /// written before this process started.
    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.lock().insert(key.to_string(), value.to_string());
        self
    }

    /// Apply a change made by some other instance sharing this store.
    pub fn apply_external(&self, key: &str, value: Option<&str>) {
        {
            let mut values = self.lock();
            match value {
                Some(v) => values.insert(key.to_string(), v.to_string()),
                None => values.remove(key),
            };
        }
        self.events
            .emit(key, value.map(str::to_string), ChangeOrigin::External);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value.to_string());
        self.events
            .emit(key, Some(value.to_string()), ChangeOrigin::Local);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = self.lock().remove(key);
        if removed.is_some() {
            self.events.emit(key, None, ChangeOrigin::Local);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
