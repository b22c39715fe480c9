use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ChangeOrigin, Storage, StorageError, StorageEvent, StorageEvents};

/// Storage file name inside the data directory
pub const STORAGE_FILE: &str = "storage.json";

type Values = BTreeMap<String, String>;

/// A key whose value differs between two snapshots, with its new value.
type Change = (String, Option<String>);

/// Key-value storage persisted as one JSON object of string values.
///
/// Several processes may share the file. Writes re-read the file first so a
/// change made elsewhere is not clobbered, and [`FileStorage::sync`] picks
/// up foreign changes and announces them as [`ChangeOrigin::External`].
/// There is no locking between processes; the last writer of a key wins.
///
/// A file that is not a JSON object of strings is moved aside to
/// `storage.json.corrupt` and the storage starts empty, so the next write
/// heals it.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    /// Contents as of the last read or write through this handle.
    seen: Mutex<Values>,
    events: StorageEvents,
}

impl FileStorage {
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let values = read_values(&path)?;
        debug!(path = %path.display(), keys = values.len(), "Storage opened");
        Ok(Self {
            path,
            seen: Mutex::new(values),
            events: StorageEvents::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and emit an external event for every key whose value
    /// changed since this handle last looked at it. Returns the number of
    /// changed keys.
    pub fn sync(&self) -> Result<usize, StorageError> {
        let changes = {
            let mut seen = self.lock();
            let current = read_values(&self.path)?;
            let changes = diff(&seen, &current);
            *seen = current;
            changes
        };
        self.announce(&changes);
        Ok(changes.len())
    }

    /// Apply one local write on top of the file's current contents. Returns
    /// the foreign changes found in the file on the way, which the caller
    /// announces before its own write.
    fn update(&self, key: &str, value: Option<&str>) -> Result<Vec<Change>, StorageError> {
        let mut seen = self.lock();
        let mut values = read_values(&self.path)?;
        let foreign = diff(&seen, &values);
        match value {
            Some(v) => values.insert(key.to_string(), v.to_string()),
            None => values.remove(key),
        };
        write_values(&self.path, &values)?;
        *seen = values;
        Ok(foreign)
    }

    fn announce(&self, changes: &[Change]) {
        for (key, value) in changes {
            debug!(key = %key, "External storage change");
            self.events.emit(key, value.clone(), ChangeOrigin::External);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Values> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let foreign = self.update(key, Some(value))?;
        self.announce(&foreign);
        self.events
            .emit(key, Some(value.to_string()), ChangeOrigin::Local);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let foreign = self.update(key, None)?;
        self.announce(&foreign);
        self.events.emit(key, None, ChangeOrigin::Local);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

fn read_values(path: &Path) -> Result<Values, StorageError> {
    if !path.exists() {
        return Ok(Values::new());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Values::new());
    }
    match serde_json::from_str(&contents) {
        Ok(values) => Ok(values),
        Err(e) => {
            let aside = path.with_extension("json.corrupt");
            match std::fs::rename(path, &aside) {
                Ok(()) => warn!(
                    error = %e,
                    moved_to = %aside.display(),
                    "Storage file is corrupt, starting empty"
                ),
                Err(rename) => warn!(
                    error = %e,
                    rename_error = %rename,
                    "Storage file is corrupt and could not be moved aside, starting empty"
                ),
            }
            Ok(Values::new())
        }
    }
}

/// Keys whose value differs from `before` to `after`, with the value in `after`.
fn diff(before: &Values, after: &Values) -> Vec<Change> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|k| before.get(*k) != after.get(*k))
        .map(|k| (k.clone(), after.get(k).cloned()))
        .collect()
}

/// Write through a temp file and rename so readers never see a torn file.
fn write_values(path: &Path, values: &Values) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let contents = serde_json::to_string_pretty(values)?;
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
