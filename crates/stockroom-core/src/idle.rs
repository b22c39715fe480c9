//! Forced logout after a period without user input.
//!
//! The monitor is either armed (a countdown is running) or disarmed. Which
//! one is decided by the `autoLogoutEnabled` storage key, re-read whenever
//! the storage announces a change to it, whether the change was made in this
//! process or picked up from another one.
//!
//! While armed, every activity signal restarts the countdown at its full
//! length. When the countdown runs out the session is logged out and the
//! navigator is sent to the login screen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::auth::SessionStore;
use crate::routes::{Navigator, LOGIN_PATH};
use crate::storage::{Storage, StorageError};

/// Storage key of the idle-logout toggle. Values are the strings
/// `"true"` and `"false"`.
pub const AUTO_LOGOUT_KEY: &str = "autoLogoutEnabled";

/// Default inactivity period before a forced logout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// User input that counts as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Armed,
    Disarmed,
}

/// Reads and writes the persisted idle-logout toggle.
#[derive(Clone)]
pub struct IdleSettings {
    storage: Arc<dyn Storage>,
}

impl IdleSettings {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Only the exact string `"true"` enables the feature; a missing or
    /// unreadable value leaves it off.
    pub fn is_enabled(&self) -> bool {
        match self.storage.get(AUTO_LOGOUT_KEY) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                warn!(error = %e, "Failed to read idle logout setting");
                false
            }
        }
    }

    /// Persist the toggle. The storage's change notification tells running
    /// monitors in this process about it.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), StorageError> {
        let value = if enabled { "true" } else { "false" };
        self.storage.set(AUTO_LOGOUT_KEY, value)
    }
}

/// A running idle monitor. Dropping it cancels any pending countdown.
pub struct IdleMonitor {
    activity: mpsc::UnboundedSender<Activity>,
    state: watch::Receiver<IdleState>,
    task: JoinHandle<()>,
}

impl IdleMonitor {
    /// Start watching. Must be called inside a tokio runtime.
    pub fn spawn(
        store: SessionStore,
        storage: Arc<dyn Storage>,
        navigator: Arc<dyn Navigator>,
        timeout: Duration,
    ) -> Self {
        let settings = IdleSettings::new(storage.clone());
        let enabled = settings.is_enabled();
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(state_for(enabled));

        let worker = Worker {
            store,
            settings,
            navigator,
            timeout,
            enabled,
            state: state_tx,
        };
        let events = storage.subscribe();
        let task = tokio::spawn(worker.run(activity_rx, events));
        debug!(enabled, timeout_secs = timeout.as_secs(), "Idle monitor started");

        Self {
            activity: activity_tx,
            state: state_rx,
            task,
        }
    }

    /// Report user input.
    pub fn record(&self, activity: Activity) {
        // Only fails once the worker has stopped, when nothing is armed
        let _ = self.activity.send(activity);
    }

    pub fn state(&self) -> IdleState {
        *self.state.borrow()
    }

    /// Stop the monitor, cancelling any pending countdown.
    pub fn shutdown(self) {}
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn state_for(enabled: bool) -> IdleState {
    if enabled {
        IdleState::Armed
    } else {
        IdleState::Disarmed
    }
}

struct Worker {
    store: SessionStore,
    settings: IdleSettings,
    navigator: Arc<dyn Navigator>,
    timeout: Duration,
    enabled: bool,
    state: watch::Sender<IdleState>,
}

impl Worker {
    async fn run(
        mut self,
        mut activity: mpsc::UnboundedReceiver<Activity>,
        mut events: broadcast::Receiver<crate::storage::StorageEvent>,
    ) {
        let countdown = tokio::time::sleep(self.timeout);
        tokio::pin!(countdown);
        // Whether the countdown still has to fire
        let mut pending = self.enabled;

        loop {
            tokio::select! {
                () = &mut countdown, if self.enabled && pending => {
                    pending = false;
                    self.expire();
                }
                signal = activity.recv() => {
                    let Some(signal) = signal else { break };
                    if self.enabled {
                        trace!(?signal, "Activity, restarting idle countdown");
                        countdown.as_mut().reset(Instant::now() + self.timeout);
                        pending = true;
                    }
                }
                event = events.recv() => {
                    let reread = match event {
                        Ok(event) => event.key == AUTO_LOGOUT_KEY,
                        Err(broadcast::error::RecvError::Lagged(_)) => true,
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    if reread {
                        let enabled = self.settings.is_enabled();
                        if enabled != self.enabled {
                            self.set_enabled(enabled);
                            if enabled {
                                countdown.as_mut().reset(Instant::now() + self.timeout);
                            }
                            pending = enabled;
                        }
                    }
                }
            }
        }
        debug!("Idle monitor stopped");
    }

    fn set_enabled(&mut self, enabled: bool) {
        debug!(enabled, "Idle logout setting changed");
        self.enabled = enabled;
        self.state.send_replace(state_for(enabled));
    }

    fn expire(&self) {
        info!(
            timeout_secs = self.timeout.as_secs(),
            "No activity within idle timeout, logging out"
        );
        self.store.logout();
        self.navigator.navigate(LOGIN_PATH);
    }
}
