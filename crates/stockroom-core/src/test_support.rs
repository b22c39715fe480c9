//! Fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;

use crate::api::{ApiError, AuthApi};
use crate::auth::{Credentials, SessionStore, User};
use crate::permissions::Permission;
use crate::routes::Navigator;
use crate::storage::{MemoryStorage, Storage};

pub fn admin_user() -> User {
    User {
        id: "usr-admin".to_string(),
        name: "Admin User".to_string(),
        email: Some("admin@example.com".to_string()),
        role: Some("admin".to_string()),
        permissions: [
            Permission::ManageUsers,
            Permission::ViewReports,
            Permission::ManageLocations,
            Permission::ManageInventory,
        ]
        .into_iter()
        .collect(),
    }
}

pub fn picker_user() -> User {
    User {
        id: "usr-picker".to_string(),
        name: "Floor Picker".to_string(),
        email: None,
        role: Some("picker".to_string()),
        permissions: [Permission::ManageOrders].into_iter().collect(),
    }
}

/// Lets a test hold a backend call in flight.
pub struct Gate {
    /// Fires once the call has reached the backend.
    pub entered: oneshot::Receiver<()>,
    /// Send to let the call respond.
    pub release: oneshot::Sender<()>,
}

struct HeldCall {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-process stand-in for the warehouse backend.
///
/// Login checks name and password against known accounts and starts a
/// server-side session; `/me` answers with that session's user or 401.
#[derive(Default)]
pub struct FakeBackend {
    accounts: HashMap<String, (String, User)>,
    current: Mutex<Option<User>>,
    offline: AtomicBool,
    held: Mutex<VecDeque<HeldCall>>,
    /// Whether the client side holds a credential the backend would accept.
    credential: AtomicBool,
    pub login_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub cleared: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
            .with_account("Admin User", "password123", admin_user())
            .with_account("Floor Picker", "pick-pick", picker_user())
    }

    pub fn with_account(mut self, name: &str, password: &str, user: User) -> Self {
        self.accounts
            .insert(name.to_string(), (password.to_string(), user));
        self
    }

    /// Pretend a server-side session for `user` already exists.
    pub fn with_session(self, user: User) -> Self {
        self.set_session(Some(user));
        self
    }

    pub fn set_session(&self, user: Option<User>) {
        *self.current.lock().unwrap() = user;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold the next backend call (login or me) until released.
    pub fn hold_next(&self) -> Gate {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.held.lock().unwrap().push_back(HeldCall {
            entered: entered_tx,
            release: release_rx,
        });
        Gate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    async fn wait_if_held(&self) {
        let held = self.held.lock().unwrap().pop_front();
        if let Some(call) = held {
            let _ = call.entered.send(());
            let _ = call.release.await;
        }
    }

    pub fn has_credential(&self) -> bool {
        self.credential.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ApiError::NetworkError("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl AuthApi for FakeBackend {
    fn login<'a>(&'a self, credentials: &'a Credentials) -> BoxFuture<'a, Result<User, ApiError>> {
        async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_if_held().await;
            self.check_online()?;
            match self.accounts.get(&credentials.name) {
                Some((password, user)) if *password == credentials.password => {
                    self.set_session(Some(user.clone()));
                    self.credential.store(true, Ordering::SeqCst);
                    Ok(user.clone())
                }
                _ => Err(ApiError::Unauthorized("Invalid credentials".to_string())),
            }
        }
        .boxed()
    }

    fn me(&self) -> BoxFuture<'_, Result<User, ApiError>> {
        async move {
            self.me_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_if_held().await;
            self.check_online()?;
            let user = self
                .current
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ApiError::Unauthorized(String::new()))?;
            // A refreshed token or cookie comes back with the answer
            self.credential.store(true, Ordering::SeqCst);
            Ok(user)
        }
        .boxed()
    }

    fn clear_credential(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        self.credential.store(false, Ordering::SeqCst);
    }
}

/// A restored (not revalidated) store over fresh memory storage.
pub fn store_with(backend: Arc<FakeBackend>) -> (SessionStore, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let store = SessionStore::restore(backend, storage.clone() as Arc<dyn Storage>);
    (store, storage)
}

/// Navigator that remembers where it was sent.
#[derive(Default)]
pub struct RecordingNavigator {
    paths: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}
