//! The session store: single source of truth for who is logged in.
//!
//! Every transition is persisted under [`SESSION_STORAGE_KEY`] and then
//! published to subscribers, both while holding the store's control lock, so
//! no reader ever observes memory and storage disagreeing about a finished
//! transition.
//!
//! `login` and `revalidate` take a ticket from a monotonically increasing
//! sequence when they are issued, and so does `logout`. A network result is
//! applied only if its ticket is still the latest one issued; otherwise a
//! newer transition has overtaken it and the result is dropped. A dropped
//! response that arrives after a logout also drops the credential it left in
//! the API client, so the backend cannot be reached as that user afterwards.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AuthError, Credentials, PersistedSession, Session, User, SESSION_STORAGE_KEY};
use crate::api::AuthApi;
use crate::permissions::Permission;
use crate::storage::{ChangeOrigin, Storage};

#[derive(Debug, Default)]
struct Control {
    /// Ticket of the most recently issued transition.
    latest: u64,
    /// Ticket of the last logout, local or adopted.
    logged_out_at: Option<u64>,
    last_validated: Option<DateTime<Utc>>,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn Storage>,
    state: watch::Sender<Session>,
    control: Mutex<Control>,
}

/// Handle to the session state. Clones share the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Build a store from the persisted snapshot without contacting the
    /// backend. Missing or unreadable snapshots start logged out.
    pub fn restore(api: Arc<dyn AuthApi>, storage: Arc<dyn Storage>) -> Self {
        let session = match storage.get(SESSION_STORAGE_KEY) {
            Ok(Some(raw)) => PersistedSession::decode(&raw),
            Ok(None) => Session::logged_out(),
            Err(e) => {
                warn!(error = %e, "Failed to read persisted session");
                Session::logged_out()
            }
        };
        debug!(authenticated = session.is_authenticated(), "Session restored");

        let (state, _) = watch::channel(session);
        Self {
            inner: Arc::new(Inner {
                api,
                storage,
                state,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    /// Restore the persisted snapshot and, if it claims a logged-in user,
    /// confirm that claim with the backend once before returning.
    pub async fn open(api: Arc<dyn AuthApi>, storage: Arc<dyn Storage>) -> Self {
        let store = Self::restore(api, storage);
        if store.is_authenticated() {
            debug!("Reconciling persisted session with backend");
            store.revalidate().await;
        }
        store
    }

    pub fn session(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.inner.state.borrow().can(permission)
    }

    /// When the backend last confirmed the session in this process.
    pub fn last_validated(&self) -> Option<DateTime<Utc>> {
        self.control().last_validated
    }

    /// Observe every session transition. The receiver starts at the
    /// current session.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Send credentials to the backend and, on success, become that user.
    ///
    /// On failure the session is left untouched and the error is returned
    /// for the caller to report.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, AuthError> {
        let ticket = self.issue();
        match self.inner.api.login(credentials).await {
            Ok(user) => {
                let applied = self.apply_if_latest(ticket, Session::authenticated(user.clone()));
                if applied {
                    info!(user_id = %user.id, "Login successful");
                    Ok(user)
                } else {
                    warn!(user_id = %user.id, "Discarding login overtaken by a newer transition");
                    self.discard_stale_credential();
                    Err(AuthError::Superseded)
                }
            }
            Err(e) => {
                error!(error = %e, name = %credentials.name, "Login failed");
                Err(AuthError::Rejected(e))
            }
        }
    }

    /// Drop the current user. Local only; no network call is made.
    pub fn logout(&self) {
        let mut control = self.control();
        control.latest += 1;
        control.logged_out_at = Some(control.latest);
        control.last_validated = None;
        self.commit(&control, Session::logged_out());
        drop(control);

        self.inner.api.clear_credential();
        info!("Logged out");
    }

    /// Ask the backend whether the ambient credential is still good.
    ///
    /// Success refreshes the user; any failure demotes the session to
    /// logged out. Never fails itself.
    pub async fn revalidate(&self) {
        let ticket = self.issue();
        let (session, validated) = match self.inner.api.me().await {
            Ok(user) => {
                debug!(user_id = %user.id, "Session revalidated");
                (Session::authenticated(user), true)
            }
            Err(e) => {
                warn!(error = %e, "Session revalidation failed, logging out");
                (Session::logged_out(), false)
            }
        };

        let mut control = self.control();
        if control.latest != ticket {
            drop(control);
            debug!("Discarding revalidation overtaken by a newer transition");
            self.discard_stale_credential();
            return;
        }
        control.last_validated = validated.then(Utc::now);
        self.commit(&control, session);
    }

    /// Follow session changes written by other instances sharing the same
    /// storage. The returned task runs until the store is dropped or the
    /// storage stops publishing.
    pub fn follow_external_changes(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut events = self.inner.storage.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Storage notifications lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if event.origin != ChangeOrigin::External || event.key != SESSION_STORAGE_KEY {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let session = event
                    .value
                    .as_deref()
                    .map(PersistedSession::decode)
                    .unwrap_or_default();
                SessionStore { inner }.adopt(session);
            }
        })
    }

    /// Take over a session written elsewhere without writing it back.
    fn adopt(&self, session: Session) {
        let mut control = self.control();
        control.latest += 1;
        if !session.is_authenticated() {
            control.logged_out_at = Some(control.latest);
            control.last_validated = None;
        }
        debug!(authenticated = session.is_authenticated(), "Adopting external session change");
        self.inner.state.send_replace(session);
    }

    /// A dropped response may still have installed a token or cookie. If
    /// nothing was issued since the last logout, forget it again; a newer
    /// login in flight replaces it on its own.
    fn discard_stale_credential(&self) {
        let logged_out = {
            let control = self.control();
            control.logged_out_at == Some(control.latest)
        };
        if logged_out {
            debug!("Forgetting credential from a discarded response");
            self.inner.api.clear_credential();
        }
    }

    fn issue(&self) -> u64 {
        let mut control = self.control();
        control.latest += 1;
        control.latest
    }

    fn apply_if_latest(&self, ticket: u64, session: Session) -> bool {
        let mut control = self.control();
        if control.latest != ticket {
            return false;
        }
        control.last_validated = Some(Utc::now());
        self.commit(&control, session);
        true
    }

    /// Persist then publish. Callers hold the control lock.
    fn commit(&self, _control: &MutexGuard<'_, Control>, session: Session) {
        match PersistedSession::new(session.clone()).encode() {
            Ok(blob) => {
                if let Err(e) = self.inner.storage.set(SESSION_STORAGE_KEY, &blob) {
                    warn!(error = %e, "Failed to persist session");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize session"),
        }
        self.inner.state.send_replace(session);
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::STORAGE_FILE;
    use crate::storage::{FileStorage, MemoryStorage};
    use crate::test_support::{admin_user, picker_user, store_with, FakeBackend};
    use std::sync::atomic::Ordering;

    fn persisted(storage: &MemoryStorage) -> Session {
        let raw = storage.get(SESSION_STORAGE_KEY).unwrap().unwrap();
        PersistedSession::decode(&raw)
    }

    fn seeded_storage(session: Session) -> Arc<MemoryStorage> {
        let blob = PersistedSession::new(session).encode().unwrap();
        Arc::new(MemoryStorage::new().with_value(SESSION_STORAGE_KEY, &blob))
    }

    #[tokio::test]
    async fn test_login_success_sets_and_persists_session() {
        let backend = Arc::new(FakeBackend::new());
        let (store, storage) = store_with(backend);

        let user = store
            .login(&Credentials::new("Admin User", "password123"))
            .await
            .unwrap();
        assert_eq!(user.id, "usr-admin");

        let session = store.session();
        assert!(session.is_authenticated());
        assert_eq!(session.user(), Some(&admin_user()));
        assert!(store.can(Permission::ManageUsers));
        assert!(store.last_validated().is_some());

        // Reloading the blob reconstructs the in-memory session
        assert_eq!(persisted(&storage), session);
    }

    #[tokio::test]
    async fn test_login_rejected_leaves_session_unchanged() {
        let backend = Arc::new(FakeBackend::new());
        let (store, storage) = store_with(backend);

        let err = store
            .login(&Credentials::new("Admin User", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        assert!(!err.user_message().is_empty());

        assert_eq!(store.session(), Session::logged_out());
        assert!(storage.get(SESSION_STORAGE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_transport_failure_is_reported() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_offline(true);
        let (store, _) = store_with(backend);

        let err = store
            .login(&Credentials::new("Admin User", "password123"))
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "Unable to connect to server. Check your network connection."
        );
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let backend = Arc::new(FakeBackend::new());
        let (store, storage) = store_with(backend.clone());
        store
            .login(&Credentials::new("Admin User", "password123"))
            .await
            .unwrap();

        store.logout();
        let once = store.session();
        let blob_once = storage.get(SESSION_STORAGE_KEY).unwrap();
        store.logout();

        assert_eq!(once, Session::logged_out());
        assert_eq!(store.session(), once);
        assert_eq!(storage.get(SESSION_STORAGE_KEY).unwrap(), blob_once);
        assert!(store.last_validated().is_none());
        assert_eq!(backend.cleared.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_revalidates_persisted_login() {
        let backend = Arc::new(FakeBackend::new().with_session(picker_user()));
        let storage = seeded_storage(Session::authenticated(admin_user()));

        let store = SessionStore::open(backend.clone(), storage.clone()).await;

        assert_eq!(backend.me_calls.load(Ordering::SeqCst), 1);
        // The backend's answer replaces the stale persisted user wholesale
        assert_eq!(store.user(), Some(picker_user()));
        assert_eq!(persisted(&storage), store.session());
    }

    #[tokio::test]
    async fn test_open_self_heals_when_backend_disagrees() {
        let backend = Arc::new(FakeBackend::new());
        let storage = seeded_storage(Session::authenticated(admin_user()));

        let store = SessionStore::open(backend, storage.clone()).await;

        assert_eq!(store.session(), Session::logged_out());
        assert_eq!(persisted(&storage), Session::logged_out());
    }

    #[tokio::test]
    async fn test_open_self_heals_on_network_failure() {
        let backend = Arc::new(FakeBackend::new().with_session(admin_user()));
        backend.set_offline(true);
        let storage = seeded_storage(Session::authenticated(admin_user()));

        let store = SessionStore::open(backend, storage).await;
        assert!(!store.is_authenticated());
        assert!(store.user().is_none());
    }

    #[tokio::test]
    async fn test_open_logged_out_skips_backend() {
        let backend = Arc::new(FakeBackend::new().with_session(admin_user()));
        let storage = Arc::new(MemoryStorage::new());

        let store = SessionStore::open(backend.clone(), storage).await;
        assert!(!store.is_authenticated());
        assert_eq!(backend.me_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let backend = Arc::new(FakeBackend::new());
        let (store, _) = store_with(backend);
        let mut rx = store.subscribe();
        assert!(!rx.borrow().is_authenticated());

        store
            .login(&Credentials::new("Admin User", "password123"))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated());

        store.logout();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_authenticated());
    }

    #[tokio::test]
    async fn test_revalidate_overtaken_by_logout_is_discarded() {
        let backend = Arc::new(FakeBackend::new().with_session(admin_user()));
        let storage = seeded_storage(Session::authenticated(admin_user()));
        let store = SessionStore::restore(backend.clone(), storage.clone());

        let gate = backend.hold_next();
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.revalidate().await }
        });
        gate.entered.await.unwrap();

        store.logout();
        gate.release.send(()).unwrap();
        pending.await.unwrap();

        // The backend still knows the user, but the logout came later
        assert_eq!(store.session(), Session::logged_out());
        assert_eq!(persisted(&storage), Session::logged_out());
    }

    #[tokio::test]
    async fn test_stale_revalidate_failure_does_not_undo_login() {
        let backend = Arc::new(FakeBackend::new());
        let (store, _) = store_with(backend.clone());

        let gate = backend.hold_next();
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.revalidate().await }
        });
        gate.entered.await.unwrap();

        store
            .login(&Credentials::new("Floor Picker", "pick-pick"))
            .await
            .unwrap();
        backend.set_offline(true);
        gate.release.send(()).unwrap();
        pending.await.unwrap();

        assert_eq!(store.user(), Some(picker_user()));
    }

    #[tokio::test]
    async fn test_login_overtaken_by_logout_reports_superseded() {
        let backend = Arc::new(FakeBackend::new());
        let (store, _) = store_with(backend.clone());

        let gate = backend.hold_next();
        let pending = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .login(&Credentials::new("Admin User", "password123"))
                    .await
            }
        });
        gate.entered.await.unwrap();

        store.logout();
        gate.release.send(()).unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(AuthError::Superseded)));
        assert!(!store.is_authenticated());
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 1);
        // The late response must not leave the backend reachable as that user
        assert!(!backend.has_credential());
    }

    #[tokio::test]
    async fn test_revalidate_overtaken_by_logout_drops_refreshed_credential() {
        let backend = Arc::new(FakeBackend::new().with_session(admin_user()));
        let storage = seeded_storage(Session::authenticated(admin_user()));
        let store = SessionStore::restore(backend.clone(), storage);

        let gate = backend.hold_next();
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.revalidate().await }
        });
        gate.entered.await.unwrap();

        store.logout();
        gate.release.send(()).unwrap();
        pending.await.unwrap();

        assert!(!backend.has_credential());
    }

    #[tokio::test]
    async fn test_login_overtaken_by_newer_login_keeps_its_credential() {
        let backend = Arc::new(FakeBackend::new());
        let (store, _) = store_with(backend.clone());

        let gate = backend.hold_next();
        let pending = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .login(&Credentials::new("Admin User", "password123"))
                    .await
            }
        });
        gate.entered.await.unwrap();

        store
            .login(&Credentials::new("Floor Picker", "pick-pick"))
            .await
            .unwrap();
        gate.release.send(()).unwrap();

        assert!(matches!(pending.await.unwrap(), Err(AuthError::Superseded)));
        assert_eq!(store.user(), Some(picker_user()));
        assert_eq!(backend.login_calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.cleared.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_follows_external_session_changes() {
        let backend = Arc::new(FakeBackend::new());
        let (store, storage) = store_with(backend);
        let task = store.follow_external_changes();
        let mut rx = store.subscribe();

        let blob = PersistedSession::new(Session::authenticated(admin_user()))
            .encode()
            .unwrap();
        storage.apply_external(SESSION_STORAGE_KEY, Some(&blob));
        rx.changed().await.unwrap();
        assert_eq!(store.user(), Some(admin_user()));

        storage.apply_external(SESSION_STORAGE_KEY, None);
        rx.changed().await.unwrap();
        assert!(!store.is_authenticated());

        task.abort();
    }

    fn shared_file(dir: &tempfile::TempDir) -> Arc<FileStorage> {
        Arc::new(FileStorage::open(dir.path().join(STORAGE_FILE)).unwrap())
    }

    #[tokio::test]
    async fn test_login_in_one_instance_is_restored_by_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new());

        let first = SessionStore::restore(backend.clone(), shared_file(&dir));
        first
            .login(&Credentials::new("Floor Picker", "pick-pick"))
            .await
            .unwrap();
        drop(first);

        let second = SessionStore::open(backend.clone(), shared_file(&dir)).await;
        assert_eq!(backend.me_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.user(), Some(picker_user()));
        assert!(second.last_validated().is_some());
    }

    #[tokio::test]
    async fn test_adopts_logout_written_by_another_instance() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new());

        let here_storage = shared_file(&dir);
        let here = SessionStore::restore(backend.clone(), here_storage.clone());
        here.login(&Credentials::new("Admin User", "password123"))
            .await
            .unwrap();

        let there = SessionStore::restore(backend.clone(), shared_file(&dir));
        assert_eq!(there.user(), Some(admin_user()));

        let task = here.follow_external_changes();
        let mut rx = here.subscribe();

        there.logout();
        assert_eq!(here_storage.sync().unwrap(), 1);
        rx.changed().await.unwrap();
        assert!(!here.is_authenticated());

        // Adopted, not written back: the file still holds the other logout
        assert_eq!(here_storage.sync().unwrap(), 0);
        task.abort();
    }

    #[tokio::test]
    async fn test_foreign_logout_is_seen_when_this_instance_writes_first() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new());

        let here_storage = shared_file(&dir);
        let here = SessionStore::restore(backend.clone(), here_storage.clone());
        here.login(&Credentials::new("Admin User", "password123"))
            .await
            .unwrap();
        let there = SessionStore::restore(backend.clone(), shared_file(&dir));

        let task = here.follow_external_changes();
        let mut rx = here.subscribe();

        there.logout();
        // Any local write picks the foreign logout up on the way
        here_storage.set("autoLogoutEnabled", "true").unwrap();
        rx.changed().await.unwrap();
        assert!(!here.is_authenticated());

        task.abort();
    }

    #[tokio::test]
    async fn test_login_persists_over_a_corrupt_storage_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORAGE_FILE), "{\"auth-storage\": tru").unwrap();
        let backend = Arc::new(FakeBackend::new());

        let store = SessionStore::restore(backend.clone(), shared_file(&dir));
        assert!(!store.is_authenticated());
        store
            .login(&Credentials::new("Admin User", "password123"))
            .await
            .unwrap();

        let reopened = SessionStore::restore(backend, shared_file(&dir));
        assert_eq!(reopened.user(), Some(admin_user()));
    }
}
