//! Authentication module for managing the client-side session.
//!
//! This module provides:
//! - `Session`/`User`: who is logged in and what they may do
//! - `SessionStore`: login, logout, and revalidation with durable persistence
//! - `CredentialStore`: OS keychain storage for the backend's bearer token
//!
//! The session snapshot is persisted under the `auth-storage` key and
//! reconciled with the backend once at startup.

pub mod credentials;
pub mod error;
pub mod session;
pub mod store;

pub use credentials::CredentialStore;
pub use error::AuthError;
pub use session::{
    Credentials, PersistedSession, Session, User, SESSION_BLOB_VERSION, SESSION_STORAGE_KEY,
};
pub use store::SessionStore;
