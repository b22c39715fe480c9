//! Client-side session core for the stockroom warehouse-management system.
//!
//! - [`auth`]: the session store (login, logout, revalidation, persistence)
//! - [`api`]: HTTP client for the backend's authentication endpoints
//! - [`permissions`]: permission vocabulary and the guard predicate
//! - [`routes`]: route table, menu filtering, and the authentication gate
//! - [`idle`]: forced logout after a period of inactivity
//! - [`storage`]: the durable key-value port everything persists through

pub mod api;
pub mod auth;
pub mod config;
pub mod idle;
pub mod permissions;
pub mod routes;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError, AuthApi};
pub use auth::{AuthError, CredentialStore, Credentials, Session, SessionStore, User};
pub use config::Config;
pub use idle::{Activity, IdleMonitor, IdleSettings, IdleState};
pub use permissions::{has_permission, Permission, PermissionSet};
pub use routes::{navigation, protect, resolve, Navigator, Route, RouteDecision};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
