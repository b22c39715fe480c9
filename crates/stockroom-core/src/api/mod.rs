//! REST API client module for the warehouse backend.
//!
//! This module provides the `ApiClient` for the two authentication calls
//! the session core needs (`POST /api/auth/login`, `GET /api/auth/me`),
//! and the `AuthApi` seam the session store is written against.

pub mod client;
pub mod error;

use futures::future::BoxFuture;

pub use client::{ApiClient, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;

use crate::auth::{Credentials, User};

/// Authentication calls consumed by the session store.
///
/// Implementations classify HTTP error statuses and transport failures
/// (timeout, refused connection, DNS) into [`ApiError`] and apply their own
/// request timeout.
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for the authenticated user.
    fn login<'a>(&'a self, credentials: &'a Credentials) -> BoxFuture<'a, Result<User, ApiError>>;

    /// Fetch the user the ambient credential belongs to.
    fn me(&self) -> BoxFuture<'_, Result<User, ApiError>>;

    /// Forget any ambient credential held out of band. Called on logout.
    fn clear_credential(&self) {}
}
