use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::permissions::{self, Permission, PermissionSet};

/// Storage key holding the serialized session snapshot.
pub const SESSION_STORAGE_KEY: &str = "auth-storage";

/// Version stamped into the persisted blob.
/// Blobs carrying any other version are discarded on restore.
pub const SESSION_BLOB_VERSION: u32 = 0;

/// Identity record returned by the backend on login and `/api/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "permissions::deserialize_lenient")]
    pub permissions: PermissionSet,
}

impl User {
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Login form payload sent to `POST /api/auth/login`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub name: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
}

impl Credentials {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            remember_me: None,
        }
    }

    pub fn remember_me(mut self, remember: bool) -> Self {
        self.remember_me = Some(remember);
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// Who is logged in.
///
/// `is_authenticated` holds exactly when `user` is present; the fields are
/// private so the pair can only change together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SessionRepr")]
pub struct Session {
    user: Option<User>,
    is_authenticated: bool,
}

impl Session {
    pub fn logged_out() -> Self {
        Self::default()
    }

    pub fn authenticated(user: User) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// Permissions granted to the current user, empty when logged out.
    pub fn permissions(&self) -> PermissionSet {
        self.user
            .as_ref()
            .map(|u| u.permissions.clone())
            .unwrap_or_default()
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.user.as_ref().map(|u| u.can(permission)).unwrap_or(false)
    }
}

/// Wire shape of a session as found in storage, before normalization.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRepr {
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    is_authenticated: bool,
}

impl From<SessionRepr> for Session {
    fn from(repr: SessionRepr) -> Self {
        match (repr.user, repr.is_authenticated) {
            (Some(user), true) => Session::authenticated(user),
            (None, false) => Session::logged_out(),
            (user, flag) => {
                warn!(
                    has_user = user.is_some(),
                    is_authenticated = flag,
                    "Inconsistent persisted session, treating as logged out"
                );
                Session::logged_out()
            }
        }
    }
}

/// The full snapshot written under [`SESSION_STORAGE_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub state: Session,
    pub version: u32,
}

impl PersistedSession {
    pub fn new(state: Session) -> Self {
        Self {
            state,
            version: SESSION_BLOB_VERSION,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a stored blob, falling back to a logged-out session when the
    /// blob is unreadable or was written by an incompatible version.
    pub fn decode(raw: &str) -> Session {
        match serde_json::from_str::<PersistedSession>(raw) {
            Ok(blob) if blob.version == SESSION_BLOB_VERSION => blob.state,
            Ok(blob) => {
                warn!(version = blob.version, "Discarding session blob with unknown version");
                Session::logged_out()
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse persisted session");
                Session::logged_out()
            }
        }
    }
}
