use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    Rejected(#[from] ApiError),

    #[error("Login was overtaken by a newer session change")]
    Superseded,
}

impl AuthError {
    /// Message to show next to the login form. Never empty.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Rejected(e) => e.user_message(),
            AuthError::Superseded => {
                "Your session changed while logging in. Please try again.".to_string()
            }
        }
    }
}
