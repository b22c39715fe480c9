use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error payload shapes the backend is known to send.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
    error: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Pull the human-readable message out of an error body.
    ///
    /// JSON bodies of the form `{"message": ...}` or `{"error": ...}` yield
    /// their message; anything else is returned as (truncated) text.
    fn payload_message(body: &str) -> String {
        let message = serde_json::from_str::<ErrorPayload>(body)
            .ok()
            .and_then(|p| p.message.or(p.error))
            .unwrap_or_else(|| body.trim().to_string());
        Self::truncate_body(&message)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::payload_message(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Message suitable for showing next to the login form.
    ///
    /// Never empty: when the backend sent no usable payload a generic
    /// description of the failure class is used instead.
    pub fn user_message(&self) -> String {
        let (payload, fallback) = match self {
            ApiError::Unauthorized(m) => (m.as_str(), "Invalid username or password"),
            ApiError::AccessDenied(m) => {
                (m.as_str(), "You do not have access to this resource")
            }
            ApiError::NotFound(m) => {
                (m.as_str(), "The server could not find the requested resource")
            }
            ApiError::RateLimited => ("", "Too many attempts. Please wait and try again."),
            ApiError::ServerError(m) => {
                (m.as_str(), "The server encountered an error. Please try again later.")
            }
            ApiError::Timeout => ("", "Connection timed out. Please try again."),
            ApiError::NetworkError(_) => {
                ("", "Unable to connect to server. Check your network connection.")
            }
            ApiError::InvalidResponse(_) => ("", "Unexpected response from server"),
        };
        if payload.trim().is_empty() {
            fallback.to_string()
        } else {
            payload.to_string()
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::from_status(status, "")
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}
