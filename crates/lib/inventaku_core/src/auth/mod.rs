//! Authentication and authorization logic.
//!
//! Provides the role hierarchy, the persisted session snapshot, the HTTP
//! collaborator for `/auth/*` and the [`session::SessionAuthority`] that ties
//! them together.

pub mod api;
pub mod gate;
pub mod roles;
pub mod session;
pub mod storage;

use thiserror::Error;

use self::api::ApiError;

/// Fallback shown when a failed login carries no usable message.
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed";

/// Authority errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The server answered 2xx but sent no identity.
    #[error("{0}")]
    LoginRejected(String),

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Session authority has been shut down")]
    ShutDown,
}

impl AuthError {
    /// Human-readable message for a login form.
    ///
    /// Prefers the server's `message` field, then the raw error text, then
    /// [`LOGIN_FAILED_MESSAGE`].
    pub fn user_message(&self) -> String {
        let text = match self {
            AuthError::Api(e) => e.user_message(),
            other => other.to_string(),
        };
        if text.trim().is_empty() {
            LOGIN_FAILED_MESSAGE.to_string()
        } else {
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_prefers_server_message() {
        let err = AuthError::from(ApiError::from_status(401, r#"{"message":"Bad password"}"#.into()));
        assert_eq!(err.user_message(), "Bad password");
    }

    #[test]
    fn user_message_falls_back_when_blank() {
        assert_eq!(AuthError::LoginRejected("  ".into()).user_message(), LOGIN_FAILED_MESSAGE);
    }
}
