//! Identity errors and their user-facing messages.

use std::fmt;
use thiserror::Error;

use crate::mail::MailError;
use crate::store::StoreError;

/// Sentence shown for any code without a dedicated message.
pub const DEFAULT_AUTH_MESSAGE: &str = "An error occurred. Please try again.";

/// Error codes reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    EmailAlreadyInUse,
    InvalidEmail,
    OperationNotAllowed,
    WeakPassword,
    UserDisabled,
    UserNotFound,
    WrongPassword,
    InvalidCredential,
    TooManyRequests,
    PopupClosedByUser,
    PopupBlocked,
    CancelledPopupRequest,
    ExpiredActionCode,
    InvalidActionCode,
    NetworkRequestFailed,
    RequiresRecentLogin,
    /// Any code the table does not know.
    Other(String),
}

impl AuthErrorCode {
    const KNOWN: [AuthErrorCode; 16] = [
        AuthErrorCode::EmailAlreadyInUse,
        AuthErrorCode::InvalidEmail,
        AuthErrorCode::OperationNotAllowed,
        AuthErrorCode::WeakPassword,
        AuthErrorCode::UserDisabled,
        AuthErrorCode::UserNotFound,
        AuthErrorCode::WrongPassword,
        AuthErrorCode::InvalidCredential,
        AuthErrorCode::TooManyRequests,
        AuthErrorCode::PopupClosedByUser,
        AuthErrorCode::PopupBlocked,
        AuthErrorCode::CancelledPopupRequest,
        AuthErrorCode::ExpiredActionCode,
        AuthErrorCode::InvalidActionCode,
        AuthErrorCode::NetworkRequestFailed,
        AuthErrorCode::RequiresRecentLogin,
    ];

    /// The wire form of the code, e.g. `auth/wrong-password`.
    pub fn as_str(&self) -> &str {
        match self {
            AuthErrorCode::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthErrorCode::InvalidEmail => "auth/invalid-email",
            AuthErrorCode::OperationNotAllowed => "auth/operation-not-allowed",
            AuthErrorCode::WeakPassword => "auth/weak-password",
            AuthErrorCode::UserDisabled => "auth/user-disabled",
            AuthErrorCode::UserNotFound => "auth/user-not-found",
            AuthErrorCode::WrongPassword => "auth/wrong-password",
            AuthErrorCode::InvalidCredential => "auth/invalid-credential",
            AuthErrorCode::TooManyRequests => "auth/too-many-requests",
            AuthErrorCode::PopupClosedByUser => "auth/popup-closed-by-user",
            AuthErrorCode::PopupBlocked => "auth/popup-blocked",
            AuthErrorCode::CancelledPopupRequest => "auth/cancelled-popup-request",
            AuthErrorCode::ExpiredActionCode => "auth/expired-action-code",
            AuthErrorCode::InvalidActionCode => "auth/invalid-action-code",
            AuthErrorCode::NetworkRequestFailed => "auth/network-request-failed",
            AuthErrorCode::RequiresRecentLogin => "auth/requires-recent-login",
            AuthErrorCode::Other(code) => code,
        }
    }

    /// Parses a wire code. Unknown codes become [`AuthErrorCode::Other`].
    pub fn from_code(code: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|known| known.as_str() == code)
            .unwrap_or_else(|| AuthErrorCode::Other(code.to_string()))
    }

    /// The user-facing sentence for this code.
    pub fn message(&self) -> &'static str {
        match self {
            AuthErrorCode::EmailAlreadyInUse => {
                "This email is already registered. Please sign in or use a different email."
            }
            AuthErrorCode::InvalidEmail => "Invalid email address format.",
            AuthErrorCode::OperationNotAllowed => "Email/password accounts are not enabled.",
            AuthErrorCode::WeakPassword => "Password should be at least 6 characters.",
            AuthErrorCode::UserDisabled => {
                "This account has been disabled. Please contact support."
            }
            AuthErrorCode::UserNotFound => "No account found with this email.",
            AuthErrorCode::WrongPassword => "Incorrect password. Please try again.",
            AuthErrorCode::InvalidCredential => {
                "Invalid email or password. Please check and try again."
            }
            AuthErrorCode::TooManyRequests => "Too many failed attempts. Please try again later.",
            AuthErrorCode::PopupClosedByUser => "Sign in was cancelled. Please try again.",
            AuthErrorCode::PopupBlocked => "Popup was blocked by browser. Please allow popups.",
            AuthErrorCode::CancelledPopupRequest => "Sign in was cancelled.",
            AuthErrorCode::ExpiredActionCode => {
                "Password reset link has expired. Please request a new one."
            }
            AuthErrorCode::InvalidActionCode => {
                "Invalid password reset link. Please request a new one."
            }
            AuthErrorCode::NetworkRequestFailed => {
                "Network error. Please check your internet connection."
            }
            AuthErrorCode::RequiresRecentLogin => "Please sign in again to complete this action.",
            AuthErrorCode::Other(_) => DEFAULT_AUTH_MESSAGE,
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a provider error code to its user-facing sentence.
pub fn get_auth_error_message(code: &str) -> &'static str {
    AuthErrorCode::from_code(code).message()
}

/// Errors from identity operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity provider rejected the request.
    #[error("identity provider error: {0}")]
    Provider(AuthErrorCode),
    /// The operation needs a signed-in user.
    #[error("No user signed in")]
    NoSession,
    /// The mirrored `users` record could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A verification or reset mail could not be sent.
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl AuthError {
    /// The provider code, if the error came from the provider.
    pub fn code(&self) -> Option<&AuthErrorCode> {
        match self {
            AuthError::Provider(code) => Some(code),
            _ => None,
        }
    }

    /// The sentence to show the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::Provider(code) => code.message(),
            _ => DEFAULT_AUTH_MESSAGE,
        }
    }
}

impl From<AuthErrorCode> for AuthError {
    fn from(code: AuthErrorCode) -> Self {
        AuthError::Provider(code)
    }
}
