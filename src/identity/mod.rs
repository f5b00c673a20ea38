//! Identity provider abstraction.
//!
//! The facade drives sign-up, sign-in and account changes through an
//! [`IdentityProvider`]. The provider owns the current session; the facade
//! only reacts to it and mirrors profile fields into the `users`
//! collection.

mod accounts;
mod action_codes;
mod error;
mod federated;
mod local;
mod observer;
mod password;

pub use accounts::{AccountStore, SqliteAccountStore, StoredAccount};
pub use action_codes::{ActionCode, ActionCodeStore, ActionKind};
pub use error::{get_auth_error_message, AuthError, AuthErrorCode, DEFAULT_AUTH_MESSAGE};
pub use federated::{
    ConsentFlow, ConsentRequest, FederatedProfile, NoConsent, Prompt, ScriptedConsent,
};
pub use local::{IdentitySettings, LocalIdentityProvider};
pub use observer::SessionObserver;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::models::{ProfileUpdate, Session};

/// Account and session operations the facade needs.
///
/// Operations marked *sensitive* require a recent sign-in; call
/// [`IdentityProvider::reauthenticate`] first when the session is old.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates a password account and signs it in.
    async fn create_account(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, AuthError>;

    /// Runs the federated consent flow and signs the consenting user in,
    /// creating the account on first use.
    async fn sign_in_with_federated(&self, request: &ConsentRequest)
        -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Mails a password reset link to the account with this email.
    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    /// Mails a verification link to the signed-in user.
    async fn send_email_verification(&self) -> Result<(), AuthError>;

    /// Sets a new password using a code from a reset link.
    async fn confirm_password_reset(&self, code: &str, new_password: &str)
        -> Result<(), AuthError>;

    /// Marks an email verified using a code from a verification link.
    async fn apply_email_verification(&self, code: &str) -> Result<(), AuthError>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Session, AuthError>;

    /// Confirms the signed-in user's password and refreshes the sign-in time.
    async fn reauthenticate(&self, password: &str) -> Result<(), AuthError>;

    /// Changes the signed-in user's email. Sensitive.
    async fn update_email(&self, new_email: &str) -> Result<Session, AuthError>;

    /// Changes the signed-in user's password. Sensitive.
    async fn update_password(&self, new_password: &str) -> Result<(), AuthError>;

    /// Deletes the signed-in user's account and signs out. Sensitive.
    async fn delete_current_user(&self) -> Result<(), AuthError>;

    fn current_session(&self) -> Option<Session>;

    /// Receiver updated on every sign-in and sign-out.
    fn session_changes(&self) -> watch::Receiver<Option<Session>>;
}
