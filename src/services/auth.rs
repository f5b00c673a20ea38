//! Authentication operations.
//!
//! Every operation talks to the identity provider first and then mirrors
//! what changed into the `users` collection. Failures come back as an
//! [`Envelope`] carrying the user-facing sentence and the provider code.

use super::SiteServices;
use crate::identity::{AuthError, ConsentRequest, SessionObserver};
use crate::listener::ListenerHandle;
use crate::models::{Collection, Envelope, Fields, ProfileUpdate, Session, SessionEvent};

fn auth_failure(err: &AuthError) -> Envelope {
    Envelope::failed(err.user_message()).with_code(err.code().map(|c| c.to_string()))
}

impl SiteServices {
    /// Creates a password account, sends a verification mail and mirrors
    /// the new user into `users`.
    pub async fn register_with_email(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Envelope {
        match self.register(email, password, display_name).await {
            Ok(session) => {
                tracing::info!("User registered: {}", session.email);
                Envelope::ok("Registration successful! Please verify your email.")
                    .with_user(session)
            }
            Err(e) => {
                tracing::error!("Registration error: {}", e);
                auth_failure(&e)
            }
        }
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Session, AuthError> {
        let mut session = self.identity.create_account(email, password).await?;

        if let Some(name) = display_name.filter(|n| !n.is_empty()) {
            session = self
                .identity
                .update_profile(&ProfileUpdate::display_name(name))
                .await?;
        }

        self.identity.send_email_verification().await?;
        self.add_document(Collection::Users.as_str(), Self::new_user_fields(&session))
            .await?;
        Ok(session)
    }

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> Envelope {
        match self.identity.sign_in_with_password(email, password).await {
            Ok(session) => {
                tracing::info!("User signed in: {}", session.email);
                self.update_user_last_login(&session.uid).await;
                Envelope::ok("Sign in successful!").with_user(session)
            }
            Err(e) => {
                tracing::error!("Sign in error: {}", e);
                auth_failure(&e)
            }
        }
    }

    /// Signs in through the federated consent flow, asking the user to pick
    /// an account. The first sign-in creates the `users` record.
    pub async fn sign_in_with_federated(&self) -> Envelope {
        match self.federated_sign_in().await {
            Ok(session) => {
                tracing::info!("Federated sign in: {}", session.email);
                Envelope::ok("Google sign in successful!").with_user(session)
            }
            Err(e) => {
                tracing::error!("Federated sign in error: {}", e);
                auth_failure(&e)
            }
        }
    }

    async fn federated_sign_in(&self) -> Result<Session, AuthError> {
        let session = self
            .identity
            .sign_in_with_federated(&ConsentRequest::google())
            .await?;

        if self.find_user_record(&session.uid).await?.is_none() {
            self.add_document(Collection::Users.as_str(), Self::new_user_fields(&session))
                .await?;
        } else {
            self.update_user_last_login(&session.uid).await;
        }
        Ok(session)
    }

    pub async fn sign_out(&self) -> Envelope {
        match self.identity.sign_out().await {
            Ok(()) => {
                tracing::info!("User signed out");
                Envelope::ok("Signed out successfully!")
            }
            Err(e) => {
                tracing::error!("Sign out error: {}", e);
                Envelope::failed(e.to_string())
            }
        }
    }

    pub async fn reset_password(&self, email: &str) -> Envelope {
        match self.identity.send_password_reset(email).await {
            Ok(()) => {
                tracing::info!("Password reset email sent to {}", email);
                Envelope::ok("Password reset email sent! Check your inbox.")
            }
            Err(e) => {
                tracing::error!("Password reset error: {}", e);
                auth_failure(&e)
            }
        }
    }

    /// Completes a password reset with the code from the reset link.
    pub async fn confirm_password_reset(&self, code: &str, new_password: &str) -> Envelope {
        match self
            .identity
            .confirm_password_reset(code, new_password)
            .await
        {
            Ok(()) => Envelope::ok("Password has been reset. You can now sign in."),
            Err(e) => {
                tracing::error!("Password reset confirmation error: {}", e);
                auth_failure(&e)
            }
        }
    }

    /// Applies the code from a verification link.
    pub async fn verify_email(&self, code: &str) -> Envelope {
        if let Err(e) = self.identity.apply_email_verification(code).await {
            tracing::error!("Email verification error: {}", e);
            return auth_failure(&e);
        }

        if let Some(session) = self.current_user().filter(|s| s.email_verified) {
            let result = self
                .update_user_record(&session.uid, Fields::new().set("emailVerified", true))
                .await;
            if let Err(e) = result {
                tracing::warn!("Error mirroring verification for {}: {}", session.uid, e);
            }
        }
        Envelope::ok("Email verified successfully!")
    }

    /// Updates the signed-in user's display name and photo, on the session
    /// and on the `users` record.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Envelope {
        match self.apply_profile_update(update).await {
            Ok(session) => {
                tracing::info!("Profile updated for {}", session.uid);
                Envelope::ok("Profile updated successfully!")
            }
            Err(e) => {
                tracing::error!("Profile update error: {}", e);
                Envelope::failed(e.to_string())
            }
        }
    }

    async fn apply_profile_update(&self, update: &ProfileUpdate) -> Result<Session, AuthError> {
        if self.identity.current_session().is_none() {
            return Err(AuthError::NoSession);
        }

        let session = self.identity.update_profile(update).await?;
        if !update.is_empty() {
            self.update_user_record(&session.uid, update.to_fields())
                .await?;
        }
        Ok(session)
    }

    /// Changes the signed-in user's email after confirming their password,
    /// then sends a verification mail to the new address.
    pub async fn update_email(&self, new_email: &str, current_password: &str) -> Envelope {
        match self.change_email(new_email, current_password).await {
            Ok(()) => {
                tracing::info!("Email updated to {}", new_email);
                Envelope::ok("Email updated! Please verify your new email.")
            }
            Err(e) => {
                tracing::error!("Email update error: {}", e);
                auth_failure(&e)
            }
        }
    }

    async fn change_email(&self, new_email: &str, current_password: &str) -> Result<(), AuthError> {
        if self.identity.current_session().is_none() {
            return Err(AuthError::NoSession);
        }

        self.identity.reauthenticate(current_password).await?;
        let session = self.identity.update_email(new_email).await?;
        self.identity.send_email_verification().await?;

        self.update_user_record(
            &session.uid,
            Fields::new()
                .set("email", session.email.as_str())
                .set("emailVerified", session.email_verified),
        )
        .await?;
        Ok(())
    }

    pub async fn update_password(&self, current_password: &str, new_password: &str) -> Envelope {
        match self.change_password(current_password, new_password).await {
            Ok(()) => {
                tracing::info!("Password updated");
                Envelope::ok("Password updated successfully!")
            }
            Err(e) => {
                tracing::error!("Password update error: {}", e);
                auth_failure(&e)
            }
        }
    }

    async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if self.identity.current_session().is_none() {
            return Err(AuthError::NoSession);
        }

        self.identity.reauthenticate(current_password).await?;
        self.identity.update_password(new_password).await
    }

    /// Deletes the signed-in user's `users` record and account.
    /// Password accounts must confirm their password first.
    pub async fn delete_account(&self, password: &str) -> Envelope {
        match self.remove_account(password).await {
            Ok(uid) => {
                tracing::info!("Account {} deleted", uid);
                Envelope::ok("Account deleted successfully!")
            }
            Err(e) => {
                tracing::error!("Account deletion error: {}", e);
                auth_failure(&e)
            }
        }
    }

    async fn remove_account(&self, password: &str) -> Result<String, AuthError> {
        let session = self
            .identity
            .current_session()
            .ok_or(AuthError::NoSession)?;

        if session.is_password_based() {
            self.identity.reauthenticate(password).await?;
        }

        if let Some(record) = self.find_user_record(&session.uid).await? {
            self.delete_document(Collection::Users.as_str(), &record.id)
                .await?;
        }

        self.identity.delete_current_user().await?;
        Ok(session.uid)
    }

    /// Stream of session transitions, starting with the current state.
    pub fn observe_session_changes(&self) -> SessionObserver {
        SessionObserver::new(self.identity.session_changes())
    }

    /// Calls `callback` with the current user now and after every sign-in
    /// or sign-out, until the handle is cancelled or dropped.
    pub fn on_session_change<F>(&self, mut callback: F) -> ListenerHandle
    where
        F: FnMut(Option<Session>) + Send + 'static,
    {
        let mut observer = self.observe_session_changes();

        let task = tokio::spawn(async move {
            while let Some(event) = observer.next().await {
                match &event {
                    SessionEvent::SignedIn(session) => {
                        tracing::debug!("User is signed in: {}", session.email)
                    }
                    SessionEvent::SignedOut => tracing::debug!("User is signed out"),
                }
                callback(event.session().cloned());
            }
        });

        ListenerHandle::new(task)
    }

    pub fn current_user(&self) -> Option<Session> {
        self.identity.current_session()
    }
}
