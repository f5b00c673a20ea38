//! Federated (third-party) sign-in.
//!
//! The consent step runs outside this crate: a browser popup, a device
//! flow, a test double. It is modelled by [`ConsentFlow`], which turns a
//! [`ConsentRequest`] into the profile the third party vouches for.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::error::AuthErrorCode;
use crate::models::ProviderKind;

/// How the third party should treat existing browser sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Always show the account chooser.
    SelectAccount,
    /// Always ask for consent again.
    Consent,
    /// Reuse an existing session silently when possible.
    None,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::SelectAccount => "select_account",
            Prompt::Consent => "consent",
            Prompt::None => "none",
        }
    }
}

/// Parameters of one consent request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub provider: ProviderKind,
    pub prompt: Prompt,
}

impl ConsentRequest {
    /// The request the site always makes: Google, account chooser shown.
    pub fn google() -> Self {
        Self {
            provider: ProviderKind::Google,
            prompt: Prompt::SelectAccount,
        }
    }
}

/// The profile returned by a successful consent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedProfile {
    /// The third party's stable subject id.
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
}

/// Runs the third party's consent step.
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    /// Returns the consenting user's profile, or the code describing why
    /// consent did not complete (closed, blocked, cancelled).
    async fn authorize(&self, request: &ConsentRequest) -> Result<FederatedProfile, AuthErrorCode>;
}

/// Consent flow that is never available.
#[derive(Debug, Default)]
pub struct NoConsent;

#[async_trait]
impl ConsentFlow for NoConsent {
    async fn authorize(&self, _request: &ConsentRequest) -> Result<FederatedProfile, AuthErrorCode> {
        Err(AuthErrorCode::OperationNotAllowed)
    }
}

/// Consent flow that replays queued outcomes, in order.
///
/// Once the queue is empty every request ends as if the user closed the
/// popup.
#[derive(Debug, Default)]
pub struct ScriptedConsent {
    outcomes: Mutex<VecDeque<Result<FederatedProfile, AuthErrorCode>>>,
}

impl ScriptedConsent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<FederatedProfile, AuthErrorCode>) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }
}

#[async_trait]
impl ConsentFlow for ScriptedConsent {
    async fn authorize(&self, request: &ConsentRequest) -> Result<FederatedProfile, AuthErrorCode> {
        tracing::debug!(
            "consent requested from {} with prompt={}",
            request.provider,
            request.prompt.as_str()
        );
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Err(AuthErrorCode::PopupClosedByUser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> FederatedProfile {
        FederatedProfile {
            subject: "g-1".to_string(),
            email: "g@x.com".to_string(),
            display_name: Some("G".to_string()),
            photo_url: None,
            email_verified: true,
        }
    }

    #[test]
    fn test_google_request_selects_account() {
        let request = ConsentRequest::google();
        assert_eq!(request.provider, ProviderKind::Google);
        assert_eq!(request.prompt.as_str(), "select_account");
    }

    #[tokio::test]
    async fn test_scripted_consent_replays_in_order() {
        let flow = ScriptedConsent::new();
        flow.push(Ok(profile()));
        flow.push(Err(AuthErrorCode::PopupBlocked));

        let request = ConsentRequest::google();
        assert_eq!(flow.authorize(&request).await.unwrap(), profile());
        assert_eq!(
            flow.authorize(&request).await.unwrap_err(),
            AuthErrorCode::PopupBlocked
        );
        assert_eq!(
            flow.authorize(&request).await.unwrap_err(),
            AuthErrorCode::PopupClosedByUser
        );
    }

    #[tokio::test]
    async fn test_no_consent_is_not_allowed() {
        let err = NoConsent
            .authorize(&ConsentRequest::google())
            .await
            .unwrap_err();
        assert_eq!(err, AuthErrorCode::OperationNotAllowed);
    }
}
