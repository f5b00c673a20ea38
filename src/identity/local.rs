//! In-process identity provider.
//!
//! Accounts are held in memory and, when the provider is opened over an
//! [`AccountStore`], written through to it on every change. Passwords are
//! stored salted and hashed.
//! Verification and reset links carry one-time action codes, delivered
//! through a [`Mailer`]. Federated sign-in goes through a [`ConsentFlow`].
//!
//! # Rules
//!
//! - Passwords shorter than `min_password_length` are rejected as weak.
//! - After `max_failed_attempts` consecutive wrong passwords the account
//!   is locked for `lockout`; attempts during the lock fail with
//!   `auth/too-many-requests`.
//! - Email change, password change and deletion need a sign-in (or
//!   re-authentication) within `recent_login`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::accounts::{AccountStore, StoredAccount};
use super::action_codes::{ActionCodeStore, ActionKind};
use super::error::{AuthError, AuthErrorCode};
use super::federated::{ConsentFlow, ConsentRequest, FederatedProfile};
use super::password::{hash_password, verify_password};
use super::IdentityProvider;
use crate::mail::{Mailer, OutgoingMail};
use crate::models::{ProfileUpdate, ProviderKind, Session};
use crate::store::StoreError;

/// Tunables for [`LocalIdentityProvider`].
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Base URL of the page that handles verification and reset links.
    pub action_url: String,
    pub action_code_expiry: Duration,
    pub min_password_length: usize,
    pub max_failed_attempts: u32,
    pub lockout: Duration,
    pub recent_login: Duration,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            action_url: "http://localhost:8080/auth/action".to_string(),
            action_code_expiry: Duration::from_secs(60 * 60),
            min_password_length: 6,
            max_failed_attempts: 5,
            lockout: Duration::from_secs(15 * 60),
            recent_login: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    email: String,
    password_hash: Option<String>,
    federated_subject: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    email_verified: bool,
    disabled: bool,
    failed_attempts: u32,
    locked_until: Option<Instant>,
}

impl Account {
    fn new(email: &str) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
            password_hash: None,
            federated_subject: None,
            display_name: None,
            photo_url: None,
            email_verified: false,
            disabled: false,
            failed_attempts: 0,
            locked_until: None,
        }
    }

    fn session(&self, provider: ProviderKind) -> Session {
        Session {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
            email_verified: self.email_verified,
            provider,
        }
    }

    fn stored(&self) -> StoredAccount {
        StoredAccount {
            uid: self.uid.clone(),
            email: self.email.clone(),
            password_hash: self.password_hash.clone(),
            federated_subject: self.federated_subject.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
            email_verified: self.email_verified,
            disabled: self.disabled,
        }
    }

    fn is_locked(&mut self, now: Instant) -> bool {
        match self.locked_until {
            Some(until) if until > now => true,
            Some(_) => {
                self.locked_until = None;
                self.failed_attempts = 0;
                false
            }
            None => false,
        }
    }
}

impl From<StoredAccount> for Account {
    fn from(stored: StoredAccount) -> Self {
        Self {
            uid: stored.uid,
            email: stored.email,
            password_hash: stored.password_hash,
            federated_subject: stored.federated_subject,
            display_name: stored.display_name,
            photo_url: stored.photo_url,
            email_verified: stored.email_verified,
            disabled: stored.disabled,
            failed_attempts: 0,
            locked_until: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Current {
    uid: String,
    provider: ProviderKind,
    authenticated_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    /// Accounts indexed by uid.
    accounts: HashMap<String, Account>,
    current: Option<Current>,
}

impl State {
    fn find_by_email(&self, email: &str) -> Option<&Account> {
        self.accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }

    fn uid_for_email(&self, email: &str) -> Option<String> {
        self.find_by_email(email).map(|a| a.uid.clone())
    }

    fn current_session(&self) -> Option<Session> {
        let current = self.current.as_ref()?;
        self.accounts
            .get(&current.uid)
            .map(|account| account.session(current.provider))
    }

    /// The signed-in account, or `NoSession`.
    fn current_account(&mut self) -> Result<(&Current, &mut Account), AuthError> {
        let current = self.current.as_ref().ok_or(AuthError::NoSession)?;
        let account = self
            .accounts
            .get_mut(&current.uid)
            .ok_or(AuthError::NoSession)?;
        Ok((current, account))
    }
}

/// Identity provider that keeps accounts in process memory.
pub struct LocalIdentityProvider {
    state: RwLock<State>,
    sessions: watch::Sender<Option<Session>>,
    codes: ActionCodeStore,
    mailer: Arc<dyn Mailer>,
    consent: Arc<dyn ConsentFlow>,
    settings: IdentitySettings,
    account_store: Option<Arc<dyn AccountStore>>,
}

impl LocalIdentityProvider {
    pub fn new(
        settings: IdentitySettings,
        mailer: Arc<dyn Mailer>,
        consent: Arc<dyn ConsentFlow>,
    ) -> Self {
        let (sessions, _) = watch::channel(None);
        Self {
            state: RwLock::new(State::default()),
            sessions,
            codes: ActionCodeStore::with_expiry(settings.action_code_expiry),
            mailer,
            consent,
            settings,
            account_store: None,
        }
    }

    /// Opens a provider over `store`, loading every saved account.
    pub async fn open(
        settings: IdentitySettings,
        mailer: Arc<dyn Mailer>,
        consent: Arc<dyn ConsentFlow>,
        store: Arc<dyn AccountStore>,
    ) -> Result<Self, StoreError> {
        let saved = store.load_accounts().await?;
        let count = saved.len();

        let mut provider = Self::new(settings, mailer, consent);
        {
            let mut state = provider.write_state();
            for stored in saved {
                state.accounts.insert(stored.uid.clone(), Account::from(stored));
            }
        }
        provider.account_store = Some(store);

        tracing::info!("Loaded {} account(s)", count);
        Ok(provider)
    }

    /// Enables or disables an account. Disabled accounts cannot sign in.
    pub async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<(), AuthError> {
        let saved = {
            let mut state = self.write_state();
            let account = state
                .accounts
                .get_mut(uid)
                .ok_or(AuthError::Provider(AuthErrorCode::UserNotFound))?;
            account.disabled = disabled;
            account.stored()
        };

        self.persist(&saved).await?;
        tracing::info!("Account {} disabled={}", uid, disabled);
        Ok(())
    }

    pub fn account_count(&self) -> usize {
        self.read_state().accounts.len()
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self, account: &StoredAccount) -> Result<(), StoreError> {
        match &self.account_store {
            Some(store) => store.save_account(account).await,
            None => Ok(()),
        }
    }

    fn publish(&self, session: Option<Session>) {
        self.sessions.send_replace(session);
    }

    fn action_link(&self, kind: ActionKind, code: &str) -> String {
        format!(
            "{}?mode={}&oobCode={}",
            self.settings.action_url,
            kind.mode(),
            urlencoding::encode(code)
        )
    }

    fn check_password_strength(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.settings.min_password_length {
            return Err(AuthErrorCode::WeakPassword.into());
        }
        Ok(())
    }

    fn check_recent_login(&self, current: &Current) -> Result<(), AuthError> {
        if current.authenticated_at.elapsed() > self.settings.recent_login {
            return Err(AuthErrorCode::RequiresRecentLogin.into());
        }
        Ok(())
    }

    /// Checks a password against an account, tracking failures.
    fn check_password(&self, account: &mut Account, password: &str) -> Result<(), AuthError> {
        let now = Instant::now();
        if account.is_locked(now) {
            return Err(AuthErrorCode::TooManyRequests.into());
        }

        let matches = account
            .password_hash
            .as_deref()
            .is_some_and(|stored| verify_password(password, stored));

        if matches {
            account.failed_attempts = 0;
            return Ok(());
        }

        account.failed_attempts += 1;
        if account.failed_attempts >= self.settings.max_failed_attempts {
            account.locked_until = Some(now + self.settings.lockout);
            tracing::warn!(
                "Account {} locked after {} failed attempts",
                account.uid,
                account.failed_attempts
            );
        }
        Err(AuthErrorCode::WrongPassword.into())
    }

    /// Finds or creates the account for a federated profile.
    fn federated_account(state: &mut State, profile: &FederatedProfile) -> String {
        if let Some(account) = state
            .accounts
            .values()
            .find(|a| a.federated_subject.as_deref() == Some(profile.subject.as_str()))
        {
            return account.uid.clone();
        }

        // Link to an existing account with the same address
        if let Some(uid) = state.uid_for_email(&profile.email) {
            if let Some(account) = state.accounts.get_mut(&uid) {
                account.federated_subject = Some(profile.subject.clone());
                account.email_verified |= profile.email_verified;
            }
            return uid;
        }

        let mut account = Account::new(&profile.email);
        account.federated_subject = Some(profile.subject.clone());
        account.display_name = profile.display_name.clone();
        account.photo_url = profile.photo_url.clone();
        account.email_verified = profile.email_verified;
        let uid = account.uid.clone();
        state.accounts.insert(uid.clone(), account);
        uid
    }
}

/// Light syntactic check of an email address.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthErrorCode::InvalidEmail.into());
        }
        self.check_password_strength(password)?;

        let (session, saved) = {
            let mut state = self.write_state();
            if state.find_by_email(email).is_some() {
                return Err(AuthErrorCode::EmailAlreadyInUse.into());
            }

            let mut account = Account::new(email);
            account.password_hash = Some(hash_password(password));
            let session = account.session(ProviderKind::Password);
            let saved = account.stored();

            state.current = Some(Current {
                uid: account.uid.clone(),
                provider: ProviderKind::Password,
                authenticated_at: Instant::now(),
            });
            state.accounts.insert(account.uid.clone(), account);
            (session, saved)
        };

        if let Err(e) = self.persist(&saved).await {
            let mut state = self.write_state();
            state.accounts.remove(&saved.uid);
            state.current = None;
            return Err(e.into());
        }

        tracing::info!("Created account {} for {}", session.uid, session.email);
        self.publish(Some(session.clone()));
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthErrorCode::InvalidEmail.into());
        }

        let session = {
            let mut state = self.write_state();
            let uid = state
                .uid_for_email(email)
                .ok_or(AuthError::Provider(AuthErrorCode::UserNotFound))?;
            let account = state
                .accounts
                .get_mut(&uid)
                .ok_or(AuthError::Provider(AuthErrorCode::UserNotFound))?;

            if account.disabled {
                return Err(AuthErrorCode::UserDisabled.into());
            }
            self.check_password(account, password)?;

            let session = account.session(ProviderKind::Password);
            state.current = Some(Current {
                uid,
                provider: ProviderKind::Password,
                authenticated_at: Instant::now(),
            });
            session
        };

        self.publish(Some(session.clone()));
        Ok(session)
    }

    async fn sign_in_with_federated(
        &self,
        request: &ConsentRequest,
    ) -> Result<Session, AuthError> {
        let profile = self
            .consent
            .authorize(request)
            .await
            .map_err(AuthError::Provider)?;

        let (session, saved) = {
            let mut state = self.write_state();
            let uid = Self::federated_account(&mut state, &profile);
            let account = state
                .accounts
                .get(&uid)
                .ok_or(AuthError::Provider(AuthErrorCode::UserNotFound))?;

            if account.disabled {
                return Err(AuthErrorCode::UserDisabled.into());
            }

            let session = account.session(request.provider);
            let saved = account.stored();
            state.current = Some(Current {
                uid,
                provider: request.provider,
                authenticated_at: Instant::now(),
            });
            (session, saved)
        };

        self.persist(&saved).await?;
        self.publish(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let was_signed_in = self.write_state().current.take().is_some();
        if was_signed_in {
            self.publish(None);
        }
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthErrorCode::InvalidEmail.into());
        }

        let mail = {
            let state = self.read_state();
            let account = state
                .find_by_email(email)
                .ok_or(AuthError::Provider(AuthErrorCode::UserNotFound))?;
            let code = self
                .codes
                .issue(ActionKind::ResetPassword, &account.uid, &account.email);
            OutgoingMail::password_reset(
                &account.email,
                account.display_name.as_deref(),
                &self.action_link(ActionKind::ResetPassword, &code),
            )
        };

        self.mailer.send(mail).await?;
        Ok(())
    }

    async fn send_email_verification(&self) -> Result<(), AuthError> {
        let mail = {
            let mut state = self.write_state();
            let (_, account) = state.current_account()?;
            let code = self
                .codes
                .issue(ActionKind::VerifyEmail, &account.uid, &account.email);
            OutgoingMail::verification(
                &account.email,
                account.display_name.as_deref(),
                &self.action_link(ActionKind::VerifyEmail, &code),
            )
        };

        self.mailer.send(mail).await?;
        Ok(())
    }

    async fn confirm_password_reset(
        &self,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.check_password_strength(new_password)?;
        let data = self.codes.redeem(code, ActionKind::ResetPassword)?;

        let saved = {
            let mut state = self.write_state();
            let account = state
                .accounts
                .get_mut(&data.uid)
                .ok_or(AuthError::Provider(AuthErrorCode::UserNotFound))?;
            if !account.email.eq_ignore_ascii_case(&data.email) {
                return Err(AuthErrorCode::InvalidActionCode.into());
            }

            account.password_hash = Some(hash_password(new_password));
            account.failed_attempts = 0;
            account.locked_until = None;
            account.stored()
        };

        self.persist(&saved).await?;
        tracing::info!("Password reset for account {}", saved.uid);
        Ok(())
    }

    async fn apply_email_verification(&self, code: &str) -> Result<(), AuthError> {
        let data = self.codes.redeem(code, ActionKind::VerifyEmail)?;

        let saved = {
            let mut state = self.write_state();
            let account = state
                .accounts
                .get_mut(&data.uid)
                .ok_or(AuthError::Provider(AuthErrorCode::UserNotFound))?;
            if !account.email.eq_ignore_ascii_case(&data.email) {
                return Err(AuthErrorCode::InvalidActionCode.into());
            }

            account.email_verified = true;
            account.stored()
        };

        self.persist(&saved).await?;
        tracing::info!("Email verified for account {}", saved.uid);
        Ok(())
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Session, AuthError> {
        let (session, saved) = {
            let mut state = self.write_state();
            let (current, account) = state.current_account()?;

            if let Some(name) = &update.display_name {
                account.display_name = Some(name.clone());
            }
            if let Some(url) = &update.photo_url {
                account.photo_url = Some(url.clone());
            }
            (account.session(current.provider), account.stored())
        };

        self.persist(&saved).await?;
        Ok(session)
    }

    async fn reauthenticate(&self, password: &str) -> Result<(), AuthError> {
        let mut state = self.write_state();
        let (_, account) = state.current_account()?;
        self.check_password(account, password)?;

        if let Some(current) = state.current.as_mut() {
            current.authenticated_at = Instant::now();
        }
        Ok(())
    }

    async fn update_email(&self, new_email: &str) -> Result<Session, AuthError> {
        let new_email = new_email.trim();

        let (session, saved) = {
            let mut state = self.write_state();
            let uid = {
                let (current, account) = state.current_account()?;
                self.check_recent_login(current)?;
                account.uid.clone()
            };

            if !is_valid_email(new_email) {
                return Err(AuthErrorCode::InvalidEmail.into());
            }
            if state
                .find_by_email(new_email)
                .is_some_and(|other| other.uid != uid)
            {
                return Err(AuthErrorCode::EmailAlreadyInUse.into());
            }

            self.codes.revoke_for(&uid);
            let (current, account) = state.current_account()?;
            account.email = new_email.to_string();
            account.email_verified = false;
            (account.session(current.provider), account.stored())
        };

        self.persist(&saved).await?;
        tracing::info!("Email changed for account {}", saved.uid);
        Ok(session)
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let saved = {
            let mut state = self.write_state();
            let (current, account) = state.current_account()?;
            self.check_recent_login(current)?;
            self.check_password_strength(new_password)?;

            account.password_hash = Some(hash_password(new_password));
            account.stored()
        };

        self.persist(&saved).await?;
        tracing::info!("Password changed for account {}", saved.uid);
        Ok(())
    }

    async fn delete_current_user(&self) -> Result<(), AuthError> {
        let uid = {
            let state = self.read_state();
            let current = state.current.as_ref().ok_or(AuthError::NoSession)?;
            self.check_recent_login(current)?;
            current.uid.clone()
        };

        if let Some(store) = &self.account_store {
            store.remove_account(&uid).await?;
        }

        {
            let mut state = self.write_state();
            state.accounts.remove(&uid);
            if state.current.as_ref().is_some_and(|c| c.uid == uid) {
                state.current = None;
            }
        }
        self.codes.revoke_for(&uid);
        tracing::info!("Deleted account {}", uid);

        self.publish(None);
        Ok(())
    }

    fn current_session(&self) -> Option<Session> {
        self.read_state().current_session()
    }

    fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.sessions.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::federated::ScriptedConsent;
    use crate::mail::OutboxMailer;

    struct Harness {
        provider: LocalIdentityProvider,
        outbox: Arc<OutboxMailer>,
        consent: Arc<ScriptedConsent>,
    }

    fn harness_with(settings: IdentitySettings) -> Harness {
        let outbox = Arc::new(OutboxMailer::new());
        let consent = Arc::new(ScriptedConsent::new());
        let provider = LocalIdentityProvider::new(settings, outbox.clone(), consent.clone());
        Harness {
            provider,
            outbox,
            consent,
        }
    }

    fn harness() -> Harness {
        harness_with(IdentitySettings::default())
    }

    fn code_from_link(link: &str) -> String {
        let encoded = link.split("oobCode=").nth(1).unwrap();
        urlencoding::decode(encoded).unwrap().into_owned()
    }

    fn google_profile(subject: &str, email: &str) -> FederatedProfile {
        FederatedProfile {
            subject: subject.to_string(),
            email: email.to_string(),
            display_name: Some("Gee".to_string()),
            photo_url: Some("https://img/g.png".to_string()),
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn test_create_account_signs_in() {
        let h = harness();
        let session = h
            .provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();

        assert_eq!(session.email, "a@example.com");
        assert_eq!(session.provider, ProviderKind::Password);
        assert!(!session.email_verified);
        assert_eq!(h.provider.current_session(), Some(session));
    }

    #[tokio::test]
    async fn test_create_account_validation() {
        let h = harness();

        let err = h
            .provider
            .create_account("not-an-email", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::InvalidEmail));

        let err = h
            .provider
            .create_account("a@example.com", "12345")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::WeakPassword));

        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        let err = h
            .provider
            .create_account("A@Example.com", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::EmailAlreadyInUse));
    }

    #[tokio::test]
    async fn test_sign_in_errors() {
        let h = harness();
        let session = h
            .provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        h.provider.sign_out().await.unwrap();

        let err = h
            .provider
            .sign_in_with_password("b@example.com", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::UserNotFound));

        let err = h
            .provider
            .sign_in_with_password("a@example.com", "wrong!!")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::WrongPassword));

        h.provider.set_disabled(&session.uid, true).await.unwrap();
        let err = h
            .provider
            .sign_in_with_password("a@example.com", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::UserDisabled));

        h.provider.set_disabled(&session.uid, false).await.unwrap();
        let signed_in = h
            .provider
            .sign_in_with_password("a@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(signed_in.uid, session.uid);
    }

    #[tokio::test]
    async fn test_lockout_after_failed_attempts() {
        let h = harness_with(IdentitySettings {
            max_failed_attempts: 3,
            ..IdentitySettings::default()
        });
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        h.provider.sign_out().await.unwrap();

        for _ in 0..3 {
            let err = h
                .provider
                .sign_in_with_password("a@example.com", "nope123")
                .await
                .unwrap_err();
            assert_eq!(err.code(), Some(&AuthErrorCode::WrongPassword));
        }

        // Locked even with the right password
        let err = h
            .provider
            .sign_in_with_password("a@example.com", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::TooManyRequests));
    }

    #[tokio::test]
    async fn test_lockout_expires() {
        let h = harness_with(IdentitySettings {
            max_failed_attempts: 1,
            lockout: Duration::from_millis(0),
            ..IdentitySettings::default()
        });
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();

        assert!(h
            .provider
            .sign_in_with_password("a@example.com", "nope123")
            .await
            .is_err());
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(h
            .provider
            .sign_in_with_password("a@example.com", "secret1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let h = harness();
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        h.provider.sign_out().await.unwrap();

        h.provider
            .send_password_reset("a@example.com")
            .await
            .unwrap();
        let mail = h.outbox.last_to("a@example.com").unwrap();
        assert!(mail.link.contains("mode=resetPassword"));
        let code = code_from_link(&mail.link);

        let err = h
            .provider
            .confirm_password_reset(&code, "123")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::WeakPassword));

        h.provider
            .confirm_password_reset(&code, "newsecret")
            .await
            .unwrap();
        assert!(h
            .provider
            .sign_in_with_password("a@example.com", "newsecret")
            .await
            .is_ok());

        let err = h
            .provider
            .confirm_password_reset(&code, "another1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::InvalidActionCode));
    }

    #[tokio::test]
    async fn test_password_reset_unknown_email() {
        let h = harness();
        let err = h
            .provider
            .send_password_reset("ghost@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::UserNotFound));
        assert!(h.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_reset_code() {
        let h = harness_with(IdentitySettings {
            action_code_expiry: Duration::from_millis(0),
            ..IdentitySettings::default()
        });
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        h.provider
            .send_password_reset("a@example.com")
            .await
            .unwrap();
        let code = code_from_link(&h.outbox.last_to("a@example.com").unwrap().link);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = h
            .provider
            .confirm_password_reset(&code, "newsecret")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::ExpiredActionCode));
    }

    #[tokio::test]
    async fn test_email_verification_flow() {
        let h = harness();
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();

        h.provider.send_email_verification().await.unwrap();
        let mail = h.outbox.last_to("a@example.com").unwrap();
        assert!(mail.link.contains("mode=verifyEmail"));

        h.provider
            .apply_email_verification(&code_from_link(&mail.link))
            .await
            .unwrap();
        assert!(h.provider.current_session().unwrap().email_verified);
    }

    #[tokio::test]
    async fn test_verification_requires_session() {
        let h = harness();
        let err = h.provider.send_email_verification().await.unwrap_err();
        assert!(matches!(err, AuthError::NoSession));
    }

    #[tokio::test]
    async fn test_update_profile() {
        let h = harness();
        let err = h
            .provider
            .update_profile(&ProfileUpdate::display_name("X"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoSession));

        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        let session = h
            .provider
            .update_profile(&ProfileUpdate::display_name("Ann"))
            .await
            .unwrap();
        assert_eq!(session.display_name.as_deref(), Some("Ann"));
        assert_eq!(
            h.provider.current_session().unwrap().display_name.as_deref(),
            Some("Ann")
        );
    }

    #[tokio::test]
    async fn test_sensitive_operations_need_recent_login() {
        let h = harness_with(IdentitySettings {
            recent_login: Duration::from_millis(0),
            ..IdentitySettings::default()
        });
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = h
            .provider
            .update_password("newsecret")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::RequiresRecentLogin));

        let err = h.provider.delete_current_user().await.unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::RequiresRecentLogin));
    }

    #[tokio::test]
    async fn test_reauthenticate_and_update_email() {
        let h = harness();
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        h.provider
            .create_account("b@example.com", "secret1")
            .await
            .unwrap();

        let err = h.provider.reauthenticate("wrong12").await.unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::WrongPassword));

        h.provider.reauthenticate("secret1").await.unwrap();
        let err = h
            .provider
            .update_email("a@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::EmailAlreadyInUse));

        let session = h.provider.update_email("c@example.com").await.unwrap();
        assert_eq!(session.email, "c@example.com");
        assert!(!session.email_verified);
    }

    #[tokio::test]
    async fn test_delete_current_user_signs_out() {
        let h = harness();
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        let mut changes = h.provider.session_changes();

        h.provider.delete_current_user().await.unwrap();

        assert!(h.provider.current_session().is_none());
        assert_eq!(h.provider.account_count(), 0);
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
    }

    #[tokio::test]
    async fn test_federated_sign_in_creates_then_reuses_account() {
        let h = harness();
        h.consent.push(Ok(google_profile("g-1", "g@example.com")));
        h.consent.push(Ok(google_profile("g-1", "g@example.com")));

        let first = h
            .provider
            .sign_in_with_federated(&ConsentRequest::google())
            .await
            .unwrap();
        assert_eq!(first.provider, ProviderKind::Google);
        assert_eq!(first.display_name.as_deref(), Some("Gee"));
        assert!(first.email_verified);

        h.provider.sign_out().await.unwrap();
        let second = h
            .provider
            .sign_in_with_federated(&ConsentRequest::google())
            .await
            .unwrap();
        assert_eq!(first.uid, second.uid);
        assert_eq!(h.provider.account_count(), 1);
    }

    #[tokio::test]
    async fn test_federated_links_existing_email() {
        let h = harness();
        let password_session = h
            .provider
            .create_account("g@example.com", "secret1")
            .await
            .unwrap();
        h.consent.push(Ok(google_profile("g-9", "g@example.com")));

        let session = h
            .provider
            .sign_in_with_federated(&ConsentRequest::google())
            .await
            .unwrap();
        assert_eq!(session.uid, password_session.uid);
        assert_eq!(session.provider, ProviderKind::Google);
    }

    #[tokio::test]
    async fn test_federated_popup_closed() {
        let h = harness();
        let err = h
            .provider
            .sign_in_with_federated(&ConsentRequest::google())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::PopupClosedByUser));
        assert!(h.provider.current_session().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_publishes_transition() {
        let h = harness();
        let mut changes = h.provider.session_changes();
        h.provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().is_some());

        h.provider.sign_out().await.unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().is_none());
    }

    #[test]
    fn test_email_syntax() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("a@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@@example.com"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@.com"));
    }

    async fn open_over(store: Arc<dyn AccountStore>) -> LocalIdentityProvider {
        LocalIdentityProvider::open(
            IdentitySettings::default(),
            Arc::new(OutboxMailer::new()),
            Arc::new(ScriptedConsent::new()),
            store,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_accounts_reload_from_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = crate::store::init_db(&temp_dir.path().join("site.db"))
            .await
            .unwrap();
        let store: Arc<dyn AccountStore> =
            Arc::new(crate::identity::SqliteAccountStore::new(pool));

        let uid = {
            let provider = open_over(store.clone()).await;
            let session = provider
                .create_account("a@example.com", "secret1")
                .await
                .unwrap();
            provider
                .update_profile(&ProfileUpdate::display_name("Ann"))
                .await
                .unwrap();
            session.uid
        };

        let reopened = open_over(store.clone()).await;
        assert_eq!(reopened.account_count(), 1);
        assert!(reopened.current_session().is_none());

        let session = reopened
            .sign_in_with_password("a@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(session.uid, uid);
        assert_eq!(session.display_name.as_deref(), Some("Ann"));

        let err = reopened
            .create_account("a@example.com", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&AuthErrorCode::EmailAlreadyInUse));

        reopened.delete_current_user().await.unwrap();
        assert_eq!(open_over(store).await.account_count(), 0);
    }
}
