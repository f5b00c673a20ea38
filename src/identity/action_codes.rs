//! One-time action codes for email verification and password reset.
//!
//! Codes are stored in memory and expire after a configurable time.
//! They are single-use: checking a code removes it. Expired codes are
//! dropped whenever a code is issued or redeemed.

use rand::Rng;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::error::AuthErrorCode;

/// What an action code authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    VerifyEmail,
    ResetPassword,
}

impl ActionKind {
    /// The `mode` parameter placed in action links.
    pub fn mode(&self) -> &'static str {
        match self {
            ActionKind::VerifyEmail => "verifyEmail",
            ActionKind::ResetPassword => "resetPassword",
        }
    }
}

/// Data associated with a code.
#[derive(Debug, Clone)]
pub struct ActionCode {
    pub kind: ActionKind,
    /// Account the code was issued for.
    pub uid: String,
    /// Email address the code was sent to.
    pub email: String,
    pub expires_at: Instant,
}

/// In-memory action code store with expiry.
#[derive(Debug)]
pub struct ActionCodeStore {
    codes: RwLock<HashMap<String, ActionCode>>,
    default_expiry: Duration,
}

impl ActionCodeStore {
    pub fn new(expiry_minutes: u64) -> Self {
        Self::with_expiry(Duration::from_secs(expiry_minutes.saturating_mul(60)))
    }

    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            codes: RwLock::new(HashMap::new()),
            default_expiry: expiry,
        }
    }

    /// Issues a new code. Returns the code string (32 bytes, base64url encoded).
    pub fn issue(&self, kind: ActionKind, uid: &str, email: &str) -> String {
        let code = generate_code();
        let data = ActionCode {
            kind,
            uid: uid.to_string(),
            email: email.to_string(),
            expires_at: Instant::now() + self.default_expiry,
        };

        let mut codes = self.codes.write().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut codes, Instant::now());
        codes.insert(code.clone(), data);

        code
    }

    /// Consumes a code of the expected kind.
    ///
    /// Unknown codes and codes of another kind are
    /// [`AuthErrorCode::InvalidActionCode`]; codes past their expiry are
    /// [`AuthErrorCode::ExpiredActionCode`]. Either way the code is gone.
    pub fn redeem(&self, code: &str, kind: ActionKind) -> Result<ActionCode, AuthErrorCode> {
        let mut codes = self.codes.write().unwrap_or_else(|e| e.into_inner());

        let data = codes.remove(code);
        prune_expired(&mut codes, Instant::now());
        let data = data.ok_or(AuthErrorCode::InvalidActionCode)?;

        if data.kind != kind {
            return Err(AuthErrorCode::InvalidActionCode);
        }
        if Instant::now() > data.expires_at {
            return Err(AuthErrorCode::ExpiredActionCode);
        }

        Ok(data)
    }

    /// Drops every outstanding code issued for an account.
    pub fn revoke_for(&self, uid: &str) {
        let mut codes = self.codes.write().unwrap_or_else(|e| e.into_inner());
        codes.retain(|_, data| data.uid != uid);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.codes.read().unwrap().len()
    }
}

impl Default for ActionCodeStore {
    fn default() -> Self {
        Self::new(60)
    }
}

fn prune_expired(codes: &mut HashMap<String, ActionCode>, now: Instant) {
    let before = codes.len();
    codes.retain(|_, data| data.expires_at > now);
    if codes.len() < before {
        tracing::debug!("Dropped {} expired action code(s)", before - codes.len());
    }
}

/// Generates a secure random code: 32 random bytes, base64url without padding.
fn generate_code() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
