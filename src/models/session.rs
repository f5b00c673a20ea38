use serde::{Deserialize, Serialize};
use std::fmt;

use super::fields::Fields;

/// How the current principal authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "google.com")]
    Google,
}

impl ProviderKind {
    /// Provider id as reported by the identity provider.
    pub fn provider_id(&self) -> &'static str {
        match self {
            ProviderKind::Password => "password",
            ProviderKind::Google => "google.com",
        }
    }

    /// Tag written to the mirrored `users` record.
    pub fn mirror_tag(&self) -> &'static str {
        match self {
            ProviderKind::Password => "email",
            ProviderKind::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_id())
    }
}

/// The identity provider's current authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub email_verified: bool,
    pub provider: ProviderKind,
}

impl Session {
    pub fn is_password_based(&self) -> bool {
        self.provider == ProviderKind::Password
    }
}

/// A transition of the session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "user", rename_all = "camelCase")]
pub enum SessionEvent {
    SignedIn(Session),
    SignedOut,
}

impl SessionEvent {
    pub fn from_session(session: Option<Session>) -> Self {
        match session {
            Some(s) => SessionEvent::SignedIn(s),
            None => SessionEvent::SignedOut,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionEvent::SignedIn(s) => Some(s),
            SessionEvent::SignedOut => None,
        }
    }
}

/// Profile fields a signed-in user may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            photo_url: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.photo_url.is_none()
    }

    /// The same change expressed as writes to a `users` record.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(name) = &self.display_name {
            fields.insert("displayName", name.as_str());
        }
        if let Some(url) = &self.photo_url {
            fields.insert("photoURL", url.as_str());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fields::FieldValue;
    use serde_json::json;

    fn session() -> Session {
        Session {
            uid: "u1".to_string(),
            email: "a@x.com".to_string(),
            display_name: Some("A".to_string()),
            photo_url: None,
            email_verified: false,
            provider: ProviderKind::Password,
        }
    }

    #[test]
    fn test_provider_tags() {
        assert_eq!(ProviderKind::Password.provider_id(), "password");
        assert_eq!(ProviderKind::Password.mirror_tag(), "email");
        assert_eq!(ProviderKind::Google.provider_id(), "google.com");
        assert_eq!(ProviderKind::Google.mirror_tag(), "google");
    }

    #[test]
    fn test_session_json_shape() {
        let json = serde_json::to_value(session()).unwrap();
        assert_eq!(json["displayName"], "A");
        assert_eq!(json["emailVerified"], false);
        assert_eq!(json["provider"], "password");
        assert!(json.get("photoURL").is_some());
    }

    #[test]
    fn test_session_event() {
        let event = SessionEvent::from_session(Some(session()));
        assert_eq!(event.session().map(|s| s.uid.as_str()), Some("u1"));
        assert_eq!(
            serde_json::to_value(&event).unwrap()["state"],
            json!("signedIn")
        );

        let event = SessionEvent::from_session(None);
        assert!(event.session().is_none());
    }

    #[test]
    fn test_profile_update_fields() {
        let update = ProfileUpdate {
            display_name: Some("New".to_string()),
            photo_url: Some("https://img/x.png".to_string()),
        };
        let fields = update.to_fields();

        assert_eq!(
            fields.get("displayName"),
            Some(&FieldValue::Value(json!("New")))
        );
        assert_eq!(
            fields.get("photoURL"),
            Some(&FieldValue::Value(json!("https://img/x.png")))
        );
        assert!(ProfileUpdate::default().is_empty());
    }
}
