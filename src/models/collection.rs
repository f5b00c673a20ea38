use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The named collections the site writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Contacts,
    #[serde(rename = "newsletter_subscribers")]
    Newsletter,
    QuickContacts,
    Users,
    AppDownloads,
    Feedback,
    Inquiries,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Contacts,
        Collection::Newsletter,
        Collection::QuickContacts,
        Collection::Users,
        Collection::AppDownloads,
        Collection::Feedback,
        Collection::Inquiries,
    ];

    /// Returns the collection name used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Contacts => "contacts",
            Collection::Newsletter => "newsletter_subscribers",
            Collection::QuickContacts => "quick_contacts",
            Collection::Users => "users",
            Collection::AppDownloads => "app_downloads",
            Collection::Feedback => "feedback",
            Collection::Inquiries => "inquiries",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Collection {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Unknown collection '{}'. Valid options: {}",
                    s,
                    Collection::ALL.map(|c| c.as_str()).join(", ")
                )
            })
    }
}

/// Checks that a collection name is usable as a store key.
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name.trim() == name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::Contacts.as_str(), "contacts");
        assert_eq!(Collection::Newsletter.as_str(), "newsletter_subscribers");
        assert_eq!(Collection::QuickContacts.as_str(), "quick_contacts");
        assert_eq!(Collection::AppDownloads.to_string(), "app_downloads");
    }

    #[test]
    fn test_collection_from_str() {
        assert_eq!(Collection::from_str("users").unwrap(), Collection::Users);
        assert_eq!(
            Collection::from_str("newsletter_subscribers").unwrap(),
            Collection::Newsletter
        );
        assert!(Collection::from_str("Users").is_err());
        assert!(Collection::from_str("").is_err());
    }

    #[test]
    fn test_serde_matches_store_name() {
        for collection in Collection::ALL {
            let json = serde_json::to_string(&collection).unwrap();
            assert_eq!(json, format!("\"{}\"", collection.as_str()));
        }
    }

    #[test]
    fn test_valid_collection_name() {
        assert!(is_valid_collection_name("contacts"));
        assert!(!is_valid_collection_name(""));
        assert!(!is_valid_collection_name("users/abc"));
        assert!(!is_valid_collection_name(" users"));
    }
}
