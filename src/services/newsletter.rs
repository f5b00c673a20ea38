use serde_json::Value;

use super::SiteServices;
use crate::models::{Collection, Condition, Envelope, Fields, Record};
use crate::store::StoreError;

const ACTIVE: &str = "active";
const UNSUBSCRIBED: &str = "unsubscribed";

impl SiteServices {
    /// Subscribes `email` (lower-cased). An address that unsubscribed
    /// earlier is reactivated instead of added again.
    pub async fn subscribe_newsletter(&self, email: &str) -> Envelope {
        let email = email.trim().to_lowercase();

        match self.add_subscriber(&email).await {
            Ok(Some(id)) => {
                tracing::info!("Newsletter subscription: {}", id);
                Envelope::ok("Successfully subscribed! Welcome to our newsletter.").with_id(id)
            }
            Ok(None) => Envelope::failed("This email is already subscribed!"),
            Err(e) => {
                tracing::error!("Newsletter subscription error: {}", e);
                Envelope::failed("Subscription failed. Please try again.")
            }
        }
    }

    /// Returns the subscriber id, or `None` if already active.
    async fn add_subscriber(&self, email: &str) -> Result<Option<String>, StoreError> {
        let existing = self.subscribers_with_email(email).await?;

        if existing.iter().any(|r| r.get_str("status") == Some(ACTIVE)) {
            return Ok(None);
        }

        if let Some(previous) = existing.first() {
            let fields = Fields::new()
                .set("status", ACTIVE)
                .set("unsubscribedAt", Value::Null)
                .server_timestamp("subscribedAt");
            self.update_document(Collection::Newsletter.as_str(), &previous.id, fields)
                .await?;
            return Ok(Some(previous.id.clone()));
        }

        let fields = Fields::new()
            .set("email", email)
            .set("status", ACTIVE)
            .set("source", "Website")
            .server_timestamp("subscribedAt");
        let id = self
            .add_document(Collection::Newsletter.as_str(), fields)
            .await?;
        Ok(Some(id))
    }

    pub async fn unsubscribe_newsletter(&self, email: &str) -> Envelope {
        let email = email.trim().to_lowercase();

        let active = match self.subscribers_with_email(&email).await {
            Ok(records) => records
                .into_iter()
                .find(|r| r.get_str("status") == Some(ACTIVE)),
            Err(e) => {
                tracing::error!("Newsletter unsubscription error: {}", e);
                return Envelope::failed("Unsubscription failed. Please try again.");
            }
        };

        let Some(subscriber) = active else {
            return Envelope::failed("Email not found in subscribers list.");
        };

        let fields = Fields::new()
            .set("status", UNSUBSCRIBED)
            .server_timestamp("unsubscribedAt");
        match self
            .update_document(Collection::Newsletter.as_str(), &subscriber.id, fields)
            .await
        {
            Ok(_) => {
                tracing::info!("Newsletter unsubscription: {}", subscriber.id);
                Envelope::ok("Successfully unsubscribed.")
            }
            Err(_) => Envelope::failed("Unsubscription failed. Please try again."),
        }
    }

    /// Active subscribers, most recently subscribed first.
    pub async fn get_all_subscribers(&self) -> Result<Vec<Record>, StoreError> {
        self.query_documents(
            Collection::Newsletter.as_str(),
            &[Condition::eq("status", ACTIVE)],
            Some("subscribedAt"),
            None,
        )
        .await
    }

    async fn subscribers_with_email(&self, email: &str) -> Result<Vec<Record>, StoreError> {
        self.query_documents(
            Collection::Newsletter.as_str(),
            &[Condition::eq("email", email)],
            None,
            None,
        )
        .await
    }
}
