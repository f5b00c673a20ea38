use serde::Deserialize;

use super::SiteServices;
use crate::models::{Collection, Envelope, Fields, Record, CREATED_AT};
use crate::store::StoreError;

/// Number of contacts returned by [`SiteServices::get_all_contacts`] by default.
pub const DEFAULT_CONTACT_LIMIT: usize = 50;

const SEND_FAILED: &str = "Failed to send message. Please try again.";

/// The main contact form. Missing fields are stored as empty strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub service: String,
    pub subject: String,
    pub message: String,
    /// Where the form was submitted from; "Contact Form" when absent.
    pub source: Option<String>,
}

/// The short form in the quick-contact drawer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuickContactForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
}

impl SiteServices {
    pub async fn submit_contact_form(&self, form: &ContactForm) -> Envelope {
        let source = form
            .source
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Contact Form".to_string());

        let fields = Fields::new()
            .set("name", form.name.as_str())
            .set("email", form.email.as_str())
            .set("phone", form.phone.as_str())
            .set("service", form.service.as_str())
            .set("subject", form.subject.as_str())
            .set("message", form.message.as_str())
            .set("source", source)
            .set("status", "new")
            .set("isRead", false)
            .set("ipAddress", self.ip_lookup.client_ip().await)
            .set("userAgent", self.client.user_agent.as_str());

        match self
            .add_document(Collection::Contacts.as_str(), fields)
            .await
        {
            Ok(id) => {
                tracing::info!("Contact form submitted: {}", id);
                Envelope::ok("Your message has been sent successfully!").with_id(id)
            }
            Err(_) => Envelope::failed(SEND_FAILED),
        }
    }

    pub async fn submit_quick_contact(&self, form: &QuickContactForm) -> Envelope {
        let fields = Fields::new()
            .set("name", form.name.as_str())
            .set("email", form.email.as_str())
            .set("phone", form.phone.as_str())
            .set("message", form.message.as_str())
            .set("source", "Quick Contact Drawer")
            .set("status", "new")
            .set("isRead", false);

        match self
            .add_document(Collection::QuickContacts.as_str(), fields)
            .await
        {
            Ok(id) => {
                tracing::info!("Quick contact submitted: {}", id);
                Envelope::ok("Message sent! We'll contact you shortly.").with_id(id)
            }
            Err(_) => Envelope::failed(SEND_FAILED),
        }
    }

    /// Newest contacts first, at most `limit` (default [`DEFAULT_CONTACT_LIMIT`]).
    pub async fn get_all_contacts(&self, limit: Option<usize>) -> Result<Vec<Record>, StoreError> {
        self.query_documents(
            Collection::Contacts.as_str(),
            &[],
            Some(CREATED_AT),
            Some(limit.unwrap_or(DEFAULT_CONTACT_LIMIT)),
        )
        .await
    }

    pub async fn mark_contact_as_read(&self, id: &str) -> bool {
        let fields = Fields::new().set("isRead", true).set("status", "read");
        self.update_document(Collection::Contacts.as_str(), id, fields)
            .await
            .is_ok()
    }
}
