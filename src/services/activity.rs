use super::SiteServices;
use crate::models::{Collection, Envelope, Fields};

const ANONYMOUS: &str = "anonymous";

impl SiteServices {
    fn current_uid(&self) -> String {
        self.current_user()
            .map(|session| session.uid)
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }

    /// Records an app download. Failures are logged and otherwise ignored.
    pub async fn track_app_download(&self, app_name: &str, app_id: &str) {
        let fields = Fields::new()
            .set("appName", app_name)
            .set("appId", app_id)
            .set("userId", self.current_uid())
            .set("userAgent", self.client.user_agent.as_str())
            .set("referrer", self.client.referrer.as_str());

        match self
            .store
            .add(Collection::AppDownloads.as_str(), fields)
            .await
        {
            Ok(_) => tracing::info!("App download tracked: {}", app_name),
            Err(e) => tracing::warn!("Error tracking download of {}: {}", app_name, e),
        }
    }

    /// Stores caller-supplied feedback with the submitting user and a
    /// `pending` status.
    pub async fn submit_feedback(&self, fields: Fields) -> Envelope {
        let mut fields = fields;
        fields.insert("userId", self.current_uid());
        fields.insert("status", "pending");

        match self
            .add_document(Collection::Feedback.as_str(), fields)
            .await
        {
            Ok(id) => Envelope::ok("Thank you for your feedback!").with_id(id),
            Err(_) => Envelope::failed("Failed to submit feedback."),
        }
    }
}
