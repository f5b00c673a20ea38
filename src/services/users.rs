use super::SiteServices;
use crate::models::{Collection, Condition, Envelope, Fields, Record, Session, CREATED_AT};
use crate::store::StoreError;

const ADMIN_ROLE: &str = "admin";

impl SiteServices {
    /// The `users` record mirroring `uid`, if any.
    pub(crate) async fn find_user_record(&self, uid: &str) -> Result<Option<Record>, StoreError> {
        let users = self
            .query_documents(
                Collection::Users.as_str(),
                &[Condition::eq("uid", uid)],
                None,
                None,
            )
            .await?;
        Ok(users.into_iter().next())
    }

    /// Fields of a freshly mirrored `users` record.
    pub(crate) fn new_user_fields(session: &Session) -> Fields {
        Fields::new()
            .set("uid", session.uid.as_str())
            .set("email", session.email.as_str())
            .set(
                "displayName",
                session.display_name.clone().unwrap_or_default(),
            )
            .set("photoURL", session.photo_url.clone().unwrap_or_default())
            .set("emailVerified", session.email_verified)
            .set("provider", session.provider.mirror_tag())
            .set("role", "user")
            .set("status", "active")
    }

    /// Merges `fields` into the mirrored record for `uid`. Returns whether a
    /// record was found.
    pub(crate) async fn update_user_record(
        &self,
        uid: &str,
        fields: Fields,
    ) -> Result<bool, StoreError> {
        match self.find_user_record(uid).await? {
            Some(record) => {
                self.update_document(Collection::Users.as_str(), &record.id, fields)
                    .await
            }
            None => Ok(false),
        }
    }

    /// Returns the profile record for `uid`. Errors read as absent.
    pub async fn get_user_profile(&self, uid: &str) -> Option<Record> {
        match self.find_user_record(uid).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Error getting user profile for {}: {}", uid, e);
                None
            }
        }
    }

    pub async fn is_user_admin(&self, uid: &str) -> bool {
        self.get_user_profile(uid)
            .await
            .is_some_and(|profile| profile.get_str("role") == Some(ADMIN_ROLE))
    }

    /// Sets the `role` field of a user's profile.
    pub async fn set_user_role(&self, uid: &str, role: &str) -> Envelope {
        match self
            .update_user_record(uid, Fields::new().set("role", role))
            .await
        {
            Ok(true) => {
                tracing::info!("Set role of {} to {}", uid, role);
                Envelope::ok("User role updated.")
            }
            Ok(false) => Envelope::failed("User not found."),
            Err(e) => {
                tracing::error!("Error setting role of {}: {}", uid, e);
                Envelope::failed("Failed to update user role.")
            }
        }
    }

    /// Stamps `lastLogin` on the user's profile. Failures are logged only.
    pub async fn update_user_last_login(&self, uid: &str) {
        let result = self
            .update_user_record(uid, Fields::new().server_timestamp("lastLogin"))
            .await;
        if let Err(e) = result {
            tracing::warn!("Error updating last login for {}: {}", uid, e);
        }
    }

    /// All user profiles, newest first.
    pub async fn get_all_users(&self) -> Result<Vec<Record>, StoreError> {
        self.query_documents(Collection::Users.as_str(), &[], Some(CREATED_AT), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::site;

    async fn seed_user(services: &SiteServices, uid: &str, role: &str) -> String {
        services
            .add_document(
                "users",
                Fields::new().set("uid", uid).set("role", role),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_is_user_admin() {
        let site = site();
        let services = &site.services;
        seed_user(services, "u-admin", "admin").await;
        seed_user(services, "u-user", "user").await;
        seed_user(services, "u-caps", "Admin").await;

        assert!(services.is_user_admin("u-admin").await);
        assert!(!services.is_user_admin("u-user").await);
        assert!(!services.is_user_admin("u-caps").await);
        assert!(!services.is_user_admin("u-missing").await);
    }

    #[tokio::test]
    async fn test_get_user_profile() {
        let site = site();
        let services = &site.services;
        let id = seed_user(services, "u1", "user").await;

        let profile = services.get_user_profile("u1").await.unwrap();
        assert_eq!(profile.id, id);
        assert!(services.get_user_profile("u2").await.is_none());
    }

    #[tokio::test]
    async fn test_set_user_role() {
        let site = site();
        let services = &site.services;
        seed_user(services, "u1", "user").await;

        let envelope = services.set_user_role("u1", "admin").await;
        assert!(envelope.success);
        assert!(services.is_user_admin("u1").await);

        let envelope = services.set_user_role("nobody", "admin").await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("User not found."));
    }

    #[tokio::test]
    async fn test_update_last_login() {
        let site = site();
        let services = &site.services;
        seed_user(services, "u1", "user").await;

        services.update_user_last_login("u1").await;
        services.update_user_last_login("nobody").await;

        let profile = services.get_user_profile("u1").await.unwrap();
        assert!(profile.get_str("lastLogin").is_some());
        assert_eq!(services.get_all_users().await.unwrap().len(), 1);
    }
}
