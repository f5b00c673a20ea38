//! The service facade.
//!
//! [`SiteServices`] holds one document store and one identity provider and
//! exposes the operations the site needs: generic record access,
//! authentication, and a handful of domain wrappers (contact forms,
//! newsletter, user profiles, activity tracking).
//!
//! Mutating domain operations return an [`Envelope`](crate::models::Envelope)
//! instead of an error; generic record operations log failures and return
//! the [`StoreError`] unchanged.

mod activity;
mod auth;
mod contact;
mod newsletter;
mod users;

pub use contact::{ContactForm, QuickContactForm, DEFAULT_CONTACT_LIMIT};

use std::sync::Arc;

use crate::config::{ClientContext, Config};
use crate::identity::{
    ConsentFlow, IdentityProvider, LocalIdentityProvider, NoConsent, SqliteAccountStore,
};
use crate::ip_lookup::IpLookup;
use crate::listener::ListenerHandle;
use crate::mail::{Mailer, OutboxMailer, SmtpMailer};
use crate::models::{Condition, Fields, Record};
use crate::store::{DocumentStore, SqliteStore, StoreError, Subscription};

pub struct SiteServices {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    ip_lookup: IpLookup,
    client: ClientContext,
}

impl SiteServices {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            ip_lookup: IpLookup::default(),
            client: ClientContext::default(),
        }
    }

    pub fn with_ip_lookup(mut self, ip_lookup: IpLookup) -> Self {
        self.ip_lookup = ip_lookup;
        self
    }

    pub fn with_client(mut self, client: ClientContext) -> Self {
        self.client = client;
        self
    }

    /// Builds the facade from configuration: SQLite store and account
    /// table, local identity provider, SMTP mail when configured (outbox
    /// otherwise).
    ///
    /// Federated sign-in is refused with `auth/operation-not-allowed`; use
    /// [`SiteServices::from_config_with_consent`] to plug in a consent flow.
    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        Self::from_config_with_consent(config, Arc::new(NoConsent)).await
    }

    pub async fn from_config_with_consent(
        config: &Config,
        consent: Arc<dyn ConsentFlow>,
    ) -> Result<Self, StoreError> {
        let store = SqliteStore::open(&config.database_path).await?;
        let accounts = SqliteAccountStore::new(store.pool().clone());

        let mailer: Arc<dyn Mailer> = match &config.email {
            Some(email) => Arc::new(SmtpMailer::new(email.clone())),
            None => {
                tracing::warn!("No SMTP settings, account mail goes to the log");
                Arc::new(OutboxMailer::new())
            }
        };
        let identity = LocalIdentityProvider::open(
            config.identity.settings(),
            mailer,
            consent,
            Arc::new(accounts),
        )
        .await?;

        Ok(Self::new(Arc::new(store), Arc::new(identity))
            .with_ip_lookup(IpLookup::from_config(&config.ip_lookup))
            .with_client(config.client.clone()))
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn client(&self) -> &ClientContext {
        &self.client
    }

    // ========================================================================
    // Generic record access
    // ========================================================================

    /// Adds a record and returns its id. `createdAt` and `updatedAt` are
    /// stamped by the store.
    pub async fn add_document(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        match self.store.add(collection, fields).await {
            Ok(id) => {
                tracing::info!("Document added to {} with ID: {}", collection, id);
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Error adding document to {}: {}", collection, e);
                Err(e)
            }
        }
    }

    pub async fn get_documents(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        self.store.list(collection).await.inspect_err(|e| {
            tracing::error!("Error getting documents from {}: {}", collection, e);
        })
    }

    pub async fn get_document_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Record>, StoreError> {
        let record = self.store.get(collection, id).await.inspect_err(|e| {
            tracing::error!("Error getting document {}/{}: {}", collection, id, e);
        })?;

        if record.is_none() {
            tracing::debug!("Document not found: {}/{}", collection, id);
        }
        Ok(record)
    }

    /// Merges `fields` into an existing record and refreshes `updatedAt`.
    pub async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<bool, StoreError> {
        match self.store.update(collection, id, fields).await {
            Ok(()) => {
                tracing::info!("Document {}/{} updated", collection, id);
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Error updating document {}/{}: {}", collection, id, e);
                Err(e)
            }
        }
    }

    /// Deletes a record. Deleting a record that does not exist succeeds.
    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        match self.store.delete(collection, id).await {
            Ok(existed) => {
                if existed {
                    tracing::info!("Document {}/{} deleted", collection, id);
                } else {
                    tracing::debug!("Document {}/{} already absent", collection, id);
                }
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Error deleting document {}/{}: {}", collection, id, e);
                Err(e)
            }
        }
    }

    /// Returns the records matching every condition, ordered descending on
    /// `order_by` when given, truncated to `limit`.
    pub async fn query_documents(
        &self,
        collection: &str,
        conditions: &[Condition],
        order_by: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, StoreError> {
        self.store
            .query(collection, conditions, order_by, limit)
            .await
            .inspect_err(|e| {
                tracing::error!("Error querying documents in {}: {}", collection, e);
            })
    }

    /// Opens a live view of a collection, newest record first.
    pub async fn subscribe_to_collection(
        &self,
        collection: &str,
    ) -> Result<Subscription, StoreError> {
        Subscription::open(self.store.clone(), collection).await
    }

    /// Calls `on_change` with every snapshot of a collection until the
    /// returned handle is cancelled or dropped. A store error ends delivery.
    pub async fn subscribe_to_collection_with<F>(
        &self,
        collection: &str,
        mut on_change: F,
    ) -> Result<ListenerHandle, StoreError>
    where
        F: FnMut(Vec<Record>) + Send + 'static,
    {
        let mut subscription = self.subscribe_to_collection(collection).await?;

        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                match snapshot {
                    Ok(records) => on_change(records),
                    Err(e) => {
                        tracing::error!(
                            "Error in listener for {}: {}",
                            subscription.collection(),
                            e
                        );
                        break;
                    }
                }
            }
        });

        Ok(ListenerHandle::new(task))
    }
}
