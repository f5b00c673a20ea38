use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use super::{
    insert_data, merge_update, new_record_id, validate_collection, ChangeEvent, ChangeHub,
    ChangeKind, DocumentStore, ServerClock, StoreError,
};
use crate::models::{Fields, Record};

/// Process-local document store.
///
/// Records are kept per collection in insertion order. Nothing is
/// persisted; dropping the store drops the data.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Record>>>,
    clock: ServerClock,
    hub: ChangeHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn notify(&self, collection: &str, id: &str, kind: ChangeKind) {
        self.hub
            .publish(ChangeEvent {
                collection: collection.to_string(),
                id: id.to_string(),
                kind,
            })
            .await;
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        validate_collection(collection)?;

        let id = new_record_id();
        let data = insert_data(&fields, self.clock.now());
        {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .push(Record::new(id.clone(), data));
        }

        self.notify(collection, &id, ChangeKind::Added).await;
        Ok(id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        validate_collection(collection)?;

        let collections = self.collections.read().await;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        validate_collection(collection)?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|records| records.iter().find(|r| r.id == id))
            .cloned())
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        validate_collection(collection)?;

        {
            let mut collections = self.collections.write().await;
            let record = collections
                .get_mut(collection)
                .and_then(|records| records.iter_mut().find(|r| r.id == id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            merge_update(&mut record.data, &fields, self.clock.now());
        }

        self.notify(collection, id, ChangeKind::Modified).await;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        validate_collection(collection)?;

        let removed = {
            let mut collections = self.collections.write().await;
            match collections.get_mut(collection) {
                Some(records) => {
                    let before = records.len();
                    records.retain(|r| r.id != id);
                    records.len() != before
                }
                None => false,
            }
        };

        if removed {
            self.notify(collection, id, ChangeKind::Removed).await;
        }
        Ok(removed)
    }

    async fn watch(
        &self,
        collection: &str,
    ) -> Result<broadcast::Receiver<ChangeEvent>, StoreError> {
        validate_collection(collection)?;
        Ok(self.hub.subscribe(collection).await)
    }
}
