//! Document store abstraction and backends.
//!
//! The facade talks to a [`DocumentStore`]: named collections of
//! [`Record`]s keyed by store-assigned ids. Two backends are provided:
//!
//! - [`MemoryStore`]: process-local, used by tests and embedders
//! - [`SqliteStore`]: persistent, backed by a migrated SQLite database
//!
//! Both stamp `createdAt` once on insert and refresh `updatedAt` on every
//! write, and both publish writes to a [`ChangeHub`] so [`Subscription`]s
//! can deliver live snapshots.

mod clock;
mod error;
mod hub;
mod memory;
mod sqlite;
mod subscription;

pub use clock::ServerClock;
pub use error::StoreError;
pub use hub::{ChangeEvent, ChangeHub, ChangeKind};
pub use memory::MemoryStore;
pub use sqlite::{init_db, SqliteStore};
pub use subscription::Subscription;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::models::{
    apply_query, format_timestamp, is_valid_collection_name, Condition, Fields, Record,
    CREATED_AT, UPDATED_AT,
};

/// Persistence operations the facade needs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a record and returns its new id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    /// Returns every record in a collection, oldest first.
    async fn list(&self, collection: &str) -> Result<Vec<Record>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError>;

    /// Merges fields into an existing record.
    ///
    /// Fails with [`StoreError::NotFound`] if the record does not exist.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    /// Deletes a record. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Subscribes to writes on a collection.
    async fn watch(&self, collection: &str)
        -> Result<broadcast::Receiver<ChangeEvent>, StoreError>;

    /// Runs a filtered, ordered, limited query.
    async fn query(
        &self,
        collection: &str,
        conditions: &[Condition],
        order_by: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, StoreError> {
        let records = self.list(collection).await?;
        Ok(apply_query(records, conditions, order_by, limit))
    }
}

pub(crate) fn validate_collection(collection: &str) -> Result<(), StoreError> {
    if is_valid_collection_name(collection) {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(collection.to_string()))
    }
}

pub(crate) fn new_record_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Builds the stored field map for a new record.
pub(crate) fn insert_data(fields: &Fields, now: DateTime<Utc>) -> Map<String, Value> {
    let mut data = Map::new();
    fields.apply_to(&mut data, now);
    let stamp = Value::String(format_timestamp(now));
    data.insert(CREATED_AT.to_string(), stamp.clone());
    data.insert(UPDATED_AT.to_string(), stamp);
    data
}

/// Merges an update into a stored field map. `createdAt` is never touched.
pub(crate) fn merge_update(data: &mut Map<String, Value>, fields: &Fields, now: DateTime<Utc>) {
    let mut fields = fields.clone();
    fields.remove(CREATED_AT);
    fields.apply_to(data, now);
    data.insert(
        UPDATED_AT.to_string(),
        Value::String(format_timestamp(now)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_insert_data_stamps_both_timestamps() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let fields = Fields::new()
            .set("name", "A")
            .set(CREATED_AT, "forged");

        let data = insert_data(&fields, now);

        assert_eq!(data["name"], json!("A"));
        assert_eq!(data[CREATED_AT], json!("2024-03-01T08:00:00.000000Z"));
        assert_eq!(data[UPDATED_AT], data[CREATED_AT]);
    }

    #[test]
    fn test_merge_update_preserves_created_at() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let mut data = insert_data(&Fields::new().set("status", "new"), created);

        merge_update(
            &mut data,
            &Fields::new()
                .set("status", "read")
                .set(CREATED_AT, "2000-01-01T00:00:00.000000Z"),
            later,
        );

        assert_eq!(data["status"], json!("read"));
        assert_eq!(data[CREATED_AT], json!("2024-03-01T08:00:00.000000Z"));
        assert_eq!(data[UPDATED_AT], json!("2024-03-02T08:00:00.000000Z"));
    }

    #[test]
    fn test_validate_collection() {
        assert!(validate_collection("contacts").is_ok());
        assert!(matches!(
            validate_collection("a/b"),
            Err(StoreError::InvalidCollection(_))
        ));
    }

    #[test]
    fn test_record_ids_are_unique() {
        assert_ne!(new_record_id(), new_record_id());
        assert_eq!(new_record_id().len(), 32);
    }
}
