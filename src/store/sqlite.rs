//! SQLite-backed document store.
//!
//! Each record is one row of the `records` table, keyed by
//! `(collection, id)`, with its fields stored as a JSON object. Query
//! predicates are evaluated in process after loading the collection.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{
    insert_data, merge_update, new_record_id, validate_collection, ChangeEvent, ChangeHub,
    ChangeKind, DocumentStore, ServerClock, StoreError,
};
use crate::models::{format_timestamp, Fields, Record};

/// How long a connection waits on another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize the database connection pool and run migrations.
pub async fn init_db(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    data: String,
}

impl RecordRow {
    fn into_record(self) -> Result<Record, StoreError> {
        let data: Map<String, Value> = serde_json::from_str(&self.data)?;
        Ok(Record::new(self.id, data))
    }
}

/// Persistent document store on a SQLite pool.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: ServerClock,
    hub: ChangeHub,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: ServerClock::new(),
            hub: ChangeHub::new(),
        }
    }

    /// Opens (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = init_db(path).await?;
        tracing::info!("Opened document store at {}", path.display());
        Ok(Self::new(pool))
    }

    /// The underlying pool, shared with other tables of the site database.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn merge_row(
        &self,
        conn: &mut SqliteConnection,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<(), StoreError> {
        let row: Option<RecordRow> =
            sqlx::query_as("SELECT id, data FROM records WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        let mut record = row
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?
            .into_record()?;

        let now = self.clock.now();
        merge_update(&mut record.data, fields, now);

        sqlx::query(
            r#"
            UPDATE records
            SET data = ?, updated_at = ?
            WHERE collection = ? AND id = ?
            "#,
        )
        .bind(serde_json::to_string(&record.data)?)
        .bind(format_timestamp(now))
        .bind(collection)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(())
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
impl DocumentStore for SqliteStore {
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        validate_collection(collection)?;

        let id = new_record_id();
        let now = self.clock.now();
        let data = insert_data(&fields, now);
        let stamp = format_timestamp(now);

        sqlx::query(
            r#"
            INSERT INTO records (collection, id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(&id)
        .bind(serde_json::to_string(&data)?)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        self.notify(collection, &id, ChangeKind::Added).await;
        Ok(id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        validate_collection(collection)?;

        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT id, data FROM records WHERE collection = ? ORDER BY created_at, rowid",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        validate_collection(collection)?;

        let row: Option<RecordRow> =
            sqlx::query_as("SELECT id, data FROM records WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(RecordRow::into_record).transpose()
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        validate_collection(collection)?;

        // Write lock up front: a deferred read cannot upgrade while
        // another connection holds a read lock.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match self.merge_row(&mut conn, collection, id, &fields).await {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!("Rollback of {}/{} failed: {}", collection, id, rollback);
                }
                return Err(e);
            }
        }

        self.notify(collection, id, ChangeKind::Modified).await;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        validate_collection(collection)?;

        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, Operator, CREATED_AT};
    use serde_json::json;
    use tempfile::tempdir;

    async fn open_store(dir: &Path) -> SqliteStore {
        SqliteStore::open(&dir.join("site.db")).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("nested").join("site.db"))
            .await
            .unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(table_names, vec!["accounts", "records"]);
    }

    #[tokio::test]
    async fn test_add_get_roundtrip_keeps_json_types() {
        let temp_dir = tempdir().unwrap();
        let store = open_store(temp_dir.path()).await;

        let id = store
            .add(
                "contacts",
                Fields::new()
                    .set("name", "A")
                    .set("isRead", false)
                    .set("tags", json!(["web", "app"])),
            )
            .await
            .unwrap();

        let record = store.get("contacts", &id).await.unwrap().unwrap();
        assert_eq!(record.get_str("name"), Some("A"));
        assert_eq!(record.get_bool("isRead"), Some(false));
        assert_eq!(record.get("tags"), Some(&json!(["web", "app"])));
        assert!(record.created_at().is_some());
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_created_at() {
        let temp_dir = tempdir().unwrap();
        let store = open_store(temp_dir.path()).await;

        let id = store
            .add("contacts", Fields::new().set("status", "new").set("name", "A"))
            .await
            .unwrap();
        let before = store.get("contacts", &id).await.unwrap().unwrap();

        store
            .update("contacts", &id, Fields::new().set("status", "read"))
            .await
            .unwrap();

        let after = store.get("contacts", &id).await.unwrap().unwrap();
        assert_eq!(after.get_str("status"), Some("read"));
        assert_eq!(after.get_str("name"), Some("A"));
        assert_eq!(after.get(CREATED_AT), before.get(CREATED_AT));
        assert!(after.updated_at() > before.updated_at());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let temp_dir = tempdir().unwrap();
        let store = open_store(temp_dir.path()).await;

        let err = store
            .update("contacts", "missing", Fields::new().set("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let temp_dir = tempdir().unwrap();
        let store = open_store(temp_dir.path()).await;

        let id = store.add("contacts", Fields::new()).await.unwrap();

        assert!(store.get("quick_contacts", &id).await.unwrap().is_none());
        assert!(store.list("quick_contacts").await.unwrap().is_empty());
        assert!(!store.delete("quick_contacts", &id).await.unwrap());
        assert!(store.delete("contacts", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_filters_orders_and_limits() {
        let temp_dir = tempdir().unwrap();
        let store = open_store(temp_dir.path()).await;

        for (email, status) in [
            ("a@x.com", "active"),
            ("b@x.com", "unsubscribed"),
            ("c@x.com", "active"),
        ] {
            store
                .add(
                    "newsletter_subscribers",
                    Fields::new()
                        .set("email", email)
                        .set("status", status)
                        .server_timestamp("subscribedAt"),
                )
                .await
                .unwrap();
        }

        let active = store
            .query(
                "newsletter_subscribers",
                &[Condition::eq("status", "active")],
                Some("subscribedAt"),
                None,
            )
            .await
            .unwrap();
        let emails: Vec<_> = active.iter().filter_map(|r| r.get_str("email")).collect();
        assert_eq!(emails, vec!["c@x.com", "a@x.com"]);

        let limited = store
            .query(
                "newsletter_subscribers",
                &[Condition::new("email", Operator::Gt, "a@x.com")],
                None,
                Some(1),
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].get_str("email"), Some("b@x.com"));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let id = {
            let store = open_store(temp_dir.path()).await;
            store
                .add("users", Fields::new().set("uid", "u1"))
                .await
                .unwrap()
        };

        let store = open_store(temp_dir.path()).await;
        let record = store.get("users", &id).await.unwrap().unwrap();
        assert_eq!(record.get_str("uid"), Some("u1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_all_succeed() {
        let temp_dir = tempdir().unwrap();
        let store = std::sync::Arc::new(open_store(temp_dir.path()).await);

        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(
                store
                    .add("contacts", Fields::new().set("n", i).set("isRead", false))
                    .await
                    .unwrap(),
            );
        }

        let tasks: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .update("contacts", &id, Fields::new().set("isRead", true))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let records = store.list("contacts").await.unwrap();
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| r.get_bool("isRead") == Some(true)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_to_one_record_keep_every_field() {
        let temp_dir = tempdir().unwrap();
        let store = std::sync::Arc::new(open_store(temp_dir.path()).await);
        let id = store.add("contacts", Fields::new()).await.unwrap();

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    store
                        .update("contacts", &id, Fields::new().set(format!("f{}", i), i))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let record = store.get("contacts", &id).await.unwrap().unwrap();
        for i in 0..10 {
            assert_eq!(record.get(&format!("f{}", i)), Some(&json!(i)));
        }
    }
}
