//! Durable account storage for [`LocalIdentityProvider`](super::LocalIdentityProvider).
//!
//! The provider keeps its working set in memory and writes every account
//! change through an [`AccountStore`]. Lockout counters are not stored;
//! they reset when the process restarts.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::models::format_timestamp;
use crate::store::StoreError;

/// The persisted part of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub federated_subject: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub disabled: bool,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load_accounts(&self) -> Result<Vec<StoredAccount>, StoreError>;

    /// Inserts or replaces an account.
    async fn save_account(&self, account: &StoredAccount) -> Result<(), StoreError>;

    async fn remove_account(&self, uid: &str) -> Result<(), StoreError>;
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    data: String,
}

/// Accounts in the `accounts` table of the site database.
#[derive(Debug, Clone)]
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    /// Wraps a pool already migrated by [`init_db`](crate::store::init_db).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn load_accounts(&self) -> Result<Vec<StoredAccount>, StoreError> {
        let rows: Vec<AccountRow> =
            sqlx::query_as("SELECT data FROM accounts ORDER BY created_at, uid")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| serde_json::from_str(&row.data).map_err(StoreError::from))
            .collect()
    }

    async fn save_account(&self, account: &StoredAccount) -> Result<(), StoreError> {
        let now = format_timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO accounts (uid, email, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(uid) DO UPDATE SET
                email = excluded.email,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.uid)
        .bind(&account.email)
        .bind(serde_json::to_string(account)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_account(&self, uid: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM accounts WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
