use thiserror::Error;

/// Errors returned by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collection name cannot be used as a store key.
    #[error("Invalid collection name: '{0}'")]
    InvalidCollection(String),
    /// An update targeted a record that does not exist.
    #[error("No document to update: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Failed to encode document: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
