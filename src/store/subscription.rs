//! Live collection snapshots.

use futures::Stream;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::{ChangeEvent, DocumentStore, StoreError};
use crate::models::{Record, CREATED_AT};

/// A live view of a collection.
///
/// The first call to [`Subscription::next`] returns the current records;
/// each later call waits for the next write to the collection and returns
/// a fresh snapshot. Records are ordered by `createdAt`, newest first.
/// Writes that arrive while the consumer is busy are folded into a single
/// snapshot.
pub struct Subscription {
    store: Arc<dyn DocumentStore>,
    collection: String,
    changes: broadcast::Receiver<ChangeEvent>,
    primed: bool,
}

impl Subscription {
    /// Starts watching `collection`.
    ///
    /// Changes are captured from this point on, so no write between
    /// subscribing and the first snapshot is missed.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        collection: &str,
    ) -> Result<Self, StoreError> {
        let changes = store.watch(collection).await?;
        Ok(Self {
            store,
            collection: collection.to_string(),
            changes,
            primed: false,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Waits for the next snapshot.
    ///
    /// Returns `None` once the store stops publishing changes.
    pub async fn next(&mut self) -> Option<Result<Vec<Record>, StoreError>> {
        if self.primed {
            match self.changes.recv().await {
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        "subscription to {} skipped {} change(s)",
                        self.collection,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
            self.drain_pending();
        }

        self.primed = true;
        Some(self.snapshot().await)
    }

    /// Turns the subscription into a [`Stream`] of snapshots.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Record>, StoreError>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let snapshot = sub.next().await?;
            Some((snapshot, sub))
        })
    }

    fn drain_pending(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    async fn snapshot(&self) -> Result<Vec<Record>, StoreError> {
        self.store
            .query(&self.collection, &[], Some(CREATED_AT), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fields;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_snapshot_is_immediate() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        store
            .add("contacts", Fields::new().set("name", "A"))
            .await
            .unwrap();

        let mut sub = Subscription::open(store, "contacts").await.unwrap();
        let snapshot = sub.next().await.unwrap().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(sub.collection(), "contacts");
    }

    #[tokio::test]
    async fn test_snapshots_follow_writes_newest_first() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut sub = Subscription::open(store.clone(), "contacts").await.unwrap();
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        store
            .add("contacts", Fields::new().set("name", "first"))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);

        store
            .add("contacts", Fields::new().set("name", "second"))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap().unwrap();
        let names: Vec<_> = snapshot.iter().filter_map(|r| r.get_str("name")).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_burst_is_coalesced() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut sub = Subscription::open(store.clone(), "feedback").await.unwrap();
        sub.next().await.unwrap().unwrap();

        for i in 0..5 {
            store
                .add("feedback", Fields::new().set("n", i))
                .await
                .unwrap();
        }

        let snapshot = sub.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 5);

        // Everything was folded into the previous snapshot
        let pending = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_stream_adapter() {
        use futures::StreamExt;

        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let sub = Subscription::open(store.clone(), "contacts").await.unwrap();
        let mut stream = Box::pin(sub.into_stream());

        assert!(stream.next().await.unwrap().unwrap().is_empty());
        store.add("contacts", Fields::new()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_collections_do_not_wake() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut sub = Subscription::open(store.clone(), "contacts").await.unwrap();
        sub.next().await.unwrap().unwrap();

        store.add("users", Fields::new()).await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(pending.is_err());
    }
}
