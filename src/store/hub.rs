//! Change notification fan-out for live subscriptions.
//!
//! Every successful write publishes a [`ChangeEvent`] on the channel for
//! its collection. Subscribers receive events for one collection only.
//! A channel is dropped once its last subscriber goes away.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Buffered events per collection before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 64;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A write observed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

/// Tracks broadcast channels keyed by collection name.
#[derive(Debug, Default)]
pub struct ChangeHub {
    channels: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to changes on a collection.
    pub async fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);

        if let Some(sender) = channels.get(collection) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
            channels.insert(collection.to_string(), sender);
            receiver
        }
    }

    /// Publishes a change to all subscribers of its collection.
    pub async fn publish(&self, event: ChangeEvent) {
        let abandoned = {
            let channels = self.channels.read().await;
            let Some(sender) = channels.get(&event.collection) else {
                return;
            };

            match sender.send(event.clone()) {
                Ok(delivered) => {
                    tracing::debug!(
                        "change {:?} {}/{} delivered to {} subscriber(s)",
                        event.kind,
                        event.collection,
                        event.id,
                        delivered
                    );
                    false
                }
                Err(_) => true,
            }
        };

        if abandoned {
            let mut channels = self.channels.write().await;
            if channels
                .get(&event.collection)
                .is_some_and(|sender| sender.receiver_count() == 0)
            {
                channels.remove(&event.collection);
            }
        }
    }

    /// Number of collections with a live channel.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
