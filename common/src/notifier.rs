use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Progress events pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierEvent {
    IngestionComplete {
        memory_id: String,
    },
    InboxUpdate {
        memory_id: String,
        action: String,
    },
    NewCluster {
        cluster_id: String,
        member_count: usize,
    },
}

struct Sink {
    id: String,
    sender: mpsc::UnboundedSender<NotifierEvent>,
}

/// Fan-out of progress events to connected subscribers, keyed by user.
/// Delivery is best-effort and fire-and-forget; a dead sink never blocks the
/// others and is pruned on the next publish touching it.
#[derive(Default)]
pub struct Notifier {
    subscribers: RwLock<HashMap<String, Vec<Sink>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink for a user. The returned id can be handed to
    /// `unsubscribe`; dropping the receiver also detaches the sink lazily.
    pub async fn subscribe(
        &self,
        user_id: &str,
    ) -> (String, mpsc::UnboundedReceiver<NotifierEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();

        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(user_id.to_string()).or_default().push(Sink {
            id: id.clone(),
            sender,
        });

        (id, receiver)
    }

    pub async fn unsubscribe(&self, user_id: &str, sink_id: &str) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(sinks) = subscribers.get_mut(user_id) {
            sinks.retain(|sink| sink.id != sink_id);
            if sinks.is_empty() {
                subscribers.remove(user_id);
            }
        }
    }

    pub async fn publish(&self, user_id: &str, event: NotifierEvent) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(sinks) = subscribers.get_mut(user_id) {
            sinks.retain(|sink| sink.sender.send(event.clone()).is_ok());
            if sinks.is_empty() {
                subscribers.remove(user_id);
            }
        }
    }

    pub async fn broadcast(&self, event: NotifierEvent) {
        let mut subscribers = self.subscribers.write().await;
        for sinks in subscribers.values_mut() {
            sinks.retain(|sink| sink.sender.send(event.clone()).is_ok());
        }
        subscribers.retain(|_, sinks| !sinks.is_empty());
    }

    pub async fn subscriber_count(&self, user_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(user_id)
            .map_or(0, Vec::len)
    }
}
