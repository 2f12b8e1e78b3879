//! Process-local notification bus and the subscription handles it hands out.

use std::sync::{Arc, Weak};

use shared::domain::Topic;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::SelectionsChanged;

pub const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Topic>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many live subscriptions saw the notification.
    pub fn publish(&self, topic: Topic) -> usize {
        match self.tx.send(topic) {
            Ok(receivers) => {
                debug!(topic = topic.as_str(), receivers, "published notification");
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Registers `handler` for `topic`.
    ///
    /// The bus only keeps a weak reference to the handler: delivery stops when
    /// the handler is dropped, when the returned [`Subscription`] is cancelled
    /// or dropped, or when the bus itself goes away. Handler calls for one
    /// subscription never overlap.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, topic: Topic, handler: &Arc<dyn SelectionsChanged>) -> Subscription {
        let mut rx = self.tx.subscribe();
        let handler: Weak<dyn SelectionsChanged> = Arc::downgrade(handler);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(received) if received == topic => {}
                    Ok(_) => continue,
                    // Handlers rebuild from scratch, so one delivery covers every missed one.
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(topic = topic.as_str(), skipped, "notification subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }

                let Some(handler) = handler.upgrade() else {
                    break;
                };
                handler.selections_changed().await;
            }
            debug!(topic = topic.as_str(), "notification subscription ended");
        });

        Subscription {
            topic,
            task: Some(task),
        }
    }
}

/// Owns the delivery task of one bus registration.
pub struct Subscription {
    topic: Topic,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}
