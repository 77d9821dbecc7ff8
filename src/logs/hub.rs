//! Live log fan-out keyed by execution id

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct HubInner {
    subscribers: DashMap<Uuid, HashMap<u64, UnboundedSender<String>>>,
    next_subscriber: AtomicU64,
}

/// Registry of live log subscribers per execution
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct LogBroadcastHub {
    inner: Arc<HubInner>,
}

impl LogBroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for an execution's log lines.
    ///
    /// The subscriber first receives a connection line, then every line
    /// published for the execution until it is dropped or closed.
    pub fn subscribe(&self, execution_id: Uuid) -> LogSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber_id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

        let _ = tx.send(format!("Connected to flow execution logs: {}", execution_id));
        self.inner
            .subscribers
            .entry(execution_id)
            .or_default()
            .insert(subscriber_id, tx);

        debug!(%execution_id, subscriber_id, "Log subscriber added");

        LogSubscription {
            execution_id,
            subscriber_id,
            receiver: rx,
            hub: self.clone(),
        }
    }

    /// Send a line to every live subscriber of an execution.
    ///
    /// Subscribers whose channel is closed are removed.
    pub fn publish(&self, execution_id: Uuid, line: &str) {
        let emptied = match self.inner.subscribers.get_mut(&execution_id) {
            Some(mut sinks) => {
                sinks.retain(|subscriber_id, tx| {
                    let alive = tx.send(line.to_string()).is_ok();
                    if !alive {
                        debug!(%execution_id, subscriber_id, "Pruning closed log subscriber");
                    }
                    alive
                });
                sinks.is_empty()
            }
            None => false,
        };

        if emptied {
            self.inner
                .subscribers
                .remove_if(&execution_id, |_, sinks| sinks.is_empty());
        }
    }

    /// Remove one subscriber
    pub fn unsubscribe(&self, execution_id: Uuid, subscriber_id: u64) {
        let emptied = match self.inner.subscribers.get_mut(&execution_id) {
            Some(mut sinks) => {
                sinks.remove(&subscriber_id);
                sinks.is_empty()
            }
            None => false,
        };

        if emptied {
            self.inner
                .subscribers
                .remove_if(&execution_id, |_, sinks| sinks.is_empty());
        }
    }

    /// Number of registered subscribers for an execution
    pub fn subscriber_count(&self, execution_id: Uuid) -> usize {
        self.inner
            .subscribers
            .get(&execution_id)
            .map(|sinks| sinks.len())
            .unwrap_or(0)
    }

    /// Number of executions with at least one subscriber
    pub fn active_executions(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// Receiving end of a log subscription; unsubscribes when dropped
#[derive(Debug)]
pub struct LogSubscription {
    execution_id: Uuid,
    subscriber_id: u64,
    receiver: UnboundedReceiver<String>,
    hub: LogBroadcastHub,
}

impl LogSubscription {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Wait for the next line; `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Take a line if one is already buffered
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }

    /// Stop accepting lines without deregistering; the hub prunes the
    /// subscriber on its next publish
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.execution_id, self.subscriber_id);
    }
}
