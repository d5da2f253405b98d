use super::object::{RelayEvent, WatchKind};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A subscriber's end of the bus: its queue and its cancellation signal
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub receiver: mpsc::Receiver<Arc<RelayEvent>>,
    pub cancel: CancellationToken,
}

/// What the bus keeps per subscriber. It never owns the receiving end.
#[derive(Debug)]
struct Registration {
    sender: mpsc::Sender<Arc<RelayEvent>>,
    cancel: CancellationToken,
}

/// Fan-out of one kind's events to a dynamic set of bounded subscriber queues
#[derive(Debug, Clone)]
pub struct EventBus {
    kind: WatchKind,
    subscribers: Arc<RwLock<HashMap<String, Registration>>>,
    parent: CancellationToken,
    buffer: usize,
}

impl EventBus {
    /// Subscriber tokens are children of `parent`, so cancelling it ends every subscription
    #[must_use]
    pub fn new(kind: WatchKind, buffer: usize, parent: CancellationToken) -> Self {
        Self {
            kind,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            parent,
            buffer: buffer.max(1),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> WatchKind {
        self.kind
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_bootstrap(Vec::new())
    }

    /// Register a subscriber whose queue starts with `bootstrap`
    ///
    /// The queue is sized so the bootstrap batch never counts against the
    /// subscriber's overflow budget.
    #[must_use]
    pub fn subscribe_with_bootstrap(&self, bootstrap: Vec<Arc<RelayEvent>>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer + bootstrap.len());
        let bootstrap_len = bootstrap.len();
        for event in bootstrap {
            // capacity covers the whole batch
            let _ = sender.try_send(event);
        }

        let id = Uuid::new_v4().to_string();
        let cancel = self.parent.child_token();

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                Registration {
                    sender,
                    cancel: cancel.clone(),
                },
            );

        info!(
            "➕ Subscriber {} joined {} with {} bootstrap events",
            id, self.kind, bootstrap_len
        );

        Subscription {
            id,
            receiver,
            cancel,
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            debug!("➖ Subscriber {} left {}", id, self.kind);
        }
        removed
    }

    /// Enqueue `event` for every subscriber without waiting
    ///
    /// A subscriber whose queue is full is cancelled and dropped from the
    /// bus; it must reconnect and bootstrap again. Returns the number of
    /// subscribers the event was queued for.
    #[allow(clippy::significant_drop_tightening)]
    pub fn publish(&self, event: Arc<RelayEvent>) -> usize {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;

        subscribers.retain(|id, registration| {
            if registration.cancel.is_cancelled() {
                return false;
            }
            match registration.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "🚫 Subscriber {} to {} overflowed its queue, disconnecting",
                        id, self.kind
                    );
                    registration.cancel.cancel();
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} to {} already closed", id, self.kind);
                    false
                }
            }
        });

        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
