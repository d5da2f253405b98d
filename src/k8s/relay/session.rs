/**
 * Subscription Session
 *
 * One per client connection. Forwards the subscriber's queue in arrival order
 * until its cancellation signal fires or the session is dropped, and
 * unsubscribes from the bus exactly once on the way out.
 */
use super::bus::{EventBus, Subscription};
use super::object::{RelayEvent, WatchKind};
use futures::stream::{Stream, StreamExt, TakeUntil};
use pin_project::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::info;

/// Unsubscribes when the session goes away, whatever the cause
struct Registration {
    bus: EventBus,
    id: String,
    cancel: CancellationToken,
    _tracked: Option<TaskTrackerToken>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.id);
        let reason = if self.cancel.is_cancelled() {
            "cancelled"
        } else {
            "client disconnected"
        };
        info!(
            "👋 Subscriber {} left {} ({})",
            self.id,
            self.bus.kind(),
            reason
        );
    }
}

#[pin_project]
pub struct SubscriptionSession {
    #[pin]
    events: TakeUntil<ReceiverStream<Arc<RelayEvent>>, WaitForCancellationFutureOwned>,
    registration: Registration,
}

impl SubscriptionSession {
    /// Wrap a subscription taken from `bus`
    ///
    /// `tracked` keeps the owning service's task tracker open until the session ends.
    #[must_use]
    pub fn new(bus: EventBus, subscription: Subscription, tracked: Option<TaskTrackerToken>) -> Self {
        let Subscription {
            id,
            receiver,
            cancel,
        } = subscription;

        Self {
            events: ReceiverStream::new(receiver).take_until(cancel.clone().cancelled_owned()),
            registration: Registration {
                bus,
                id,
                cancel,
                _tracked: tracked,
            },
        }
    }

    /// Subscribe to `bus` with no bootstrap batch
    #[must_use]
    pub fn open(bus: &EventBus) -> Self {
        let subscription = bus.subscribe();
        Self::new(bus.clone(), subscription, None)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.registration.id
    }

    #[must_use]
    pub const fn kind(&self) -> WatchKind {
        self.registration.bus.kind()
    }

    /// Cancelling this token ends the session
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.registration.cancel.clone()
    }
}

impl Stream for SubscriptionSession {
    type Item = Arc<RelayEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().events.poll_next(cx)
    }
}
