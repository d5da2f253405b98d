/**
 * Per-kind relay pipeline: Cluster Watch Source -> Local Mirror -> Event Bus
 */
use super::bus::EventBus;
use super::mirror::LocalMirror;
use super::object::{EventKind, RelayEvent, WatchKind};
use super::session::SubscriptionSession;
use super::source::{ClusterWatchSource, SourceEvent};
use crate::error::{Error, Result};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{error, info};

/// Shared handle to one kind's mirror and bus
#[derive(Debug, Clone)]
pub struct KindRelay {
    kind: WatchKind,
    mirror: Arc<RwLock<LocalMirror>>,
    bus: EventBus,
}

impl KindRelay {
    #[must_use]
    pub fn new(kind: WatchKind, subscriber_buffer: usize, parent: CancellationToken) -> Self {
        Self {
            kind,
            mirror: Arc::new(RwLock::new(LocalMirror::new(kind))),
            bus: EventBus::new(kind, subscriber_buffer, parent),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> WatchKind {
        self.kind
    }

    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Number of objects currently mirrored
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.mirror.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Subscribe with an Added event for every mirrored object
    ///
    /// The mirror's read lock is held while registering, and events are
    /// published under its write lock, so the bootstrap batch and the live
    /// feed neither overlap nor leave a gap.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if the pipeline panicked while holding the mirror
    pub fn open_session(&self, tracked: Option<TaskTrackerToken>) -> Result<SubscriptionSession> {
        let subscription = {
            let mirror = self.mirror.read().map_err(|_| {
                Error::LockPoisoned(format!(
                    "{} mirror - this indicates a prior panic, application may be in an inconsistent state",
                    self.kind
                ))
            })?;
            let bootstrap = mirror
                .snapshot()
                .into_iter()
                .map(|object| Arc::new(RelayEvent::new(EventKind::Added, self.kind, object)))
                .collect();
            self.bus.subscribe_with_bootstrap(bootstrap)
        };

        Ok(SubscriptionSession::new(self.bus.clone(), subscription, tracked))
    }

    /// Reconcile one source event and publish what it produced
    ///
    /// Returns false if the source must relist because the notification broke
    /// the version ordering the API server guarantees.
    #[allow(clippy::significant_drop_tightening)]
    pub fn handle(&self, event: SourceEvent) -> bool {
        let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            SourceEvent::Notification(notification) => match mirror.apply(notification) {
                Ok(Some(relay_event)) => {
                    self.bus.publish(Arc::new(relay_event));
                    true
                }
                Ok(None) => true,
                Err(e) => {
                    error!("❌ {} orchestration API contract violation: {}", self.kind, e);
                    false
                }
            },
            SourceEvent::ListingComplete(version) => {
                for relay_event in mirror.complete_listing(version) {
                    self.bus.publish(Arc::new(relay_event));
                }
                true
            }
        }
    }
}

/// Drive `source` until it stops
pub async fn run(mut source: ClusterWatchSource, relay: KindRelay) {
    info!("📡 {} relay pipeline started", relay.kind());

    while let Some(event) = source.next().await {
        if !relay.handle(event) {
            source.restart();
        }
    }

    info!("📡 {} relay pipeline shutting down", relay.kind());
}
