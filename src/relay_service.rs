/**
Relay service for `kuberelay`

Composition root: one watch source, mirror and event bus per watched kind,
all stopped together by a single shutdown signal. The service is handed to
the HTTP layer explicitly; there is no global registry.
*/
use crate::error::{Error, Result};
use crate::k8s::relay::{
    ClusterApi, ClusterWatchSource, KindRelay, RelayConfig, SubscriptionSession, WatchKind,
    pipeline,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

#[derive(Debug)]
struct Inner {
    relays: BTreeMap<WatchKind, KindRelay>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Cheaply cloneable handle to the running relay
#[derive(Debug, Clone)]
pub struct RelayService {
    inner: Arc<Inner>,
}

impl RelayService {
    /// Spawn one pipeline per `(kind, api)` pair
    ///
    /// Must be called from within a tokio runtime. A kind listed twice keeps
    /// the first api.
    #[must_use]
    pub fn start(apis: Vec<(WatchKind, Arc<dyn ClusterApi>)>, config: &RelayConfig) -> Self {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut relays = BTreeMap::new();

        for (kind, api) in apis {
            if relays.contains_key(&kind) {
                continue;
            }
            let relay = KindRelay::new(kind, config.subscriber_buffer, shutdown.child_token());
            let source = ClusterWatchSource::start(api, kind, None, config, shutdown.child_token());
            tracker.spawn(pipeline::run(source, relay.clone()));
            relays.insert(kind, relay);
        }

        info!(
            "🚀 Relay started for {}",
            relays
                .keys()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self {
            inner: Arc::new(Inner {
                relays,
                shutdown,
                tracker,
            }),
        }
    }

    /// Kinds with a running pipeline
    #[must_use]
    pub fn kinds(&self) -> Vec<WatchKind> {
        self.inner.relays.keys().copied().collect()
    }

    /// Open a session that starts with the current state of `kind`
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownKind` if `kind` is not watched, or
    /// `Error::Custom` once shutdown has begun.
    pub fn open_session(&self, kind: WatchKind) -> Result<SubscriptionSession> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Custom("relay is shutting down".to_string()));
        }
        let relay = self
            .inner
            .relays
            .get(&kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))?;
        relay.open_session(Some(self.inner.tracker.token()))
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: WatchKind) -> usize {
        self.inner
            .relays
            .get(&kind)
            .map_or(0, |relay| relay.bus().subscriber_count())
    }

    #[must_use]
    pub fn object_count(&self, kind: WatchKind) -> usize {
        self.inner
            .relays
            .get(&kind)
            .map_or(0, KindRelay::object_count)
    }

    /// Token cancelled when shutdown begins
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Cancel every watch source and session without waiting
    pub fn begin_shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("🛑 Relay shutdown requested");
            self.inner.shutdown.cancel();
        }
    }

    /// Cancel everything and wait until every pipeline and session has ended
    pub async fn shutdown(&self) {
        self.begin_shutdown();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("🛑 Relay stopped");
    }
}
