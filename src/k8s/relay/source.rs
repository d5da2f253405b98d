/**
 * Cluster Watch Source
 *
 * Pull-based list-then-watch sequence for a single workload kind. Every
 * (re)start lists the kind from scratch, emits one `List` notification per
 * object followed by `ListingComplete`, then follows the incremental watch.
 * Transport failures back off and relist; expiry relists immediately.
 * Malformed items are skipped without dropping the watch.
 */
use super::config::RelayConfig;
use super::kube_api::{ClusterApi, NoticeStream, WatchNotice};
use super::object::{VersionMarker, WatchKind, WatchedObject};
use futures::StreamExt;
use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOp {
    List,
    Add,
    Update,
    Delete,
}

/// An unclassified change, as reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub op: RawOp,
    pub object: WatchedObject,
    /// The listing's marker for `List`, the object's marker otherwise
    pub version: VersionMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Notification(RawNotification),
    /// Every object of the preceding listing batch has been emitted
    ListingComplete(VersionMarker),
}

/// Exponential backoff with jitter drawn from `[delay/2, delay]`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; doubles the base up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        rand::thread_rng().gen_range(base / 2..=base)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum Phase {
    Relist,
    /// Reopen the watch from `last_version` without relisting
    Resume,
    Watching(NoticeStream),
    Backoff,
}

pub struct ClusterWatchSource {
    api: Arc<dyn ClusterApi>,
    kind: WatchKind,
    cancel: CancellationToken,
    phase: Phase,
    buffer: VecDeque<SourceEvent>,
    last_version: Option<VersionMarker>,
    backoff: Backoff,
}

/// Race `fut` against cancellation; `None` once the token is cancelled
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

impl ClusterWatchSource {
    /// Start a source for `kind`
    ///
    /// With `resume` set, the first attempt watches from that marker without
    /// listing; callers pass it only when their mirror already reflects it.
    /// Expiry or failure falls back to a full relist.
    #[must_use]
    pub fn start(
        api: Arc<dyn ClusterApi>,
        kind: WatchKind,
        resume: Option<VersionMarker>,
        config: &RelayConfig,
        cancel: CancellationToken,
    ) -> Self {
        info!("🔍 Starting {} watch source", kind);
        Self {
            api,
            kind,
            cancel,
            phase: if resume.is_some() {
                Phase::Resume
            } else {
                Phase::Relist
            },
            buffer: VecDeque::new(),
            last_version: resume,
            backoff: Backoff::new(config.initial_backoff, config.max_backoff),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> WatchKind {
        self.kind
    }

    /// Marker of the last listing or notification emitted; a resume hint only
    #[must_use]
    pub const fn last_version(&self) -> Option<VersionMarker> {
        self.last_version
    }

    /// Discard buffered notifications and relist after a backoff delay
    pub fn restart(&mut self) {
        warn!("🔄 {} watch source restarting from a fresh listing", self.kind);
        self.buffer.clear();
        self.phase = Phase::Backoff;
    }

    /// Stop the source; `next` returns `None` from now on
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Pull the next notification, suspending on the cluster or on backoff
    pub async fn next(&mut self) -> Option<SourceEvent> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(event) = self.buffer.pop_front() {
                return Some(event);
            }

            let api = Arc::clone(&self.api);
            match std::mem::replace(&mut self.phase, Phase::Relist) {
                Phase::Relist => match cancellable(&self.cancel, api.list()).await? {
                    Ok(listing) => {
                        info!(
                            "📋 Listed {} {} at version {}",
                            listing.objects.len(),
                            self.kind,
                            listing.version
                        );
                        let version = listing.version;
                        self.buffer.extend(listing.objects.into_iter().map(|object| {
                            SourceEvent::Notification(RawNotification {
                                op: RawOp::List,
                                object,
                                version,
                            })
                        }));
                        self.buffer.push_back(SourceEvent::ListingComplete(version));
                        self.last_version = Some(version);
                        self.backoff.reset();
                        self.phase = Phase::Resume;
                    }
                    Err(e) => {
                        error!("❌ {} listing failed: {}", self.kind, e);
                        self.phase = Phase::Backoff;
                    }
                },
                Phase::Resume => {
                    let Some(from) = self.last_version else {
                        continue;
                    };
                    match cancellable(&self.cancel, api.watch(from)).await? {
                        Ok(stream) => {
                            debug!("👀 {} watch opened at version {}", self.kind, from);
                            self.phase = Phase::Watching(stream);
                        }
                        Err(e) if e.is_expired() => {
                            info!("⌛ {} version {} expired, relisting", self.kind, from);
                        }
                        Err(e) => {
                            error!("❌ {} watch failed to open: {}", self.kind, e);
                            self.phase = Phase::Backoff;
                        }
                    }
                }
                Phase::Watching(mut stream) => match cancellable(&self.cancel, stream.next()).await? {
                    None => {
                        debug!("🔍 {} watch stream ended normally, resuming", self.kind);
                        self.phase = Phase::Resume;
                    }
                    Some(Ok(notice)) => {
                        self.phase = Phase::Watching(stream);
                        if let Some(event) = self.on_notice(notice) {
                            return Some(event);
                        }
                    }
                    Some(Err(e)) if e.is_malformed() => {
                        warn!("⚠️  Skipping malformed {} watch item: {}", self.kind, e);
                        self.phase = Phase::Watching(stream);
                    }
                    Some(Err(e)) => {
                        error!("❌ {} watch stream failed: {}", self.kind, e);
                        self.phase = Phase::Backoff;
                    }
                },
                Phase::Backoff => {
                    let delay = self.backoff.next_delay();
                    warn!("⏳ {} watch source retrying in {:?}", self.kind, delay);
                    cancellable(&self.cancel, sleep(delay)).await?;
                }
            }
        }
    }

    fn on_notice(&mut self, notice: WatchNotice) -> Option<SourceEvent> {
        let (op, object) = match notice {
            WatchNotice::Added(object) => (RawOp::Add, object),
            WatchNotice::Modified(object) => (RawOp::Update, object),
            WatchNotice::Deleted(object) => (RawOp::Delete, object),
            WatchNotice::Bookmark(version) => {
                self.last_version = Some(version);
                return None;
            }
            WatchNotice::Expired => {
                info!("⌛ {} watch expired, relisting", self.kind);
                self.phase = Phase::Relist;
                return None;
            }
        };
        let version = object.version;
        self.last_version = Some(version);
        Some(SourceEvent::Notification(RawNotification {
            op,
            object,
            version,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::k8s::relay::kube_api::Listing;
    use crate::k8s::relay::object::{ObjectKey, WorkloadStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn object(name: &str, version: u64) -> WatchedObject {
        WatchedObject::new(
            ObjectKey::new("default", name),
            VersionMarker(version),
            WorkloadStatus::default(),
        )
    }

    /// Lists return `listings` in turn; watches pop scripted notice batches
    struct ScriptedApi {
        listings: Mutex<VecDeque<Result<Listing>>>,
        watches: Mutex<VecDeque<Result<Vec<Result<WatchNotice>>>>>,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl ClusterApi for ScriptedApi {
        async fn list(&self) -> Result<Listing> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.listings
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Custom("no more listings".to_string())))
        }

        async fn watch(&self, _from: VersionMarker) -> Result<NoticeStream> {
            let next = self.watches.lock().unwrap().pop_front();
            match next {
                Some(Ok(items)) => Ok(futures::stream::iter(items).boxed()),
                Some(Err(e)) => Err(e),
                None => Ok(futures::stream::pending().boxed()),
            }
        }
    }

    fn config() -> RelayConfig {
        RelayConfig {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            ..RelayConfig::default()
        }
    }

    fn op_of(event: &SourceEvent) -> Option<(RawOp, String)> {
        match event {
            SourceEvent::Notification(n) => Some((n.op, n.object.key.name.clone())),
            SourceEvent::ListingComplete(_) => None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
        for expected_max in [100, 200, 400, 400] {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_millis(expected_max));
            assert!(delay >= Duration::from_millis(expected_max / 2));
        }
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_list_then_watch_order() {
        let api = Arc::new(ScriptedApi {
            listings: Mutex::new(VecDeque::from([Ok(Listing {
                version: VersionMarker(10),
                objects: vec![object("a", 5), object("b", 9)],
            })])),
            watches: Mutex::new(VecDeque::from([Ok(vec![
                Ok(WatchNotice::Modified(object("a", 11))),
                Ok(WatchNotice::Bookmark(VersionMarker(12))),
                Ok(WatchNotice::Deleted(object("b", 13))),
            ])])),
            list_calls: AtomicUsize::new(0),
        });
        let mut source =
            ClusterWatchSource::start(api, WatchKind::Deployments, None, &config(), CancellationToken::new());

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(source.next().await.unwrap());
        }

        assert_eq!(op_of(&seen[0]), Some((RawOp::List, "a".to_string())));
        assert_eq!(op_of(&seen[1]), Some((RawOp::List, "b".to_string())));
        assert_eq!(seen[2], SourceEvent::ListingComplete(VersionMarker(10)));
        assert_eq!(op_of(&seen[3]), Some((RawOp::Update, "a".to_string())));
        assert_eq!(op_of(&seen[4]), Some((RawOp::Delete, "b".to_string())));
        assert_eq!(source.last_version(), Some(VersionMarker(13)));
    }

    #[tokio::test]
    async fn test_expired_watch_relists() {
        let api = Arc::new(ScriptedApi {
            listings: Mutex::new(VecDeque::from([
                Ok(Listing {
                    version: VersionMarker(10),
                    objects: vec![object("a", 5)],
                }),
                Ok(Listing {
                    version: VersionMarker(50),
                    objects: vec![object("a", 40)],
                }),
            ])),
            watches: Mutex::new(VecDeque::from([Err(Error::VersionExpired)])),
            list_calls: AtomicUsize::new(0),
        });
        let mut source = ClusterWatchSource::start(
            api.clone(),
            WatchKind::Deployments,
            None,
            &config(),
            CancellationToken::new(),
        );

        for _ in 0..2 {
            source.next().await.unwrap();
        }
        let relisted = source.next().await.unwrap();
        assert_eq!(op_of(&relisted), Some((RawOp::List, "a".to_string())));
        assert_eq!(source.next().await, Some(SourceEvent::ListingComplete(VersionMarker(50))));
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_listing_backs_off_and_retries() {
        let api = Arc::new(ScriptedApi {
            listings: Mutex::new(VecDeque::from([
                Err(Error::Custom("connection refused".to_string())),
                Ok(Listing {
                    version: VersionMarker(3),
                    objects: vec![],
                }),
            ])),
            watches: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
        });
        let mut source = ClusterWatchSource::start(
            api.clone(),
            WatchKind::Deployments,
            None,
            &config(),
            CancellationToken::new(),
        );

        assert_eq!(source.next().await, Some(SourceEvent::ListingComplete(VersionMarker(3))));
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_ends_sequence() {
        let api = Arc::new(ScriptedApi {
            listings: Mutex::new(VecDeque::from([Ok(Listing {
                version: VersionMarker(1),
                objects: vec![object("a", 1)],
            })])),
            watches: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
        });
        let mut source =
            ClusterWatchSource::start(api, WatchKind::Deployments, None, &config(), CancellationToken::new());

        assert!(source.next().await.is_some());
        source.stop();
        // the buffered ListingComplete is not delivered after stop
        assert_eq!(source.next().await, None);
        assert_eq!(source.next().await, None);
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_watch() {
        let api = Arc::new(ScriptedApi {
            listings: Mutex::new(VecDeque::from([Ok(Listing {
                version: VersionMarker(1),
                objects: vec![],
            })])),
            watches: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let mut source =
            ClusterWatchSource::start(api, WatchKind::Deployments, None, &config(), cancel.clone());

        assert!(source.next().await.is_some());
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        assert_eq!(source.next().await, None);
        stopper.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_item_keeps_watch_open() {
        let Err(decode) = k8s_openapi::serde_json::from_str::<k8s_openapi::serde_json::Value>("{") else {
            panic!("truncated JSON decoded");
        };
        let api = Arc::new(ScriptedApi {
            listings: Mutex::new(VecDeque::from([Ok(Listing {
                version: VersionMarker(1),
                objects: vec![],
            })])),
            watches: Mutex::new(VecDeque::from([Ok(vec![
                Err(Error::Json(decode)),
                Err(Error::Malformed("deployment without a name".to_string())),
                Ok(WatchNotice::Added(object("a", 5))),
            ])])),
            list_calls: AtomicUsize::new(0),
        });
        let mut source = ClusterWatchSource::start(
            api.clone(),
            WatchKind::Deployments,
            None,
            &config(),
            CancellationToken::new(),
        );

        assert_eq!(source.next().await, Some(SourceEvent::ListingComplete(VersionMarker(1))));
        let added = source.next().await.unwrap();
        assert_eq!(op_of(&added), Some((RawOp::Add, "a".to_string())));
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_drops_watch_and_relists() {
        let api = Arc::new(ScriptedApi {
            listings: Mutex::new(VecDeque::from([
                Ok(Listing {
                    version: VersionMarker(10),
                    objects: vec![object("a", 5)],
                }),
                Ok(Listing {
                    version: VersionMarker(12),
                    objects: vec![object("a", 11)],
                }),
            ])),
            watches: Mutex::new(VecDeque::from([Ok(vec![
                Ok(WatchNotice::Modified(object("a", 9))),
                Ok(WatchNotice::Modified(object("a", 11))),
            ])])),
            list_calls: AtomicUsize::new(0),
        });
        let mut source = ClusterWatchSource::start(
            api.clone(),
            WatchKind::Deployments,
            None,
            &config(),
            CancellationToken::new(),
        );

        for _ in 0..2 {
            source.next().await.unwrap();
        }
        let stale = source.next().await.unwrap();
        assert_eq!(op_of(&stale), Some((RawOp::Update, "a".to_string())));

        source.restart();

        // the rest of the old watch is discarded in favour of a fresh listing
        let relisted = source.next().await.unwrap();
        assert_eq!(op_of(&relisted), Some((RawOp::List, "a".to_string())));
        assert_eq!(source.next().await, Some(SourceEvent::ListingComplete(VersionMarker(12))));
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
    }
}
