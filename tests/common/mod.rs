#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use kuberelay::error::{Error, Result};
use kuberelay::k8s::relay::{
    ClusterApi, Listing, NoticeStream, ObjectKey, RelayConfig, RelayEvent, VersionMarker,
    WatchNotice, WatchedObject, WorkloadStatus,
};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

type NoticeSender = mpsc::UnboundedSender<Result<WatchNotice>>;

#[derive(Default)]
struct ClusterState {
    objects: BTreeMap<ObjectKey, WatchedObject>,
    version: u64,
    /// Every change, for watches that start behind the head
    history: Vec<(u64, WatchNotice)>,
    /// Watches from a marker below this report expiry
    compacted_before: u64,
    watchers: Vec<NoticeSender>,
    offline: bool,
}

/// In-memory orchestration API with a change history, compaction and outages
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    pub list_calls: AtomicUsize,
}

fn status(replicas: i32) -> WorkloadStatus {
    WorkloadStatus {
        replicas,
        ready_replicas: replicas,
        updated_replicas: replicas,
        available_replicas: replicas,
    }
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, change: impl FnOnce(&mut ClusterState, VersionMarker) -> WatchNotice) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = VersionMarker(state.version);
        let notice = change(&mut state, version);
        state.history.push((version.0, notice.clone()));
        state
            .watchers
            .retain(|watcher| watcher.send(Ok(notice.clone())).is_ok());
    }

    pub fn create(&self, name: &str, replicas: i32) {
        self.record(|state, version| {
            let object = WatchedObject::new(ObjectKey::new("default", name), version, status(replicas));
            state.objects.insert(object.key.clone(), object.clone());
            WatchNotice::Added(object)
        });
    }

    pub fn scale(&self, name: &str, replicas: i32) {
        self.record(|state, version| {
            let object = WatchedObject::new(ObjectKey::new("default", name), version, status(replicas));
            state.objects.insert(object.key.clone(), object.clone());
            WatchNotice::Modified(object)
        });
    }

    pub fn delete(&self, name: &str) {
        self.record(|state, version| {
            let key = ObjectKey::new("default", name);
            let mut object = state.objects.remove(&key).unwrap();
            object.version = version;
            WatchNotice::Deleted(object)
        });
    }

    /// Send open watches a modification stamped with an already superseded marker
    pub fn send_out_of_order(&self, name: &str, replicas: i32, version: u64) {
        let object = WatchedObject::new(
            ObjectKey::new("default", name),
            VersionMarker(version),
            status(replicas),
        );
        let mut state = self.state.lock().unwrap();
        state
            .watchers
            .retain(|watcher| watcher.send(Ok(WatchNotice::Modified(object.clone()))).is_ok());
    }

    /// Drop every open watch with a transport error and refuse new connections
    pub fn go_offline(&self) {
        let mut state = self.state.lock().unwrap();
        state.offline = true;
        for watcher in state.watchers.drain(..) {
            let _ = watcher.send(Err(Error::Custom("connection reset by peer".to_string())));
        }
    }

    pub fn go_online(&self) {
        self.state.lock().unwrap().offline = false;
    }

    /// Forget history so older markers can no longer be watched from
    pub fn compact(&self) {
        let mut state = self.state.lock().unwrap();
        state.compacted_before = state.version + 1;
        state.history.clear();
    }

    /// End every open watch cleanly, as a server-side timeout does
    pub fn close_watches(&self) {
        self.state.lock().unwrap().watchers.clear();
    }

    pub fn watcher_count(&self) -> usize {
        self.state.lock().unwrap().watchers.len()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list(&self) -> Result<Listing> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(Error::Custom("connection refused".to_string()));
        }
        Ok(Listing {
            version: VersionMarker(state.version),
            objects: state.objects.values().cloned().collect(),
        })
    }

    async fn watch(&self, from: VersionMarker) -> Result<NoticeStream> {
        let mut state = self.state.lock().unwrap();
        if state.offline {
            return Err(Error::Custom("connection refused".to_string()));
        }
        if from.0 + 1 < state.compacted_before {
            return Err(Error::VersionExpired);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for (version, notice) in &state.history {
            if *version > from.0 {
                let _ = tx.send(Ok(notice.clone()));
            }
        }
        state.watchers.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

pub fn test_config(subscriber_buffer: usize) -> RelayConfig {
    RelayConfig {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        subscriber_buffer,
        ..RelayConfig::default()
    }
}

/// Next event from a session, failing the test after five seconds
pub async fn next_event<S>(session: &mut Pin<Box<S>>) -> Arc<RelayEvent>
where
    S: futures::Stream<Item = Arc<RelayEvent>> + ?Sized,
{
    timeout(Duration::from_secs(5), session.next())
        .await
        .expect("timed out waiting for a relay event")
        .expect("session ended unexpectedly")
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
