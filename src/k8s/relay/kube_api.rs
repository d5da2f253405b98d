/**
 * Cluster API adapter
 *
 * The list and watch primitives the watch source needs from the orchestration
 * API, and their kube-rs implementation for the apps/v1 workload kinds.
 */
use super::object::{ObjectKey, VersionMarker, WatchKind, WatchedObject, WorkloadStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

/// Point-in-time listing of a kind
#[derive(Debug, Clone)]
pub struct Listing {
    pub version: VersionMarker,
    pub objects: Vec<WatchedObject>,
}

/// One item of an incremental watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchNotice {
    Added(WatchedObject),
    Modified(WatchedObject),
    Deleted(WatchedObject),
    /// Progress marker with no object change
    Bookmark(VersionMarker),
    /// The requested marker is too old; the caller must relist
    Expired,
}

pub type NoticeStream = BoxStream<'static, Result<WatchNotice>>;

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every object of the kind with the listing's version marker
    async fn list(&self) -> Result<Listing>;

    /// Stream changes that happened after `from`
    ///
    /// Returns `Error::VersionExpired` if `from` is no longer available.
    async fn watch(&self, from: VersionMarker) -> Result<NoticeStream>;
}

/// A workload resource the relay can mirror
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
    const KIND: WatchKind;

    fn workload_status(&self) -> WorkloadStatus;
}

impl Workload for Deployment {
    const KIND: WatchKind = WatchKind::Deployments;

    fn workload_status(&self) -> WorkloadStatus {
        let status = self.status.as_ref();
        WorkloadStatus {
            replicas: self
                .spec
                .as_ref()
                .map_or(0, |spec| spec.replicas.unwrap_or(0)),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        }
    }
}

impl Workload for StatefulSet {
    const KIND: WatchKind = WatchKind::StatefulSets;

    fn workload_status(&self) -> WorkloadStatus {
        let status = self.status.as_ref();
        WorkloadStatus {
            replicas: self
                .spec
                .as_ref()
                .map_or(0, |spec| spec.replicas.unwrap_or(0)),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        }
    }
}

impl Workload for ReplicaSet {
    const KIND: WatchKind = WatchKind::ReplicaSets;

    // A ReplicaSet owns a single template, so every current replica is up to date
    fn workload_status(&self) -> WorkloadStatus {
        let status = self.status.as_ref();
        WorkloadStatus {
            replicas: self
                .spec
                .as_ref()
                .map_or(0, |spec| spec.replicas.unwrap_or(0)),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            updated_replicas: status.map_or(0, |s| s.replicas),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        }
    }
}

impl Workload for DaemonSet {
    const KIND: WatchKind = WatchKind::DaemonSets;

    fn workload_status(&self) -> WorkloadStatus {
        self.status
            .as_ref()
            .map_or_else(WorkloadStatus::default, |s| WorkloadStatus {
                replicas: s.desired_number_scheduled,
                ready_replicas: s.number_ready,
                updated_replicas: s.updated_number_scheduled.unwrap_or(0),
                available_replicas: s.number_available.unwrap_or(0),
            })
    }
}

/// Convert a workload into its mirrored form
///
/// # Errors
///
/// Returns `Error::Malformed` if the object has no name or an unparsable `resourceVersion`
pub fn to_watched<K: Workload>(obj: &K) -> Result<WatchedObject> {
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::Malformed(format!("{} object without a name", K::KIND)))?;
    let namespace = obj.namespace().unwrap_or_default();
    let resource_version = obj.resource_version().unwrap_or_default();
    let version = VersionMarker::parse(&resource_version).ok_or_else(|| {
        Error::Malformed(format!(
            "{} {namespace}/{name} has unparsable resourceVersion {resource_version:?}",
            K::KIND
        ))
    })?;

    Ok(WatchedObject::new(
        ObjectKey::new(namespace, name),
        version,
        obj.workload_status(),
    ))
}

/// Malformed objects are logged and skipped so the rest of the kind keeps flowing
fn to_watched_or_skip<K: Workload>(obj: &K) -> Option<WatchedObject> {
    match to_watched(obj) {
        Ok(watched) => Some(watched),
        Err(e) => {
            warn!("⚠️  Skipping malformed {}: {}", K::KIND, e);
            None
        }
    }
}

fn convert_event<K: Workload>(event: WatchEvent<K>) -> Result<Option<WatchNotice>> {
    let notice = match event {
        WatchEvent::Added(obj) => to_watched_or_skip(&obj).map(WatchNotice::Added),
        WatchEvent::Modified(obj) => to_watched_or_skip(&obj).map(WatchNotice::Modified),
        WatchEvent::Deleted(obj) => to_watched_or_skip(&obj).map(WatchNotice::Deleted),
        WatchEvent::Bookmark(bookmark) => {
            VersionMarker::parse(&bookmark.metadata.resource_version).map(WatchNotice::Bookmark)
        }
        WatchEvent::Error(response) if response.code == 410 => {
            debug!("⌛ {} watch reported expired resourceVersion", K::KIND);
            Some(WatchNotice::Expired)
        }
        WatchEvent::Error(response) => return Err(Error::Kube(kube::Error::Api(response))),
    };
    Ok(notice)
}

/// Undecodable events are logged and dropped; the watch itself stays open
fn convert_item<K: Workload>(item: kube::Result<WatchEvent<K>>) -> Option<Result<WatchNotice>> {
    match item {
        Ok(event) => convert_event(event).transpose(),
        Err(kube::Error::SerdeError(e)) => {
            warn!("⚠️  Skipping undecodable {} watch event: {}", K::KIND, e);
            None
        }
        Err(e) => Some(Err(e.into())),
    }
}

/// `ClusterApi` backed by a kube-rs `Api<K>`
pub struct KubeClusterApi<K: Workload> {
    api: Api<K>,
    watch_timeout_secs: u32,
}

impl<K: Workload> KubeClusterApi<K> {
    /// Watch one namespace, or every namespace when `namespace` is `None`
    #[must_use]
    pub fn new(client: Client, namespace: Option<&str>, watch_timeout_secs: u32) -> Self {
        let api = namespace.map_or_else(
            || Api::all(client.clone()),
            |ns| Api::namespaced(client.clone(), ns),
        );
        Self {
            api,
            watch_timeout_secs,
        }
    }
}

#[async_trait]
impl<K: Workload> ClusterApi for KubeClusterApi<K> {
    async fn list(&self) -> Result<Listing> {
        let list = self.api.list(&ListParams::default()).await?;
        let version = list
            .metadata
            .resource_version
            .as_deref()
            .and_then(VersionMarker::parse)
            .ok_or_else(|| Error::Malformed(format!("{} listing without a resourceVersion", K::KIND)))?;

        let objects = list.items.iter().filter_map(to_watched_or_skip).collect();

        Ok(Listing { version, objects })
    }

    async fn watch(&self, from: VersionMarker) -> Result<NoticeStream> {
        let wp = WatchParams::default().timeout(self.watch_timeout_secs);
        let stream = match self.api.watch(&wp, &from.to_string()).await {
            Ok(stream) => stream,
            Err(e) => {
                let e = Error::from(e);
                return Err(if e.is_expired() { Error::VersionExpired } else { e });
            }
        };

        Ok(stream
            .filter_map(|item| futures::future::ready(convert_item::<K>(item)))
            .boxed())
    }
}

/// Build the kube-backed `ClusterApi` for `kind`
#[must_use]
pub fn for_kind(
    kind: WatchKind,
    client: Client,
    namespace: Option<&str>,
    watch_timeout_secs: u32,
) -> Arc<dyn ClusterApi> {
    match kind {
        WatchKind::Deployments => Arc::new(KubeClusterApi::<Deployment>::new(
            client,
            namespace,
            watch_timeout_secs,
        )),
        WatchKind::StatefulSets => Arc::new(KubeClusterApi::<StatefulSet>::new(
            client,
            namespace,
            watch_timeout_secs,
        )),
        WatchKind::DaemonSets => Arc::new(KubeClusterApi::<DaemonSet>::new(
            client,
            namespace,
            watch_timeout_secs,
        )),
        WatchKind::ReplicaSets => Arc::new(KubeClusterApi::<ReplicaSet>::new(
            client,
            namespace,
            watch_timeout_secs,
        )),
    }
}
