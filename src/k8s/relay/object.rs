/**
 * Relay data model: the identity, version and payload of a watched workload,
 * and the immutable events the mirror emits for it.
 */
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Identity of a watched object. Cluster-scoped objects use an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Position in a kind's change history, parsed from `resourceVersion`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VersionMarker(pub u64);

impl VersionMarker {
    /// Parse a Kubernetes `resourceVersion`
    #[must_use]
    pub fn parse(resource_version: &str) -> Option<Self> {
        resource_version.trim().parse().ok().map(Self)
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replica counts reported by a workload controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
}

/// A mirrored workload object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedObject {
    pub key: ObjectKey,
    pub version: VersionMarker,
    pub status: WorkloadStatus,
}

impl WatchedObject {
    #[must_use]
    pub const fn new(key: ObjectKey, version: VersionMarker, status: WorkloadStatus) -> Self {
        Self {
            key,
            version,
            status,
        }
    }

    /// Compare the fields subscribers see, ignoring the version marker
    #[must_use]
    pub fn same_payload(&self, other: &Self) -> bool {
        self.key == other.key && self.status == other.status
    }
}

/// Workload kinds the relay knows how to watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum WatchKind {
    Deployments,
    #[value(name = "statefulsets")]
    StatefulSets,
    #[value(name = "daemonsets")]
    DaemonSets,
    #[value(name = "replicasets")]
    ReplicaSets,
}

impl WatchKind {
    pub const ALL: [Self; 4] = [
        Self::Deployments,
        Self::StatefulSets,
        Self::DaemonSets,
        Self::ReplicaSets,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployments => "deployments",
            Self::StatefulSets => "statefulsets",
            Self::DaemonSets => "daemonsets",
            Self::ReplicaSets => "replicasets",
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchKind {
    type Err = crate::error::Error;

    /// Accepts plural or singular kind names in any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered || kind.as_str().trim_end_matches('s') == lowered)
            .ok_or_else(|| crate::error::Error::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
        }
    }
}

/// An immutable state transition observed by a mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    pub kind: EventKind,
    pub workload: WatchKind,
    pub object: WatchedObject,
    pub observed_at: DateTime<Utc>,
}

impl RelayEvent {
    #[must_use]
    pub fn new(kind: EventKind, workload: WatchKind, object: WatchedObject) -> Self {
        Self {
            kind,
            workload,
            object,
            observed_at: Utc::now(),
        }
    }
}
