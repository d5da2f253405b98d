pub mod bus;
pub mod config;
pub mod kube_api;
pub mod mirror;
pub mod object;
pub mod pipeline;
pub mod session;
pub mod source;

pub use bus::{EventBus, Subscription};
pub use config::RelayConfig;
pub use kube_api::{ClusterApi, KubeClusterApi, Listing, NoticeStream, WatchNotice, Workload};
pub use mirror::LocalMirror;
pub use object::{EventKind, ObjectKey, RelayEvent, VersionMarker, WatchKind, WatchedObject, WorkloadStatus};
pub use pipeline::KindRelay;
pub use session::SubscriptionSession;
pub use source::{Backoff, ClusterWatchSource, RawNotification, RawOp, SourceEvent};
