/**
 * Wire encoding of a relay event inside one SSE `data:` record
 */
use crate::error::Result;
use crate::k8s::relay::{EventKind, RelayEvent, WorkloadStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::serde_json;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EventFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// `STATUS kind namespace/name at observedAt`
    Text,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    name: &'a str,
    namespace: &'a str,
    status: EventKind,
    kind: &'static str,
    resource_version: String,
    #[serde(flatten)]
    replicas: WorkloadStatus,
    observed_at: DateTime<Utc>,
}

impl EventFormat {
    /// Encode `event` as an SSE payload
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if JSON serialization fails
    pub fn encode(self, event: &RelayEvent) -> Result<String> {
        match self {
            Self::Json => {
                let wire = WireEvent {
                    name: &event.object.key.name,
                    namespace: &event.object.key.namespace,
                    status: event.kind,
                    kind: event.workload.as_str(),
                    resource_version: event.object.version.to_string(),
                    replicas: event.object.status,
                    observed_at: event.observed_at,
                };
                Ok(serde_json::to_string(&wire)?)
            }
            Self::Text => Ok(format!(
                "{} {} {} at {}",
                event.kind.as_str(),
                event.workload,
                event.object.key,
                event.observed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::relay::{ObjectKey, VersionMarker, WatchKind, WatchedObject};
    use chrono::TimeZone;

    fn event() -> RelayEvent {
        RelayEvent {
            kind: EventKind::Added,
            workload: WatchKind::Deployments,
            object: WatchedObject::new(
                ObjectKey::new("default", "web"),
                VersionMarker(42),
                WorkloadStatus {
                    replicas: 3,
                    ready_replicas: 2,
                    updated_replicas: 3,
                    available_replicas: 2,
                },
            ),
            observed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_json_payload() {
        let payload = EventFormat::Json.encode(&event()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["name"], "web");
        assert_eq!(value["namespace"], "default");
        assert_eq!(value["status"], "ADDED");
        assert_eq!(value["kind"], "deployments");
        assert_eq!(value["resourceVersion"], "42");
        assert_eq!(value["replicas"], 3);
        assert_eq!(value["readyReplicas"], 2);
        assert_eq!(value["observedAt"], "2024-05-01T12:00:00Z");
        assert!(!payload.contains('\n'));
    }

    #[test]
    fn test_text_payload() {
        let payload = EventFormat::Text.encode(&event()).unwrap();
        assert_eq!(payload, "ADDED deployments default/web at 2024-05-01T12:00:00Z");
    }
}
