/**
 * Local Mirror
 *
 * Version-tagged copy of one kind's object set. Reconciles raw notifications
 * and classifies each one as Added, Updated or Deleted relative to its own
 * prior state.
 */
use super::object::{EventKind, ObjectKey, RelayEvent, VersionMarker, WatchKind, WatchedObject};
use super::source::{RawNotification, RawOp};
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug)]
pub struct LocalMirror {
    kind: WatchKind,
    objects: HashMap<ObjectKey, WatchedObject>,
    last_version: Option<VersionMarker>,
    /// Keys reported by the listing currently being replayed
    listed: HashSet<ObjectKey>,
}

impl LocalMirror {
    #[must_use]
    pub fn new(kind: WatchKind) -> Self {
        Self {
            kind,
            objects: HashMap::new(),
            last_version: None,
            listed: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> WatchKind {
        self.kind
    }

    #[must_use]
    pub const fn last_version(&self) -> Option<VersionMarker> {
        self.last_version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<&WatchedObject> {
        self.objects.get(key)
    }

    /// Current objects, ordered by identity
    #[must_use]
    pub fn snapshot(&self) -> Vec<WatchedObject> {
        let mut objects: Vec<_> = self.objects.values().cloned().collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        objects
    }

    /// Reconcile one notification
    ///
    /// # Errors
    ///
    /// Returns `Error::StaleVersion` if a watch notification does not advance
    /// the kind's marker; the mirror is left unchanged.
    pub fn apply(&mut self, notification: RawNotification) -> Result<Option<RelayEvent>> {
        let RawNotification {
            op,
            object,
            version,
        } = notification;

        if op != RawOp::List {
            if let Some(current) = self.last_version {
                if version <= current {
                    return Err(Error::StaleVersion {
                        current,
                        received: version,
                    });
                }
            }
            self.last_version = Some(version);
        }

        let event_kind = match op {
            RawOp::List => {
                self.listed.insert(object.key.clone());
                match self.objects.get_mut(&object.key) {
                    Some(existing) if existing.same_payload(&object) => {
                        existing.version = object.version;
                        None
                    }
                    Some(existing) => {
                        *existing = object.clone();
                        Some(EventKind::Updated)
                    }
                    None => {
                        self.objects.insert(object.key.clone(), object.clone());
                        Some(EventKind::Added)
                    }
                }
            }
            RawOp::Add | RawOp::Update => {
                match self.objects.insert(object.key.clone(), object.clone()) {
                    Some(_) => Some(EventKind::Updated),
                    None => Some(EventKind::Added),
                }
            }
            RawOp::Delete => self
                .objects
                .remove(&object.key)
                .map(|_| EventKind::Deleted),
        };

        Ok(event_kind.map(|kind| {
            debug!("🪞 {} {} {}", kind.as_str(), self.kind, object.key);
            RelayEvent::new(kind, self.kind, object)
        }))
    }

    /// Finish a listing batch
    ///
    /// Objects absent from the listing were deleted while the watch was down
    /// and are reported as Deleted. The kind's marker moves to the listing's.
    pub fn complete_listing(&mut self, version: VersionMarker) -> Vec<RelayEvent> {
        let listed = std::mem::take(&mut self.listed);
        let mut vanished: Vec<ObjectKey> = self
            .objects
            .keys()
            .filter(|key| !listed.contains(*key))
            .cloned()
            .collect();
        vanished.sort();

        self.last_version = Some(version);

        vanished
            .into_iter()
            .filter_map(|key| self.objects.remove(&key))
            .map(|object| {
                debug!("🪞 DELETED {} {} (missing from listing)", self.kind, object.key);
                RelayEvent::new(EventKind::Deleted, self.kind, object)
            })
            .collect()
    }
}
