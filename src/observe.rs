//! Observations and notification fan-out
//!
//! The [`ObservationRegistry`] records which peer observes which path. The
//! [`NotificationDispatcher`] listens to tree changes and pushes encoded
//! notifications to every observer of the exact changed path through a
//! [`NotificationSink`].
//!
//! Each observation carries a delivery cursor. Delivery for an entry happens
//! under its cursor lock, so one peer receives the notifications for one
//! path in change order; anything older than what was already sent, or aimed
//! at an entry cancelled meanwhile, is dropped. The registry lock is never
//! held while waiting on a cursor.
//!
//! When an instance is deleted its observers get a final 4.04 notification
//! and their observations end.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::coap_types::{ContentFormat, PeerId, ResponseCode};
use crate::codec::{DefaultCodec, NodeCodec};
use crate::encoding::{EncodingSelector, Format};
use crate::error::{LwM2mError, Result};
use crate::model::ObjectModel;
use crate::node::Node;
use crate::path::Path;
use crate::tree::{ChangeListener, ValueChanged};

#[derive(Debug, Default)]
struct Cursor {
    /// Highest sequence claimed for delivery; carried over on re-registration
    last_seq: Arc<AtomicU64>,
    cancelled: AtomicBool,
    /// Held while a notification for this entry is with the sink
    delivery: Mutex<()>,
}

impl Cursor {
    fn resumed(last_seq: Arc<AtomicU64>) -> Self {
        Self {
            last_seq,
            ..Self::default()
        }
    }

    /// Claim `seq` for delivery; false if it is not newer than a prior claim
    fn claim(&self, seq: u64) -> bool {
        self.last_seq.fetch_max(seq, Ordering::AcqRel) < seq
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// One peer observing one path
#[derive(Debug, Clone)]
pub struct ObservationEntry {
    pub peer: PeerId,
    pub path: Path,
    pub created_at: SystemTime,
    /// Format requested by the peer, if any
    pub format: Option<Format>,
    cursor: Arc<Cursor>,
}

impl ObservationEntry {
    /// Sequence number of the last notification handed to the sink
    pub fn last_seq(&self) -> u64 {
        self.cursor.last_seq.load(Ordering::Acquire)
    }

    /// Mark cancelled, then wait out a delivery already in progress
    fn cancel(&self) {
        self.cursor.cancelled.store(true, Ordering::Release);
        drop(self.cursor.delivery.lock());
    }
}

#[derive(Debug, Default)]
struct State {
    by_path: HashMap<Path, HashMap<PeerId, ObservationEntry>>,
    by_peer: HashMap<PeerId, BTreeSet<Path>>,
}

impl State {
    fn remove(&mut self, peer: &PeerId, path: &Path) -> Option<ObservationEntry> {
        let observers = self.by_path.get_mut(path)?;
        let entry = observers.remove(peer)?;
        if observers.is_empty() {
            self.by_path.remove(path);
        }
        if let Some(paths) = self.by_peer.get_mut(peer) {
            paths.remove(path);
            if paths.is_empty() {
                self.by_peer.remove(peer);
            }
        }
        Some(entry)
    }
}

/// Active observations, indexed by path and by peer
#[derive(Debug, Default)]
pub struct ObservationRegistry {
    state: RwLock<State>,
}

impl ObservationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` as an observer of `path`
    ///
    /// A second registration for the same peer and path replaces the first
    /// and keeps its delivery position.
    pub fn register(&self, peer: &PeerId, path: Path, format: Option<Format>) -> ObservationEntry {
        let mut state = self.state.write();
        let previous = state.remove(peer, &path);
        let cursor = match &previous {
            Some(old) => Cursor::resumed(old.cursor.last_seq.clone()),
            None => Cursor::default(),
        };

        let entry = ObservationEntry {
            peer: peer.clone(),
            path,
            created_at: SystemTime::now(),
            format,
            cursor: Arc::new(cursor),
        };
        state
            .by_path
            .entry(path)
            .or_default()
            .insert(peer.clone(), entry.clone());
        state.by_peer.entry(peer.clone()).or_default().insert(path);
        drop(state);

        // an in-flight delivery on the old entry finishes on its own; the
        // shared sequence keeps the new entry from repeating it
        if let Some(old) = &previous {
            old.cursor.cancelled.store(true, Ordering::Release);
        }

        info!(peer = %peer, path = %path, replaced = previous.is_some(), "Observation registered");
        entry
    }

    /// Cancel one observation; returns whether it existed
    pub fn cancel(&self, peer: &PeerId, path: &Path) -> bool {
        let removed = self.state.write().remove(peer, path);
        match removed {
            Some(entry) => {
                entry.cancel();
                info!(peer = %peer, path = %path, "Observation cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every observation held by `peer`
    pub fn cancel_all(&self, peer: &PeerId) -> usize {
        let removed: Vec<ObservationEntry> = {
            let mut state = self.state.write();
            let paths = state.by_peer.remove(peer).unwrap_or_default();
            paths
                .iter()
                .filter_map(|path| state.remove(peer, path))
                .collect()
        };
        for entry in &removed {
            entry.cancel();
        }
        if !removed.is_empty() {
            info!(peer = %peer, count = removed.len(), "All observations cancelled");
        }
        removed.len()
    }

    /// Cancel every observation on `path` or below it, for all peers
    pub fn cancel_within(&self, path: &Path) -> Vec<ObservationEntry> {
        let removed: Vec<ObservationEntry> = {
            let mut state = self.state.write();
            let targets: Vec<(PeerId, Path)> = state
                .by_path
                .iter()
                .filter(|(p, _)| path.contains(p))
                .flat_map(|(p, observers)| observers.keys().map(|peer| (peer.clone(), *p)))
                .collect();
            targets
                .iter()
                .filter_map(|(peer, p)| state.remove(peer, p))
                .collect()
        };
        for entry in &removed {
            entry.cancel();
        }
        if !removed.is_empty() {
            info!(path = %path, count = removed.len(), "Observations ended");
        }
        removed
    }

    /// Snapshot of the observers of exactly `path`
    pub fn observers(&self, path: &Path) -> Vec<ObservationEntry> {
        self.state
            .read()
            .by_path
            .get(path)
            .map(|observers| observers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_observing(&self, peer: &PeerId, path: &Path) -> bool {
        self.state
            .read()
            .by_path
            .get(path)
            .is_some_and(|observers| observers.contains_key(peer))
    }

    /// Paths observed by `peer`
    pub fn paths_of(&self, peer: &PeerId) -> Vec<Path> {
        self.state
            .read()
            .by_peer
            .get(peer)
            .map(|paths| paths.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of active observations
    pub fn len(&self) -> usize {
        self.state.read().by_path.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_path.is_empty()
    }
}

/// An encoded notification for one observer
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub peer: PeerId,
    pub path: Path,
    pub seq: u64,
    /// Content for a value; NotFound ends the observation
    pub code: ResponseCode,
    pub payload: Vec<u8>,
    pub content_format: Option<ContentFormat>,
}

/// Outbound side of notifications, implemented by the transport
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// What happened to one change during fan-out
#[derive(Debug, Default)]
pub struct NotifyReport {
    pub delivered: usize,
    /// Stale or cancelled
    pub dropped: usize,
    pub failures: Vec<LwM2mError>,
}

/// Pushes tree changes to their observers
pub struct NotificationDispatcher {
    registry: Arc<ObservationRegistry>,
    model: ObjectModel,
    sink: Arc<dyn NotificationSink>,
    codec: Arc<dyn NodeCodec>,
    default_format: Option<Format>,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<ObservationRegistry>,
        model: ObjectModel,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            model,
            sink,
            codec: Arc::new(DefaultCodec),
            default_format: None,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn NodeCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Format used for observers that did not ask for one
    pub fn with_default_format(mut self, format: Option<Format>) -> Self {
        self.default_format = format;
        self
    }

    /// Send `node` to every observer of exactly `path`
    pub fn notify(&self, path: &Path, node: &Node, seq: u64) -> NotifyReport {
        let mut report = NotifyReport::default();
        // registry lock is not held past this point
        let observers = self.registry.observers(path);
        if observers.is_empty() {
            return report;
        }

        let schema = path
            .resource_id()
            .and_then(|rid| self.model.resource(path.object_id(), rid));

        for entry in observers {
            let delivering = entry.cursor.delivery.lock();
            if entry.cursor.is_cancelled() || !entry.cursor.claim(seq) {
                debug!(peer = %entry.peer, path = %path, seq, last = entry.last_seq(), "Notification dropped");
                report.dropped += 1;
                continue;
            }

            let format =
                EncodingSelector::select(path, node, entry.format.or(self.default_format), schema);
            let result = self
                .codec
                .encode(node, format, path)
                .and_then(|payload| {
                    self.sink.deliver(&Notification {
                        peer: entry.peer.clone(),
                        path: *path,
                        seq,
                        code: ResponseCode::Content,
                        payload,
                        content_format: Some(format.content_format()),
                    })
                });
            drop(delivering);
            report.record(&entry, result);
        }
        report
    }

    /// End every observation at or below a removed `path`
    ///
    /// Each observer gets one final NotFound notification.
    pub fn terminate(&self, path: &Path, seq: u64) -> NotifyReport {
        let mut report = NotifyReport::default();
        for entry in self.registry.cancel_within(path) {
            let result = self.sink.deliver(&Notification {
                peer: entry.peer.clone(),
                path: entry.path,
                seq,
                code: ResponseCode::NotFound,
                payload: Vec::new(),
                content_format: None,
            });
            report.record(&entry, result);
        }
        report
    }
}

impl NotifyReport {
    fn record(&mut self, entry: &ObservationEntry, result: Result<()>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(e) => {
                warn!(peer = %entry.peer, path = %entry.path, error = %e, "Notification delivery failed");
                self.failures.push(LwM2mError::NotificationDeliveryFailed {
                    peer: entry.peer.to_string(),
                    path: entry.path.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

impl ChangeListener for NotificationDispatcher {
    fn value_changed(&self, event: &ValueChanged) {
        self.notify(&event.path, &event.node, event.seq);
    }

    fn removed(&self, path: &Path, seq: u64) {
        self.terminate(path, seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Resource, Value};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Collector {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    impl NotificationSink for Collector {
        fn deliver(&self, notification: &Notification) -> Result<()> {
            if self.fail {
                return Err(LwM2mError::Io(std::io::Error::other("peer gone")));
            }
            self.sent.lock().push(notification.clone());
            Ok(())
        }
    }

    fn model() -> ObjectModel {
        r#"[{"id": 3303, "name": "Temperature", "instances": "multiple", "resources": [
            {"id": 5700, "name": "Sensor Value", "operations": "R", "instances": "single", "type": "float"}
        ]}]"#
            .parse()
            .unwrap()
    }

    fn reading(v: f64) -> Node {
        Node::Resource(Resource::single(5700, Value::Float(v)))
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ObservationRegistry::new();
        let peer = PeerId::new("a");
        let path = Path::resource(3303, 0, 5700);

        registry.register(&peer, path, None);
        registry.register(&peer, path, Some(Format::ApplicationStructured));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.observers(&path)[0].format,
            Some(Format::ApplicationStructured)
        );
        assert_eq!(registry.paths_of(&peer), vec![path]);
    }

    #[test]
    fn test_cancel_and_cancel_all() {
        let registry = ObservationRegistry::new();
        let a = PeerId::new("a");
        let b = PeerId::new("b");
        registry.register(&a, Path::instance(3303, 0), None);
        registry.register(&a, Path::resource(3303, 0, 5700), None);
        registry.register(&b, Path::instance(3303, 0), None);

        assert!(registry.cancel(&b, &Path::instance(3303, 0)));
        assert!(!registry.cancel(&b, &Path::instance(3303, 0)));
        assert_eq!(registry.cancel_all(&a), 2);
        assert!(registry.is_empty());
        assert!(registry.paths_of(&a).is_empty());
    }

    #[test]
    fn test_cancel_within() {
        let registry = ObservationRegistry::new();
        let a = PeerId::new("a");
        registry.register(&a, Path::object(3303), None);
        registry.register(&a, Path::instance(3303, 1), None);
        registry.register(&a, Path::resource(3303, 1, 5700), None);

        assert_eq!(registry.cancel_within(&Path::instance(3303, 1)).len(), 2);
        assert!(registry.is_observing(&a, &Path::object(3303)));
    }

    #[test]
    fn test_notify_exact_path_only() {
        let registry = Arc::new(ObservationRegistry::new());
        let sink = Arc::new(Collector::default());
        let dispatcher = NotificationDispatcher::new(registry.clone(), model(), sink.clone());

        let path = Path::resource(3303, 0, 5700);
        registry.register(&PeerId::new("a"), path, None);
        registry.register(&PeerId::new("b"), Path::resource(3303, 1, 5700), None);

        let report = dispatcher.notify(&path, &reading(21.5), 1);
        assert_eq!(report.delivered, 1);

        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].peer, PeerId::new("a"));
        assert_eq!(sent[0].code, ResponseCode::Content);
        assert_eq!(sent[0].content_format, Some(ContentFormat::Text));
        assert_eq!(sent[0].payload, b"21.5");
    }

    #[test]
    fn test_stale_sequence_dropped() {
        let registry = Arc::new(ObservationRegistry::new());
        let sink = Arc::new(Collector::default());
        let dispatcher = NotificationDispatcher::new(registry.clone(), model(), sink.clone());
        let path = Path::resource(3303, 0, 5700);
        registry.register(&PeerId::new("a"), path, None);

        assert_eq!(dispatcher.notify(&path, &reading(2.0), 5).delivered, 1);
        let report = dispatcher.notify(&path, &reading(1.0), 4);
        assert_eq!(report.dropped, 1);
        assert_eq!(sink.sent.lock().len(), 1);
        assert_eq!(registry.observers(&path)[0].last_seq(), 5);
    }

    #[test]
    fn test_cancelled_entry_dropped() {
        let registry = Arc::new(ObservationRegistry::new());
        let sink = Arc::new(Collector::default());
        let dispatcher = NotificationDispatcher::new(registry.clone(), model(), sink.clone());
        let peer = PeerId::new("a");
        let path = Path::resource(3303, 0, 5700);

        let entry = registry.register(&peer, path, None);
        registry.cancel(&peer, &path);
        // a fan-out that snapshotted the entry before cancellation
        assert!(entry.cursor.is_cancelled());
        assert_eq!(dispatcher.notify(&path, &reading(1.0), 1).delivered, 0);
        assert!(sink.sent.lock().is_empty());
    }

    #[test]
    fn test_delivery_failure_keeps_subscription() {
        let registry = Arc::new(ObservationRegistry::new());
        let sink = Arc::new(Collector {
            fail: true,
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(registry.clone(), model(), sink);
        let peer = PeerId::new("a");
        let path = Path::resource(3303, 0, 5700);
        registry.register(&peer, path, None);

        let report = dispatcher.notify(&path, &reading(1.0), 1);
        assert!(matches!(
            report.failures.as_slice(),
            [LwM2mError::NotificationDeliveryFailed { .. }]
        ));
        assert!(registry.is_observing(&peer, &path));
    }

    #[test]
    fn test_requested_format_used() {
        let registry = Arc::new(ObservationRegistry::new());
        let sink = Arc::new(Collector::default());
        let dispatcher = NotificationDispatcher::new(registry.clone(), model(), sink.clone());
        let path = Path::resource(3303, 0, 5700);
        registry.register(&PeerId::new("a"), path, Some(Format::ApplicationStructured));

        dispatcher.notify(&path, &reading(3.0), 1);
        assert_eq!(sink.sent.lock()[0].content_format, Some(ContentFormat::Json));
    }

    #[test]
    fn test_terminate_sends_not_found() {
        let registry = Arc::new(ObservationRegistry::new());
        let sink = Arc::new(Collector::default());
        let dispatcher = NotificationDispatcher::new(registry.clone(), model(), sink.clone());
        let a = PeerId::new("a");
        registry.register(&a, Path::object(3303), None);
        registry.register(&a, Path::resource(3303, 1, 5700), None);
        registry.register(&PeerId::new("b"), Path::instance(3303, 1), None);

        let report = dispatcher.terminate(&Path::instance(3303, 1), 9);
        assert_eq!(report.delivered, 2);
        assert_eq!(registry.len(), 1);

        let sent = sink.sent.lock();
        assert!(sent.iter().all(|n| n.code == ResponseCode::NotFound && n.payload.is_empty()));
        assert!(sent.iter().all(|n| n.content_format.is_none() && n.seq == 9));
    }

    struct Gate {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl NotificationSink for Gate {
        fn deliver(&self, _notification: &Notification) -> Result<()> {
            self.entered.lock().send(()).ok();
            self.release.lock().recv().ok();
            Ok(())
        }
    }

    #[test]
    fn test_slow_delivery_does_not_stall_registry() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let registry = Arc::new(ObservationRegistry::new());
        let sink = Arc::new(Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let dispatcher = Arc::new(NotificationDispatcher::new(registry.clone(), model(), sink));
        let peer = PeerId::new("a");
        let path = Path::resource(3303, 0, 5700);
        registry.register(&peer, path, None);

        let worker = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || dispatcher.notify(&path, &reading(1.0), 1).delivered)
        };
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("delivery did not start");

        // the sink is blocked with the entry's cursor held
        let replaced = registry.register(&peer, path, Some(Format::ApplicationStructured));
        registry.register(&PeerId::new("b"), Path::instance(3303, 0), None);
        assert_eq!(registry.len(), 2);
        assert_eq!(replaced.last_seq(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), 1);
        // already delivered through the replaced entry
        assert_eq!(dispatcher.notify(&path, &reading(1.0), 1).dropped, 1);
    }
}
