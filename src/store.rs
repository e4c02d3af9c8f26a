//! Timed-object model and the observable source collection.

use crate::event::ChannelEvent;
use crate::time::Ticks;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque consumer-defined metadata, propagated unchanged to dispatch.
pub type Metadata = Arc<dyn Any + Send + Sync>;

/// A sounding note: channel, key, velocities and musical length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteData {
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub off_velocity: u8,
    /// Musical length in ticks.
    pub length: u64,
}

impl NoteData {
    pub fn new(channel: u8, key: u8, velocity: u8, length: u64) -> Self {
        Self {
            channel,
            key,
            velocity,
            off_velocity: 0,
            length,
        }
    }

    #[inline]
    pub fn with_key(mut self, key: u8) -> Self {
        self.key = key;
        self
    }

    #[inline]
    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity;
        self
    }

    #[inline]
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    /// The event dispatched when the note begins sounding.
    #[inline]
    pub fn on_event(&self) -> ChannelEvent {
        ChannelEvent::note_on(self.channel, self.key, self.velocity)
    }

    /// The event dispatched when the note stops sounding.
    #[inline]
    pub fn off_event(&self) -> ChannelEvent {
        ChannelEvent::note_off(self.channel, self.key, self.off_velocity)
    }
}

/// A discrete event or a note interval, pinned at a musical-time onset.
///
/// Objects are immutable snapshots held behind `Arc`: mutation replaces,
/// never edits in place, so concurrently-iterating consumers never observe
/// partial state.
#[derive(Debug)]
pub struct TimedObject {
    position: Ticks,
    kind: ObjectKind,
    metadata: Option<Metadata>,
}

#[derive(Debug)]
pub enum ObjectKind {
    Event(ChannelEvent),
    Note(NoteData),
}

impl TimedObject {
    pub fn event(position: Ticks, event: ChannelEvent) -> Arc<Self> {
        Arc::new(Self {
            position,
            kind: ObjectKind::Event(event),
            metadata: None,
        })
    }

    pub fn note(position: Ticks, data: NoteData) -> Arc<Self> {
        Arc::new(Self {
            position,
            kind: ObjectKind::Note(data),
            metadata: None,
        })
    }

    pub fn event_with_metadata(
        position: Ticks,
        event: ChannelEvent,
        metadata: Metadata,
    ) -> Arc<Self> {
        Arc::new(Self {
            position,
            kind: ObjectKind::Event(event),
            metadata: Some(metadata),
        })
    }

    pub fn note_with_metadata(position: Ticks, data: NoteData, metadata: Metadata) -> Arc<Self> {
        Arc::new(Self {
            position,
            kind: ObjectKind::Note(data),
            metadata: Some(metadata),
        })
    }

    #[inline]
    pub fn position(&self) -> Ticks {
        self.position
    }

    #[inline]
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    #[inline]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    #[inline]
    pub fn note_data(&self) -> Option<&NoteData> {
        match &self.kind {
            ObjectKind::Note(data) => Some(data),
            ObjectKind::Event(_) => None,
        }
    }

    /// Musical length in ticks; zero for discrete events.
    #[inline]
    pub fn length(&self) -> u64 {
        match &self.kind {
            ObjectKind::Note(data) => data.length,
            ObjectKind::Event(_) => 0,
        }
    }

    #[inline]
    pub fn end_position(&self) -> Ticks {
        self.position.saturating_add(self.length())
    }
}

/// Identity of one object instance, derived from its allocation.
///
/// Two content-equal objects are still distinct; re-using the same `Arc`
/// across a re-derivation keeps the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(usize);

impl ObjectId {
    #[inline]
    pub fn of(object: &Arc<TimedObject>) -> Self {
        Self(Arc::as_ptr(object) as usize)
    }
}

type Subscriber = Box<dyn Fn() + Send + Sync>;

struct StoreInner {
    objects: Mutex<Vec<Arc<TimedObject>>>,
    revision: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// Observable collection of timed objects.
///
/// Mutation is transactional: a batch of operations inside one [`edit`]
/// scope commits atomically and notifies subscribers exactly once, so an
/// object added and removed within the same batch is never observed.
///
/// [`edit`]: EventStore::edit
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<StoreInner>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                objects: Mutex::new(Vec::new()),
                revision: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn from_objects(objects: impl IntoIterator<Item = Arc<TimedObject>>) -> Self {
        let store = Self::new();
        *store.inner.objects.lock() = objects.into_iter().collect();
        store
    }

    /// Enumerable snapshot of the current objects, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<TimedObject>> {
        self.inner.objects.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.objects.lock().is_empty()
    }

    /// Monotonic counter bumped once per committed batch.
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::Acquire)
    }

    /// Register a change callback, invoked once per committed batch.
    pub fn subscribe(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.subscribers.lock().push(Box::new(f));
    }

    /// Apply a batch of mutations as a single atomic commit.
    pub fn edit<R>(&self, f: impl FnOnce(&mut StoreBatch<'_>) -> R) -> R {
        let result;
        let changed;
        {
            let mut objects = self.inner.objects.lock();
            let mut batch = StoreBatch {
                objects: &mut objects,
                changed: false,
            };
            result = f(&mut batch);
            changed = batch.changed;
        }
        if changed {
            self.inner.revision.fetch_add(1, Ordering::AcqRel);
            tracing::trace!(revision = self.revision(), "event store batch committed");
            for subscriber in self.inner.subscribers.lock().iter() {
                subscriber();
            }
        }
        result
    }

    /// Single-object convenience for [`edit`](EventStore::edit).
    pub fn add(&self, object: Arc<TimedObject>) {
        self.edit(|batch| batch.add(object));
    }

    /// Single-object convenience for [`edit`](EventStore::edit).
    pub fn remove(&self, object: &Arc<TimedObject>) -> bool {
        self.edit(|batch| batch.remove(object))
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutation scope handed to [`EventStore::edit`].
pub struct StoreBatch<'a> {
    objects: &'a mut Vec<Arc<TimedObject>>,
    changed: bool,
}

impl StoreBatch<'_> {
    pub fn add(&mut self, object: Arc<TimedObject>) {
        self.objects.push(object);
        self.changed = true;
    }

    /// Remove by identity. Returns whether the object was present.
    pub fn remove(&mut self, object: &Arc<TimedObject>) -> bool {
        self.remove_by_id(ObjectId::of(object))
    }

    pub fn remove_by_id(&mut self, id: ObjectId) -> bool {
        let before = self.objects.len();
        self.objects.retain(|o| ObjectId::of(o) != id);
        let removed = self.objects.len() != before;
        self.changed |= removed;
        removed
    }

    pub fn retain(&mut self, f: impl Fn(&Arc<TimedObject>) -> bool) {
        let before = self.objects.len();
        self.objects.retain(|o| f(o));
        self.changed |= self.objects.len() != before;
    }

    pub fn clear(&mut self) {
        self.changed |= !self.objects.is_empty();
        self.objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_note_events() {
        let note = NoteData::new(2, 60, 100, 960);
        assert_eq!(note.on_event(), ChannelEvent::note_on(2, 60, 100));
        assert_eq!(note.off_event(), ChannelEvent::note_off(2, 60, 0));
    }

    #[test]
    fn test_object_extent() {
        let note = TimedObject::note(Ticks(100), NoteData::new(0, 60, 100, 960));
        assert_eq!(note.position(), Ticks(100));
        assert_eq!(note.end_position(), Ticks(1060));

        let event = TimedObject::event(Ticks(50), ChannelEvent::control_change(0, 7, 100));
        assert_eq!(event.end_position(), Ticks(50));
    }

    #[test]
    fn test_identity_is_per_instance() {
        let a = TimedObject::note(Ticks(0), NoteData::new(0, 60, 100, 960));
        let b = TimedObject::note(Ticks(0), NoteData::new(0, 60, 100, 960));
        assert_ne!(ObjectId::of(&a), ObjectId::of(&b));
        assert_eq!(ObjectId::of(&a), ObjectId::of(&a.clone()));
    }

    #[test]
    fn test_batch_commits_once() {
        let store = EventStore::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        store.subscribe(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });

        store.edit(|batch| {
            batch.add(TimedObject::note(Ticks(0), NoteData::new(0, 60, 100, 960)));
            batch.add(TimedObject::note(Ticks(960), NoteData::new(0, 62, 100, 960)));
        });

        assert_eq!(store.len(), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_add_remove_in_one_batch() {
        let store = EventStore::new();
        let obj = TimedObject::note(Ticks(0), NoteData::new(0, 60, 100, 960));
        store.edit(|batch| {
            batch.add(Arc::clone(&obj));
            assert!(batch.remove(&obj));
        });
        assert!(store.is_empty());
    }

    #[test]
    fn test_noop_batch_does_not_notify() {
        let store = EventStore::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        store.subscribe(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });

        store.edit(|_batch| {});
        let missing = TimedObject::note(Ticks(0), NoteData::new(0, 60, 100, 960));
        assert!(!store.remove(&missing));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_metadata_propagation() {
        let meta: Metadata = Arc::new("lead voice");
        let note =
            TimedObject::note_with_metadata(Ticks(0), NoteData::new(0, 60, 100, 960), meta);
        let tag = note
            .metadata()
            .and_then(|m| m.downcast_ref::<&str>())
            .copied();
        assert_eq!(tag, Some("lead voice"));
    }
}
