//! Resolved, time-ordered event stream derived from the source collection.

use crate::channels::Dimension;
use crate::event::ChannelEvent;
use crate::store::{ObjectKind, TimedObject};
use crate::time::Ticks;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether a resolved event marks a note boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteBoundary {
    None,
    Start,
    End,
}

/// A concrete dispatchable unit derived from a timed object.
///
/// A note yields two (start and end); a discrete event yields itself.
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub position: Ticks,
    pub payload: ChannelEvent,
    pub source: Arc<TimedObject>,
    pub boundary: NoteBoundary,
}

/// Per-tick batch of due events.
pub(crate) type DueEvents = SmallVec<[ResolvedEvent; 8]>;

/// Time-ordered view over the source collection, with a drain cursor and
/// per-dimension value indexes for channel-state reconciliation.
///
/// Total order is `(position, insertion order, end-after-start)`, so
/// simultaneous events replay in the same order across runs.
pub(crate) struct EventStream {
    events: Vec<ResolvedEvent>,
    cursor: usize,
    values: HashMap<(u8, Dimension), Vec<(Ticks, u16)>>,
}

impl EventStream {
    /// Derive the full stream from a store snapshot.
    pub fn rebuild(objects: &[Arc<TimedObject>]) -> Self {
        let mut keyed: Vec<(Ticks, usize, u8, ResolvedEvent)> = Vec::new();
        for (seq, object) in objects.iter().enumerate() {
            match object.kind() {
                ObjectKind::Event(event) => keyed.push((
                    object.position(),
                    seq,
                    0,
                    ResolvedEvent {
                        position: object.position(),
                        payload: *event,
                        source: Arc::clone(object),
                        boundary: NoteBoundary::None,
                    },
                )),
                ObjectKind::Note(data) => {
                    keyed.push((
                        object.position(),
                        seq,
                        0,
                        ResolvedEvent {
                            position: object.position(),
                            payload: data.on_event(),
                            source: Arc::clone(object),
                            boundary: NoteBoundary::Start,
                        },
                    ));
                    keyed.push((
                        object.end_position(),
                        seq,
                        1,
                        ResolvedEvent {
                            position: object.end_position(),
                            payload: data.off_event(),
                            source: Arc::clone(object),
                            boundary: NoteBoundary::End,
                        },
                    ));
                }
            }
        }
        keyed.sort_by_key(|(position, seq, rank, _)| (*position, *seq, *rank));

        let events: Vec<ResolvedEvent> = keyed.into_iter().map(|(_, _, _, e)| e).collect();

        let mut values: HashMap<(u8, Dimension), Vec<(Ticks, u16)>> = HashMap::new();
        for event in &events {
            if event.boundary != NoteBoundary::None {
                continue;
            }
            if let Some((dimension, value)) = Dimension::of(&event.payload) {
                values
                    .entry((event.payload.channel_num(), dimension))
                    .or_default()
                    .push((event.position, value));
            }
        }

        tracing::debug!(events = events.len(), "resolved event stream rebuilt");
        Self {
            events,
            cursor: 0,
            values,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Largest position of any resolved event (note ends included).
    pub fn extent(&self) -> Ticks {
        self.events
            .iter()
            .map(|e| e.position)
            .max()
            .unwrap_or(Ticks::ZERO)
    }

    /// Point the cursor at the first event at or after `position`.
    ///
    /// Events exactly at a seek destination fire when playback continues.
    pub fn seek(&mut self, position: Ticks) {
        self.cursor = self.events.partition_point(|e| e.position < position);
    }

    /// Point the cursor past everything already drained.
    ///
    /// `drained` is the inclusive upper bound of positions already handed
    /// out; `None` means nothing was drained yet.
    pub fn resync(&mut self, drained: Option<Ticks>) {
        self.cursor = match drained {
            Some(limit) => self.events.partition_point(|e| e.position <= limit),
            None => 0,
        };
    }

    /// Drain every event due at or before `position`, in order.
    pub fn collect_due(&mut self, position: Ticks, out: &mut DueEvents) {
        while self.cursor < self.events.len() && self.events[self.cursor].position <= position {
            out.push(self.events[self.cursor].clone());
            self.cursor += 1;
        }
    }

    /// Latest value written to `(channel, dimension)` at or before `position`.
    pub fn value_at(&self, channel: u8, dimension: Dimension, position: Ticks) -> Option<u16> {
        let entries = self.values.get(&(channel, dimension))?;
        let idx = entries.partition_point(|(p, _)| *p <= position);
        idx.checked_sub(1).map(|i| entries[i].1)
    }

    /// Every `(channel, dimension)` pair the stream writes at least once.
    pub fn tracked_pairs(&self) -> impl Iterator<Item = (u8, Dimension)> + '_ {
        self.values.keys().copied()
    }

    /// Notes whose interval strictly contains `position`.
    ///
    /// Strict at the start so a note beginning exactly at a seek destination
    /// is left to fire naturally from the cursor.
    pub fn notes_sounding_at(&self, position: Ticks) -> Vec<Arc<TimedObject>> {
        self.events
            .iter()
            .filter(|e| e.boundary == NoteBoundary::Start)
            .filter(|e| e.position < position && position < e.source.end_position())
            .map(|e| Arc::clone(&e.source))
            .collect()
    }

    /// Whether a note with this identity is still part of the stream.
    pub fn has_note(&self, id: crate::store::ObjectId) -> bool {
        self.events
            .iter()
            .any(|e| e.boundary == NoteBoundary::Start && crate::store::ObjectId::of(&e.source) == id)
    }

    /// Positions of every note boundary of the given kind, in stream order.
    pub fn note_boundary_positions(&self, boundary: NoteBoundary) -> Vec<Ticks> {
        self.events
            .iter()
            .filter(|e| e.boundary == boundary)
            .map(|e| e.position)
            .collect()
    }
}
