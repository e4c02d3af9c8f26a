//! Active-note tracking and the note decision pipeline.

use crate::store::{NoteData, ObjectId, TimedObject};
use crate::time::Ticks;
use std::collections::HashMap;
use std::sync::Arc;

/// Context handed to a [`NotePolicy`] at a prospective note-on.
#[derive(Debug, Clone, Copy)]
pub struct NoteContext {
    /// Current playback position.
    pub position: Ticks,
    /// Ticks until the note's scheduled end, from `position`.
    pub remaining: u64,
    /// The note's full scheduled length in ticks.
    pub original_length: u64,
}

/// Outcome of a note decision: play as-is, play with different data, or
/// suppress the note entirely (both boundaries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteDecision {
    Play,
    Transform(NoteData),
    Skip,
}

/// Strategy consulted once per prospective note-on.
///
/// The decision is cached for the note's lifetime: replacing the policy
/// never re-decides notes already sounding, so an end payload always matches
/// its start payload.
pub trait NotePolicy: Send + Sync {
    fn decide(&self, note: &NoteData, ctx: &NoteContext) -> NoteDecision;
}

/// Pass-through policy; the default.
pub struct PlayAll;

impl NotePolicy for PlayAll {
    fn decide(&self, _note: &NoteData, _ctx: &NoteContext) -> NoteDecision {
        NoteDecision::Play
    }
}

impl<F> NotePolicy for F
where
    F: Fn(&NoteData, &NoteContext) -> NoteDecision + Send + Sync,
{
    fn decide(&self, note: &NoteData, ctx: &NoteContext) -> NoteDecision {
        self(note, ctx)
    }
}

/// Runtime state of one sounding note.
#[derive(Debug, Clone)]
pub(crate) struct NoteRuntimeState {
    pub note: Arc<TimedObject>,
    /// Post-decision data; the off event reuses this verbatim.
    pub effective: NoteData,
    /// Whether the on event was actually dispatched.
    pub started: bool,
}

/// The set of notes currently sounding, keyed by source-object identity.
///
/// Entries are created and destroyed by the playback orchestrator only.
#[derive(Default)]
pub(crate) struct ActiveNotes {
    notes: HashMap<ObjectId, NoteRuntimeState>,
}

impl ActiveNotes {
    pub fn insert(&mut self, id: ObjectId, state: NoteRuntimeState) {
        debug_assert!(
            !self.notes.contains_key(&id),
            "note {id:?} already in the registry"
        );
        self.notes.insert(id, state);
    }

    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.notes.contains_key(&id)
    }

    #[inline]
    pub fn take(&mut self, id: ObjectId) -> Option<NoteRuntimeState> {
        self.notes.remove(&id)
    }

    /// Ids of entries rejected by `keep`, in deterministic onset order.
    pub fn stale_ids(&self, keep: impl Fn(&NoteRuntimeState) -> bool) -> Vec<ObjectId> {
        let mut stale: Vec<(Ticks, ObjectId)> = self
            .notes
            .iter()
            .filter(|(_, state)| !keep(state))
            .map(|(id, state)| (state.note.position(), *id))
            .collect();
        stale.sort();
        stale.into_iter().map(|(_, id)| id).collect()
    }

    /// Remove and return every entry, in deterministic onset order.
    pub fn drain(&mut self) -> Vec<NoteRuntimeState> {
        let mut drained: Vec<NoteRuntimeState> = self.notes.drain().map(|(_, s)| s).collect();
        drained.sort_by_key(|s| (s.note.position(), s.effective.channel, s.effective.key));
        drained
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(position: u64, key: u8) -> (ObjectId, NoteRuntimeState) {
        let data = NoteData::new(0, key, 100, 960);
        let note = TimedObject::note(Ticks(position), data);
        let id = ObjectId::of(&note);
        (
            id,
            NoteRuntimeState {
                note,
                effective: data,
                started: true,
            },
        )
    }

    #[test]
    fn test_insert_take() {
        let mut active = ActiveNotes::default();
        let (id, state) = entry(0, 60);
        active.insert(id, state);
        assert!(active.contains(id));
        assert_eq!(active.len(), 1);

        let taken = active.take(id).unwrap();
        assert_eq!(taken.effective.key, 60);
        assert!(active.is_empty());
        assert!(active.take(id).is_none());
    }

    #[test]
    fn test_stale_ids_in_onset_order() {
        let mut active = ActiveNotes::default();
        let (id_b, state_b) = entry(500, 62);
        let (id_a, state_a) = entry(0, 60);
        active.insert(id_b, state_b);
        active.insert(id_a, state_a);

        let stale = active.stale_ids(|_| false);
        assert_eq!(stale, vec![id_a, id_b]);

        let none_stale = active.stale_ids(|_| true);
        assert!(none_stale.is_empty());
    }

    #[test]
    fn test_drain_in_onset_order() {
        let mut active = ActiveNotes::default();
        for (position, key) in [(900, 64), (0, 60), (450, 62)] {
            let (id, state) = entry(position, key);
            active.insert(id, state);
        }
        let keys: Vec<u8> = active.drain().iter().map(|s| s.effective.key).collect();
        assert_eq!(keys, vec![60, 62, 64]);
        assert!(active.is_empty());
    }

    #[test]
    fn test_policy_closure() {
        let policy = |note: &NoteData, _ctx: &NoteContext| {
            if note.key < 60 {
                NoteDecision::Skip
            } else {
                NoteDecision::Transform(note.with_key(note.key + 12))
            }
        };
        let ctx = NoteContext {
            position: Ticks::ZERO,
            remaining: 960,
            original_length: 960,
        };
        assert_eq!(policy.decide(&NoteData::new(0, 48, 100, 960), &ctx), NoteDecision::Skip);
        match policy.decide(&NoteData::new(0, 60, 100, 960), &ctx) {
            NoteDecision::Transform(data) => assert_eq!(data.key, 72),
            other => panic!("unexpected decision: {other:?}"),
        }
    }
}
