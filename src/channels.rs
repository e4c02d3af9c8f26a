//! Per-channel controller, pitch-bend and program state tracking.

use crate::event::ChannelEvent;
use crate::stream::EventStream;
use crate::time::Ticks;
use midi_msg::{ChannelVoiceMsg, ControlChange};
use std::collections::{HashMap, HashSet};

/// A tracked per-channel state dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dimension {
    Program,
    PitchBend,
    Controller(u8),
}

impl Dimension {
    /// The dimension written by `event`, with the written value.
    ///
    /// Controller writes are recognized in the generic `CC` form, which is
    /// what this crate's constructors produce.
    pub fn of(event: &ChannelEvent) -> Option<(Dimension, u16)> {
        match event.msg {
            ChannelVoiceMsg::ProgramChange { program } => {
                Some((Dimension::Program, program as u16))
            }
            ChannelVoiceMsg::PitchBend { bend } => Some((Dimension::PitchBend, bend)),
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC { control, value },
            } => Some((Dimension::Controller(control), value as u16)),
            _ => None,
        }
    }

    /// Value assumed in effect before any event writes the dimension.
    #[inline]
    pub fn default_value(self) -> u16 {
        match self {
            Dimension::Program => 0,
            Dimension::PitchBend => 8192, // center
            Dimension::Controller(_) => 0,
        }
    }

    /// A corrective event carrying `value` on `channel`.
    pub(crate) fn corrective_event(self, channel: u8, value: u16) -> ChannelEvent {
        match self {
            Dimension::Program => ChannelEvent::program_change(channel, value as u8),
            Dimension::PitchBend => ChannelEvent::pitch_bend(channel, value),
            Dimension::Controller(control) => {
                ChannelEvent::control_change(channel, control, value as u8)
            }
        }
    }
}

/// Tracks, per `(channel, dimension)`, the value last dispatched to the sink
/// and computes the corrective events a discontinuous position change needs.
///
/// The memory persists for the playback's lifetime; only a full rewind to
/// the start of the bounded range resets it.
#[derive(Default)]
pub(crate) struct ChannelTracker {
    dispatched: HashMap<(u8, Dimension), u16>,
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every event that reaches the sink, natural or corrective.
    pub fn observe(&mut self, event: &ChannelEvent) {
        if let Some((dimension, value)) = Dimension::of(event) {
            self.dispatched
                .insert((event.channel_num(), dimension), value);
        }
    }

    /// Corrective events needed so the sink state matches `position`.
    ///
    /// For each relevant `(channel, dimension)` pair: nothing is emitted when
    /// the destination value equals what was last dispatched; the destination
    /// value is emitted when they differ; the dimension default is emitted
    /// when something was dispatched but nothing precedes the destination.
    pub fn reconcile(
        &mut self,
        stream: &EventStream,
        position: Ticks,
        enabled: impl Fn(Dimension) -> bool,
    ) -> Vec<ChannelEvent> {
        let mut pairs: HashSet<(u8, Dimension)> = stream.tracked_pairs().collect();
        pairs.extend(self.dispatched.keys().copied());

        let mut pairs: Vec<(u8, Dimension)> = pairs.into_iter().collect();
        pairs.sort();

        let mut corrections = Vec::new();
        for (channel, dimension) in pairs {
            if !enabled(dimension) {
                continue;
            }
            let destination = stream.value_at(channel, dimension, position);
            let last = self.dispatched.get(&(channel, dimension)).copied();
            let emit = match (destination, last) {
                (Some(value), Some(sent)) if value != sent => Some(value),
                (Some(value), None) => Some(value),
                (None, Some(_)) => Some(dimension.default_value()),
                _ => None,
            };
            if let Some(value) = emit {
                let event = dimension.corrective_event(channel, value);
                self.observe(&event);
                corrections.push(event);
            }
        }
        if !corrections.is_empty() {
            tracing::trace!(
                count = corrections.len(),
                position = %position,
                "channel state corrected"
            );
        }
        corrections
    }

    /// Forget everything dispatched. Used by a full rewind only.
    pub fn reset(&mut self) {
        self.dispatched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TimedObject;
    use std::sync::Arc;

    fn stream_with(events: &[(u64, ChannelEvent)]) -> EventStream {
        let objects: Vec<Arc<TimedObject>> = events
            .iter()
            .map(|(position, event)| TimedObject::event(Ticks(*position), *event))
            .collect();
        EventStream::rebuild(&objects)
    }

    #[test]
    fn test_dimension_of() {
        assert_eq!(
            Dimension::of(&ChannelEvent::control_change(0, 7, 100)),
            Some((Dimension::Controller(7), 100))
        );
        assert_eq!(
            Dimension::of(&ChannelEvent::pitch_bend(0, 4096)),
            Some((Dimension::PitchBend, 4096))
        );
        assert_eq!(
            Dimension::of(&ChannelEvent::program_change(0, 5)),
            Some((Dimension::Program, 5))
        );
        assert_eq!(Dimension::of(&ChannelEvent::note_on(0, 60, 100)), None);
    }

    #[test]
    fn test_no_correction_when_value_already_correct() {
        let stream = stream_with(&[(0, ChannelEvent::control_change(0, 7, 70))]);
        let mut tracker = ChannelTracker::new();
        tracker.observe(&ChannelEvent::control_change(0, 7, 70));

        let corrections = tracker.reconcile(&stream, Ticks(500), |_| true);
        assert!(corrections.is_empty());
    }

    #[test]
    fn test_destination_value_emitted_when_never_dispatched() {
        let stream = stream_with(&[(0, ChannelEvent::control_change(0, 7, 70))]);
        let mut tracker = ChannelTracker::new();

        let corrections = tracker.reconcile(&stream, Ticks(500), |_| true);
        assert_eq!(corrections, vec![ChannelEvent::control_change(0, 7, 70)]);

        // Idempotent: the correction was observed.
        let corrections = tracker.reconcile(&stream, Ticks(500), |_| true);
        assert!(corrections.is_empty());
    }

    #[test]
    fn test_default_emitted_when_nothing_precedes_destination() {
        let stream = stream_with(&[(960, ChannelEvent::control_change(0, 7, 70))]);
        let mut tracker = ChannelTracker::new();
        tracker.observe(&ChannelEvent::control_change(0, 7, 70));

        // Jump back before the only control change: reset to the default.
        let corrections = tracker.reconcile(&stream, Ticks(100), |_| true);
        assert_eq!(corrections, vec![ChannelEvent::control_change(0, 7, 0)]);
    }

    #[test]
    fn test_pitch_bend_default_is_center() {
        let stream = stream_with(&[(960, ChannelEvent::pitch_bend(3, 0))]);
        let mut tracker = ChannelTracker::new();
        tracker.observe(&ChannelEvent::pitch_bend(3, 0));

        let corrections = tracker.reconcile(&stream, Ticks(100), |_| true);
        assert_eq!(corrections, vec![ChannelEvent::pitch_bend(3, 8192)]);
    }

    #[test]
    fn test_disabled_dimension_is_ignored() {
        let stream = stream_with(&[
            (0, ChannelEvent::control_change(0, 7, 70)),
            (0, ChannelEvent::program_change(0, 9)),
        ]);
        let mut tracker = ChannelTracker::new();

        let corrections =
            tracker.reconcile(&stream, Ticks(500), |d| matches!(d, Dimension::Program));
        assert_eq!(corrections, vec![ChannelEvent::program_change(0, 9)]);
    }

    #[test]
    fn test_channels_tracked_independently() {
        let stream = stream_with(&[
            (0, ChannelEvent::control_change(0, 7, 70)),
            (0, ChannelEvent::control_change(1, 7, 40)),
        ]);
        let mut tracker = ChannelTracker::new();
        tracker.observe(&ChannelEvent::control_change(0, 7, 70));

        let corrections = tracker.reconcile(&stream, Ticks(500), |_| true);
        assert_eq!(corrections, vec![ChannelEvent::control_change(1, 7, 40)]);
    }

    #[test]
    fn test_reset_forgets_dispatched_state() {
        let stream = stream_with(&[(960, ChannelEvent::control_change(0, 7, 70))]);
        let mut tracker = ChannelTracker::new();
        tracker.observe(&ChannelEvent::control_change(0, 7, 70));
        tracker.reset();

        // Nothing dispatched, nothing at the destination: no correction.
        let corrections = tracker.reconcile(&stream, Ticks(100), |_| true);
        assert!(corrections.is_empty());
    }
}
