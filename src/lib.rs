//! Real-time playback engine for timed MIDI event streams.
//!
//! Given a collection of timed objects (discrete events and note intervals)
//! and a tempo mapping from musical ticks to wall-clock time, [`Playback`]
//! reproduces them through an output sink at the correct relative times,
//! with transport controls, live mutation of the underlying data while
//! running, and precise replay of per-channel controller/pitch/program
//! state when the position jumps.
//!
//! # Example
//!
//! ```ignore
//! use ostinato::{EventStore, NoteData, Playback, Ticks, TimedObject};
//!
//! let store = EventStore::new();
//! store.edit(|batch| {
//!     batch.add(TimedObject::note(Ticks(0), NoteData::new(0, 60, 100, 960)));
//! });
//!
//! let playback = Playback::builder(store.clone(), sink).build()?;
//! playback.start();
//!
//! // Mutate while running: one atomic commit, one reconciliation pass.
//! store.edit(|batch| {
//!     batch.add(TimedObject::note(Ticks(1920), NoteData::new(0, 64, 100, 960)));
//! });
//! ```

// Error types
pub mod error;
pub use error::{Error, Result};

// Main entry point
mod playback;
pub use playback::{Playback, PlaybackBuilder, PlaybackNotification, PlaybackOptions, OutputSink};

// Essential types users need
pub use channels::Dimension;
pub use clock::{SystemTickSource, TickSource, VirtualTickSource};
pub use event::ChannelEvent;
pub use notes::{NoteContext, NoteDecision, NotePolicy, PlayAll};
pub use snap::{SnapData, SnapGroupId, SnapPoint, SnapPointId};
pub use store::{EventStore, Metadata, NoteData, ObjectId, ObjectKind, StoreBatch, TimedObject};
pub use stream::{NoteBoundary, ResolvedEvent};
pub use time::{ConstantTempoMap, TempoMap, Ticks};

// Re-export essential upstream types (users shouldn't need to import
// midi-msg directly)
pub use midi_msg::{Channel, ChannelVoiceMsg, ControlChange, MidiMsg};

pub(crate) mod channels;
pub(crate) mod clock;
pub(crate) mod event;
pub(crate) mod notes;
pub(crate) mod snap;
pub(crate) mod stream;

// Public module for advanced usage
pub mod store;
pub(crate) mod time;
