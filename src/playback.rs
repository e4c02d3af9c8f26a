//! Playback orchestrator: transport, dispatch, and consistency tracking.

use crate::channels::{ChannelTracker, Dimension};
use crate::clock::{PlaybackClock, SystemTickSource, TickSource};
use crate::error::{Error, Result};
use crate::event::ChannelEvent;
use crate::notes::{ActiveNotes, NoteContext, NoteDecision, NotePolicy, NoteRuntimeState, PlayAll};
use crate::snap::{GeneratorKey, SnapData, SnapDirection, SnapGroupId, SnapPoint, SnapPointId, SnapPoints};
use crate::store::{EventStore, NoteData, ObjectId};
use crate::stream::{DueEvents, EventStream, NoteBoundary, ResolvedEvent};
use crate::time::{ConstantTempoMap, TempoMap, Ticks};
use arc_swap::ArcSwap;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

/// Destination for dispatched events.
///
/// A failed send is surfaced through [`PlaybackNotification::SendFailed`];
/// playback continues and nothing is retried.
pub trait OutputSink: Send {
    fn send(&mut self, event: ChannelEvent) -> Result<()>;
}

/// Notifications delivered on the channel returned by
/// [`Playback::notifications`].
#[derive(Debug, Clone)]
pub enum PlaybackNotification {
    Started,
    Stopped,
    Finished,
    RepeatStarted,
    EventPlayed(ChannelEvent),
    SendFailed {
        event: ChannelEvent,
        reason: String,
    },
    NotePlaybackStarted {
        effective: NoteData,
        original: NoteData,
    },
    NotePlaybackFinished {
        effective: NoteData,
        original: NoteData,
    },
}

/// Feature toggles. All enabled by default.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackOptions {
    /// Reconcile the active-note registry after discontinuous position
    /// changes and source mutations.
    pub track_notes: bool,
    pub track_program: bool,
    pub track_pitch_value: bool,
    pub track_control_value: bool,
    /// Force-end sounding notes on `stop()` instead of letting them ride
    /// across the pause.
    pub interrupt_notes_on_stop: bool,
    /// Send note-offs for notes that are not active at the new position.
    pub send_note_off_events_for_non_active_notes: bool,
    /// Send note-ons for notes already sounding at a seek destination.
    pub send_note_on_events_for_active_notes: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            track_notes: true,
            track_program: true,
            track_pitch_value: true,
            track_control_value: true,
            interrupt_notes_on_stop: true,
            send_note_off_events_for_non_active_notes: true,
            send_note_on_events_for_active_notes: true,
        }
    }
}

enum OutboundItem {
    Send(ChannelEvent),
    Notify(PlaybackNotification),
}

type Outbox = Vec<OutboundItem>;

struct PlayerState {
    clock: PlaybackClock,
    stream: EventStream,
    active: ActiveNotes,
    tracker: ChannelTracker,
    snaps: SnapPoints,
    options: PlaybackOptions,
    loop_enabled: bool,
    start_bound: Ticks,
    end_bound: Ticks,
    explicit_start: bool,
    explicit_end: bool,
    /// Inclusive upper bound of positions already drained from the stream;
    /// `None` before anything fired. Keeps rebuilds from re-firing events.
    drained: Option<Ticks>,
}

/// Sized slot for the hot-swappable policy (`ArcSwap` stores thin pointers).
struct PolicySlot {
    policy: Arc<dyn NotePolicy>,
}

struct Shared {
    state: Mutex<PlayerState>,
    sink: Mutex<Box<dyn OutputSink>>,
    policy: ArcSwap<PolicySlot>,
    store: EventStore,
    tick: Arc<dyn TickSource>,
    poll_interval: Duration,
    dirty: Arc<AtomicBool>,
    notify_tx: Sender<PlaybackNotification>,
}

#[inline]
fn drained_before(position: Ticks) -> Option<Ticks> {
    position.get().checked_sub(1).map(Ticks)
}

impl Shared {
    fn notify(&self, notification: PlaybackNotification) {
        let _ = self.notify_tx.send(notification);
    }

    fn note_policy(&self) -> Arc<dyn NotePolicy> {
        Arc::clone(&self.policy.load().policy)
    }

    /// Run `f` under the state lock, then flush the produced events.
    ///
    /// The sink lock is taken before the state lock is released, so batches
    /// reach the sink in production order while slow sink I/O never blocks
    /// state mutation.
    fn run<R>(&self, f: impl FnOnce(&Self, &mut PlayerState, &mut Outbox) -> R) -> R {
        let mut outbox = Outbox::new();
        let mut state = self.state.lock();
        self.refresh_if_dirty(&mut state, &mut outbox);
        let result = f(self, &mut state, &mut outbox);
        let mut sink = self.sink.lock();
        drop(state);
        self.flush(&mut sink, outbox);
        result
    }

    fn flush(&self, sink: &mut Box<dyn OutputSink>, outbox: Outbox) {
        for item in outbox {
            match item {
                OutboundItem::Send(event) => match sink.send(event) {
                    Ok(()) => self.notify(PlaybackNotification::EventPlayed(event)),
                    Err(err) => {
                        debug!(%err, "output sink rejected event");
                        self.notify(PlaybackNotification::SendFailed {
                            event,
                            reason: err.to_string(),
                        });
                    }
                },
                OutboundItem::Notify(notification) => self.notify(notification),
            }
        }
    }

    /// Re-derive the stream after a committed source batch and restore
    /// note/channel consistency at the current position.
    fn refresh_if_dirty(&self, state: &mut PlayerState, outbox: &mut Outbox) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let snapshot = self.store.snapshot();
        state.stream = EventStream::rebuild(&snapshot);
        if !state.explicit_start {
            state.start_bound = Ticks::ZERO;
        }
        if !state.explicit_end {
            // Follow the data extent, but never cross an explicit start.
            state.end_bound = state.stream.extent().max(state.start_bound);
        }
        state.stream.resync(state.drained);

        let position = state.clock.position();
        let clamped = position.clamp_to(state.start_bound, state.end_bound);
        if clamped != position {
            let now = self.tick.now();
            state.clock.seek(clamped, now);
            state.stream.seek(clamped);
            state.drained = drained_before(clamped);
        }
        let position = state.clock.position();
        self.reconcile_channels(state, position, outbox);
        let policy = self.note_policy();
        self.reconcile_notes(state, position, &policy, outbox);
    }

    fn reconcile_channels(&self, state: &mut PlayerState, position: Ticks, outbox: &mut Outbox) {
        let options = state.options;
        let corrections =
            state
                .tracker
                .reconcile(&state.stream, position, |dimension| match dimension {
                    Dimension::Program => options.track_program,
                    Dimension::PitchBend => options.track_pitch_value,
                    Dimension::Controller(_) => options.track_control_value,
                });
        for event in corrections {
            outbox.push(OutboundItem::Send(event));
        }
    }

    /// Make the registry reflect exactly the notes sounding at `position`.
    fn reconcile_notes(
        &self,
        state: &mut PlayerState,
        position: Ticks,
        policy: &Arc<dyn NotePolicy>,
        outbox: &mut Outbox,
    ) {
        if !state.options.track_notes {
            return;
        }

        let stale = state.active.stale_ids(|entry| {
            let note = &entry.note;
            state.stream.has_note(ObjectId::of(note))
                && note.position() <= position
                && position < note.end_position()
        });
        let send_offs = state.options.send_note_off_events_for_non_active_notes;
        for id in stale {
            let Some(entry) = state.active.take(id) else {
                continue;
            };
            if send_offs {
                outbox.push(OutboundItem::Send(entry.effective.off_event()));
            }
            let original = entry.note.note_data().copied().unwrap_or(entry.effective);
            outbox.push(OutboundItem::Notify(
                PlaybackNotification::NotePlaybackFinished {
                    effective: entry.effective,
                    original,
                },
            ));
        }

        let send_ons = state.options.send_note_on_events_for_active_notes;
        for note in state.stream.notes_sounding_at(position) {
            let id = ObjectId::of(&note);
            if state.active.contains(id) {
                continue;
            }
            let Some(&original) = note.note_data() else {
                continue;
            };
            let ctx = NoteContext {
                position,
                remaining: note.end_position() - position,
                original_length: original.length,
            };
            let effective = match policy.decide(&original, &ctx) {
                NoteDecision::Skip => continue,
                NoteDecision::Play => original,
                NoteDecision::Transform(data) => data,
            };
            if send_ons {
                outbox.push(OutboundItem::Send(effective.on_event()));
            }
            outbox.push(OutboundItem::Notify(
                PlaybackNotification::NotePlaybackStarted {
                    effective,
                    original,
                },
            ));
            state.active.insert(
                id,
                NoteRuntimeState {
                    note,
                    effective,
                    started: send_ons,
                },
            );
        }
    }

    /// Pure position rewrite plus the reconciliation protocol.
    fn seek_to(&self, state: &mut PlayerState, target: Ticks, outbox: &mut Outbox) -> Ticks {
        let now = self.tick.now();
        let clamped = target.clamp_to(state.start_bound, state.end_bound);
        let overshoot = target > state.end_bound;
        state.clock.seek(clamped, now);
        state.stream.seek(clamped);
        state.drained = drained_before(clamped);

        self.reconcile_channels(state, clamped, outbox);
        let policy = self.note_policy();
        self.reconcile_notes(state, clamped, &policy, outbox);

        if overshoot && state.clock.is_running() {
            self.finish(state, now, outbox);
        }
        debug!(target = %target, effective = %clamped, "seek");
        clamped
    }

    fn handle_due_event(
        &self,
        state: &mut PlayerState,
        event: ResolvedEvent,
        policy: &Arc<dyn NotePolicy>,
        outbox: &mut Outbox,
    ) {
        match event.boundary {
            NoteBoundary::None => {
                state.tracker.observe(&event.payload);
                outbox.push(OutboundItem::Send(event.payload));
            }
            NoteBoundary::Start => {
                let id = ObjectId::of(&event.source);
                let Some(&original) = event.source.note_data() else {
                    return;
                };
                // A seek onto the note's exact start can leave a prior entry
                // behind; end it before restarting.
                if let Some(previous) = state.active.take(id) {
                    if previous.started {
                        outbox.push(OutboundItem::Send(previous.effective.off_event()));
                    }
                    outbox.push(OutboundItem::Notify(
                        PlaybackNotification::NotePlaybackFinished {
                            effective: previous.effective,
                            original,
                        },
                    ));
                }
                let ctx = NoteContext {
                    position: event.position,
                    remaining: original.length,
                    original_length: original.length,
                };
                let effective = match policy.decide(&original, &ctx) {
                    NoteDecision::Skip => return,
                    NoteDecision::Play => original,
                    NoteDecision::Transform(data) => data,
                };
                outbox.push(OutboundItem::Send(effective.on_event()));
                outbox.push(OutboundItem::Notify(
                    PlaybackNotification::NotePlaybackStarted {
                        effective,
                        original,
                    },
                ));
                state.active.insert(
                    id,
                    NoteRuntimeState {
                        note: Arc::clone(&event.source),
                        effective,
                        started: true,
                    },
                );
            }
            NoteBoundary::End => {
                let id = ObjectId::of(&event.source);
                // Absent entry means the note was skipped: no end either.
                let Some(entry) = state.active.take(id) else {
                    return;
                };
                let Some(&original) = event.source.note_data() else {
                    return;
                };
                outbox.push(OutboundItem::Send(entry.effective.off_event()));
                outbox.push(OutboundItem::Notify(
                    PlaybackNotification::NotePlaybackFinished {
                        effective: entry.effective,
                        original,
                    },
                ));
            }
        }
    }

    /// Interrupt semantics shared by `stop()` and finishing.
    fn end_notes_for_stop(&self, state: &mut PlayerState, outbox: &mut Outbox) {
        if !state.options.interrupt_notes_on_stop {
            return;
        }
        let send_unreached = state.options.send_note_off_events_for_non_active_notes;
        for entry in state.active.drain() {
            if entry.started || send_unreached {
                outbox.push(OutboundItem::Send(entry.effective.off_event()));
            }
            let original = entry.note.note_data().copied().unwrap_or(entry.effective);
            outbox.push(OutboundItem::Notify(
                PlaybackNotification::NotePlaybackFinished {
                    effective: entry.effective,
                    original,
                },
            ));
        }
    }

    fn finish(&self, state: &mut PlayerState, now: Duration, outbox: &mut Outbox) {
        state.clock.stop(now);
        state.clock.seek(state.end_bound, now);
        self.end_notes_for_stop(state, outbox);
        outbox.push(OutboundItem::Notify(PlaybackNotification::Finished));
        debug!(position = %state.end_bound, "playback finished");
    }

    fn wrap_to_loop_start(&self, state: &mut PlayerState, now: Duration, outbox: &mut Outbox) {
        let start = state.start_bound;
        state.clock.seek(start, now);
        state.stream.seek(start);
        state.drained = drained_before(start);
        outbox.push(OutboundItem::Notify(PlaybackNotification::RepeatStarted));
        self.reconcile_channels(state, start, outbox);
        let policy = self.note_policy();
        self.reconcile_notes(state, start, &policy, outbox);
        debug!(start = %start, "loop wrapped");
    }

    /// One pass of the clock-driven scheduler.
    fn tick_once(&self) {
        let mut outbox = Outbox::new();
        let mut state = self.state.lock();
        self.refresh_if_dirty(&mut state, &mut outbox);

        if state.clock.is_running() {
            let now = self.tick.now();
            let reached = state.clock.advance(now);
            let position = reached.clamp_to(state.start_bound, state.end_bound);

            let mut due = DueEvents::new();
            state.stream.collect_due(position, &mut due);
            state.drained = Some(position);

            let policy = self.note_policy();
            for event in due {
                self.handle_due_event(&mut state, event, &policy, &mut outbox);
            }

            if reached >= state.end_bound {
                if state.loop_enabled && state.end_bound > state.start_bound {
                    self.wrap_to_loop_start(&mut state, now, &mut outbox);
                } else {
                    self.finish(&mut state, now, &mut outbox);
                }
            }
        }

        let mut sink = self.sink.lock();
        drop(state);
        self.flush(&mut sink, outbox);
    }
}

fn worker_loop(shared: Arc<Shared>, shutdown: Arc<AtomicBool>) {
    debug!("playback worker started");
    while !shutdown.load(Ordering::Acquire) {
        shared.tick.wait(shared.poll_interval);
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        shared.tick_once();
    }
    debug!("playback worker stopped");
}

/// Builder for [`Playback`].
pub struct PlaybackBuilder {
    store: EventStore,
    sink: Box<dyn OutputSink>,
    tempo_map: Arc<dyn TempoMap>,
    tick: Arc<dyn TickSource>,
    poll_interval: Duration,
    options: PlaybackOptions,
    policy: Arc<dyn NotePolicy>,
    speed: f64,
    loop_enabled: bool,
}

impl PlaybackBuilder {
    pub fn tempo_map(mut self, tempo_map: Arc<dyn TempoMap>) -> Self {
        self.tempo_map = tempo_map;
        self
    }

    pub fn tick_source(mut self, tick: Arc<dyn TickSource>) -> Self {
        self.tick = tick;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn options(mut self, options: PlaybackOptions) -> Self {
        self.options = options;
        self
    }

    pub fn note_policy(mut self, policy: Arc<dyn NotePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn loop_enabled(mut self, loop_enabled: bool) -> Self {
        self.loop_enabled = loop_enabled;
        self
    }

    pub fn build(self) -> Result<Playback> {
        let mut clock = PlaybackClock::new(self.tempo_map);
        clock.set_speed(self.speed, Duration::ZERO)?;

        let stream = EventStream::rebuild(&self.store.snapshot());
        let end_bound = stream.extent();
        let state = PlayerState {
            clock,
            stream,
            active: ActiveNotes::default(),
            tracker: ChannelTracker::new(),
            snaps: SnapPoints::default(),
            options: self.options,
            loop_enabled: self.loop_enabled,
            start_bound: Ticks::ZERO,
            end_bound,
            explicit_start: false,
            explicit_end: false,
            drained: None,
        };

        let (notify_tx, notify_rx) = unbounded();
        let dirty = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            sink: Mutex::new(self.sink),
            policy: ArcSwap::new(Arc::new(PolicySlot {
                policy: self.policy,
            })),
            store: self.store,
            tick: self.tick,
            poll_interval: self.poll_interval,
            dirty: Arc::clone(&dirty),
            notify_tx,
        });

        // Committed batches mark the playback stale; the next locked
        // operation or tick re-derives the stream.
        let flag = Arc::clone(&dirty);
        shared.store.subscribe(move || {
            flag.store(true, Ordering::Release);
        });

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = std::thread::Builder::new()
            .name("ostinato-playback".into())
            .spawn({
                let shared = Arc::clone(&shared);
                let shutdown = Arc::clone(&shutdown);
                move || worker_loop(shared, shutdown)
            })
            .expect("failed to spawn playback worker");

        Ok(Playback {
            shared,
            notify_rx,
            shutdown,
            worker: Some(worker),
        })
    }
}

/// Real-time playback of a timed event collection through an output sink.
///
/// All transport, seek and configuration calls are safe from any thread and
/// take effect immediately, running or stopped. Dropping the playback stops
/// the clock thread and joins it; no dispatch happens after disposal.
pub struct Playback {
    shared: Arc<Shared>,
    notify_rx: Receiver<PlaybackNotification>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Playback {
    pub fn builder(store: EventStore, sink: impl OutputSink + 'static) -> PlaybackBuilder {
        PlaybackBuilder {
            store,
            sink: Box::new(sink),
            tempo_map: Arc::new(ConstantTempoMap::default()),
            tick: Arc::new(SystemTickSource::new()),
            poll_interval: Duration::from_millis(1),
            options: PlaybackOptions::default(),
            policy: Arc::new(PlayAll),
            speed: 1.0,
            loop_enabled: false,
        }
    }

    /// Notification stream. Each notification is delivered to one receiver.
    pub fn notifications(&self) -> Receiver<PlaybackNotification> {
        self.notify_rx.clone()
    }

    /// Begin (or resume) playback from the current position.
    ///
    /// Starting from the terminal position begins a fresh cycle from
    /// `playback_start`. A no-op while already running.
    pub fn start(&self) {
        self.shared.run(|shared, state, outbox| {
            if state.clock.is_running() {
                return;
            }
            if state.clock.position() >= state.end_bound && state.end_bound > state.start_bound {
                let start = state.start_bound;
                shared.seek_to(state, start, outbox);
            }
            let now = shared.tick.now();
            state.clock.start(now);
            outbox.push(OutboundItem::Notify(PlaybackNotification::Started));
        });
    }

    /// Halt playback, preserving position. A no-op while already stopped.
    pub fn stop(&self) {
        self.shared.run(|shared, state, outbox| {
            if !state.clock.is_running() {
                return;
            }
            let now = shared.tick.now();
            state.clock.stop(now);
            shared.end_notes_for_stop(state, outbox);
            outbox.push(OutboundItem::Notify(PlaybackNotification::Stopped));
        });
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().clock.is_running()
    }

    /// Current position, clamped to the playback bounds.
    pub fn position(&self) -> Ticks {
        let state = self.shared.state.lock();
        let now = self.shared.tick.now();
        state
            .clock
            .peek_position(now)
            .clamp_to(state.start_bound, state.end_bound)
    }

    /// Jump to `target`. Returns the new effective (clamped) position.
    pub fn move_to_time(&self, target: Ticks) -> Ticks {
        self.shared
            .run(|shared, state, outbox| shared.seek_to(state, target, outbox))
    }

    /// Jump forward by `delta` ticks.
    pub fn move_forward(&self, delta: u64) -> Ticks {
        self.shared.run(|shared, state, outbox| {
            let now = shared.tick.now();
            let target = state.clock.peek_position(now).saturating_add(delta);
            shared.seek_to(state, target, outbox)
        })
    }

    /// Jump back by `delta` ticks.
    pub fn move_back(&self, delta: u64) -> Ticks {
        self.shared.run(|shared, state, outbox| {
            let now = shared.tick.now();
            let target = state.clock.peek_position(now).saturating_sub(delta);
            shared.seek_to(state, target, outbox)
        })
    }

    /// Full rewind to `playback_start`. The only operation that resets the
    /// channel tracker's dispatched-state memory.
    pub fn move_to_start(&self) -> Ticks {
        self.shared.run(|shared, state, outbox| {
            state.tracker.reset();
            let start = state.start_bound;
            shared.seek_to(state, start, outbox)
        })
    }

    pub fn speed(&self) -> f64 {
        self.shared.state.lock().clock.speed()
    }

    /// Change the rate multiplier without a position discontinuity.
    pub fn set_speed(&self, speed: f64) -> Result<()> {
        self.shared.run(|shared, state, _outbox| {
            let now = shared.tick.now();
            state.clock.set_speed(speed, now)
        })
    }

    pub fn loop_enabled(&self) -> bool {
        self.shared.state.lock().loop_enabled
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.shared.state.lock().loop_enabled = enabled;
    }

    pub fn playback_start(&self) -> Ticks {
        self.shared.state.lock().start_bound
    }

    pub fn playback_end(&self) -> Ticks {
        self.shared.state.lock().end_bound
    }

    /// Set the lower playback bound; `None` reverts to the default (zero).
    pub fn set_playback_start(&self, start: Option<Ticks>) -> Result<()> {
        self.shared.run(|shared, state, outbox| {
            let new_start = start.unwrap_or(Ticks::ZERO);
            if new_start > state.end_bound {
                return Err(Error::InvalidBounds {
                    start: new_start,
                    end: state.end_bound,
                });
            }
            state.start_bound = new_start;
            state.explicit_start = start.is_some();
            let now = shared.tick.now();
            if state.clock.peek_position(now) < new_start {
                shared.seek_to(state, new_start, outbox);
            }
            Ok(())
        })
    }

    /// Set the upper playback bound; `None` reverts to the data extent.
    pub fn set_playback_end(&self, end: Option<Ticks>) -> Result<()> {
        self.shared.run(|shared, state, outbox| {
            let new_end = end.unwrap_or_else(|| state.stream.extent());
            if new_end < state.start_bound {
                return Err(Error::InvalidBounds {
                    start: state.start_bound,
                    end: new_end,
                });
            }
            state.end_bound = new_end;
            state.explicit_end = end.is_some();
            let now = shared.tick.now();
            let position = state.clock.peek_position(now);
            if position > new_end {
                shared.seek_to(state, position, outbox);
            }
            Ok(())
        })
    }

    pub fn options(&self) -> PlaybackOptions {
        self.shared.state.lock().options
    }

    pub fn set_track_notes(&self, enabled: bool) {
        self.shared.run(|shared, state, outbox| {
            state.options.track_notes = enabled;
            if enabled {
                let position = state.clock.position();
                let policy = shared.note_policy();
                shared.reconcile_notes(state, position, &policy, outbox);
            }
        });
    }

    pub fn set_track_program(&self, enabled: bool) {
        self.set_dimension_tracking(|options| &mut options.track_program, enabled);
    }

    pub fn set_track_pitch_value(&self, enabled: bool) {
        self.set_dimension_tracking(|options| &mut options.track_pitch_value, enabled);
    }

    pub fn set_track_control_value(&self, enabled: bool) {
        self.set_dimension_tracking(|options| &mut options.track_control_value, enabled);
    }

    /// Flip one dimension toggle; enabling runs an immediate reconciliation
    /// pass at the current position.
    fn set_dimension_tracking(
        &self,
        field: fn(&mut PlaybackOptions) -> &mut bool,
        enabled: bool,
    ) {
        self.shared.run(|shared, state, outbox| {
            *field(&mut state.options) = enabled;
            if enabled {
                let position = state.clock.position();
                shared.reconcile_channels(state, position, outbox);
            }
        });
    }

    pub fn set_interrupt_notes_on_stop(&self, enabled: bool) {
        self.shared.state.lock().options.interrupt_notes_on_stop = enabled;
    }

    pub fn set_send_note_off_events_for_non_active_notes(&self, enabled: bool) {
        self.shared
            .state
            .lock()
            .options
            .send_note_off_events_for_non_active_notes = enabled;
    }

    pub fn set_send_note_on_events_for_active_notes(&self, enabled: bool) {
        self.shared
            .state
            .lock()
            .options
            .send_note_on_events_for_active_notes = enabled;
    }

    /// Replace the note decision strategy. Notes already sounding keep the
    /// decision made at their start.
    pub fn set_note_policy(&self, policy: Arc<dyn NotePolicy>) {
        self.shared.policy.store(Arc::new(PolicySlot { policy }));
    }

    // --- snap points -----------------------------------------------------

    pub fn add_snap_point(&self, position: Ticks, data: Option<SnapData>) -> SnapPointId {
        self.shared.state.lock().snaps.add(position, data)
    }

    pub fn remove_snap_point(&self, id: SnapPointId) -> bool {
        self.shared.state.lock().snaps.remove(id)
    }

    pub fn remove_snap_points_by(&self, predicate: impl Fn(&SnapData) -> bool) {
        self.shared.state.lock().snaps.remove_by(predicate);
    }

    pub fn clear_snap_points(&self) {
        self.shared.state.lock().snaps.clear();
    }

    pub fn set_snap_point_enabled(&self, id: SnapPointId, enabled: bool) -> bool {
        self.shared.state.lock().snaps.set_point_enabled(id, enabled)
    }

    pub fn set_snap_group_enabled(&self, id: SnapGroupId, enabled: bool) -> bool {
        self.shared.state.lock().snaps.set_group_enabled(id, enabled)
    }

    /// Grid markers every `step` ticks across the playback bounds.
    /// Idempotent: the same step yields the same group, refreshed.
    pub fn snap_to_grid(&self, step: u64) -> Result<SnapGroupId> {
        if step == 0 {
            return Err(Error::InvalidGridStep);
        }
        self.shared.run(|_shared, state, _outbox| {
            let mut positions = Vec::new();
            let mut p = state.start_bound.get();
            while p <= state.end_bound.get() {
                positions.push(Ticks(p));
                p += step;
            }
            Ok(state.snaps.generate(GeneratorKey::Grid(step), positions))
        })
    }

    /// Markers at every note start. Idempotent.
    pub fn snap_to_notes_starts(&self) -> SnapGroupId {
        self.shared.run(|_shared, state, _outbox| {
            let positions = state.stream.note_boundary_positions(NoteBoundary::Start);
            state.snaps.generate(GeneratorKey::NoteStarts, positions)
        })
    }

    /// Markers at every note end. Idempotent.
    pub fn snap_to_notes_ends(&self) -> SnapGroupId {
        self.shared.run(|_shared, state, _outbox| {
            let positions = state.stream.note_boundary_positions(NoteBoundary::End);
            state.snaps.generate(GeneratorKey::NoteEnds, positions)
        })
    }

    fn snap_navigate(
        &self,
        direction: SnapDirection,
        filter: impl Fn(&SnapPoint) -> bool,
    ) -> bool {
        self.shared.run(|shared, state, outbox| {
            let now = shared.tick.now();
            let from = state.clock.peek_position(now);
            match state.snaps.resolve(direction, from, filter) {
                Some(target) => {
                    shared.seek_to(state, target, outbox);
                    true
                }
                None => false,
            }
        })
    }

    pub fn move_to_first_snap_point(&self) -> bool {
        self.snap_navigate(SnapDirection::First, |_| true)
    }

    pub fn move_to_first_snap_point_in_group(&self, group: SnapGroupId) -> bool {
        self.snap_navigate(SnapDirection::First, |p| p.group == Some(group))
    }

    pub fn move_to_first_snap_point_matching(&self, predicate: impl Fn(&SnapData) -> bool) -> bool {
        self.snap_navigate(SnapDirection::First, |p| {
            p.data.as_ref().is_some_and(&predicate)
        })
    }

    pub fn move_to_next_snap_point(&self) -> bool {
        self.snap_navigate(SnapDirection::Next, |_| true)
    }

    pub fn move_to_next_snap_point_in_group(&self, group: SnapGroupId) -> bool {
        self.snap_navigate(SnapDirection::Next, |p| p.group == Some(group))
    }

    pub fn move_to_next_snap_point_matching(&self, predicate: impl Fn(&SnapData) -> bool) -> bool {
        self.snap_navigate(SnapDirection::Next, |p| {
            p.data.as_ref().is_some_and(&predicate)
        })
    }

    pub fn move_to_previous_snap_point(&self) -> bool {
        self.snap_navigate(SnapDirection::Previous, |_| true)
    }

    pub fn move_to_previous_snap_point_in_group(&self, group: SnapGroupId) -> bool {
        self.snap_navigate(SnapDirection::Previous, |p| p.group == Some(group))
    }

    pub fn move_to_previous_snap_point_matching(
        &self,
        predicate: impl Fn(&SnapData) -> bool,
    ) -> bool {
        self.snap_navigate(SnapDirection::Previous, |p| {
            p.data.as_ref().is_some_and(&predicate)
        })
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
