//! Playback clock and tick sources.

use crate::error::{Error, Result};
use crate::time::{TempoMap, Ticks};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pluggable provider of periodic wake-ups and the monotonic reference time.
///
/// The default implementation polls the system clock at a short fixed
/// interval; [`VirtualTickSource`] is a deterministic replacement for tests.
pub trait TickSource: Send + Sync {
    /// Monotonic reference time.
    fn now(&self) -> Duration;

    /// Block until roughly `timeout` elapses or an external wake arrives.
    fn wait(&self, timeout: Duration);
}

/// Tick source backed by [`Instant`], sleeping between polls.
pub struct SystemTickSource {
    origin: Instant,
}

impl SystemTickSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SystemTickSource {
    #[inline]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wait(&self, timeout: Duration) {
        std::thread::sleep(timeout);
    }
}

struct VirtualTimeInner {
    now: Mutex<Duration>,
    wake: Condvar,
}

/// Hand-driven tick source for deterministic tests.
///
/// Cloned handles share the same timeline; [`advance`](Self::advance) moves
/// time forward and wakes every waiter immediately.
#[derive(Clone)]
pub struct VirtualTickSource {
    inner: Arc<VirtualTimeInner>,
}

impl VirtualTickSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(VirtualTimeInner {
                now: Mutex::new(Duration::ZERO),
                wake: Condvar::new(),
            }),
        }
    }

    /// Move the shared timeline forward and wake all waiters.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.inner.now.lock();
        *now += delta;
        self.inner.wake.notify_all();
    }
}

impl Default for VirtualTickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for VirtualTickSource {
    fn now(&self) -> Duration {
        *self.inner.now.lock()
    }

    fn wait(&self, timeout: Duration) {
        let mut now = self.inner.now.lock();
        let _ = self.inner.wake.wait_for(&mut now, timeout);
    }
}

/// The scheduling core: running state, speed, and wall-to-musical conversion.
///
/// The clock accumulates *timeline time* (real time along the playback
/// timeline, unscaled by speed); the musical position is derived through the
/// tempo map. Folding wall deltas rather than anchoring to an absolute start
/// keeps speed changes free of position discontinuities.
pub(crate) struct PlaybackClock {
    tempo_map: Arc<dyn TempoMap>,
    speed: f64,
    timeline: Duration,
    /// Reference time of the last fold; `None` while stopped.
    anchor: Option<Duration>,
}

impl PlaybackClock {
    pub fn new(tempo_map: Arc<dyn TempoMap>) -> Self {
        Self {
            tempo_map,
            speed: 1.0,
            timeline: Duration::ZERO,
            anchor: None,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        self.speed
    }

    #[inline]
    pub fn position(&self) -> Ticks {
        self.tempo_map.time_to_ticks(self.timeline)
    }

    /// Fold wall time up to `now` into the timeline.
    fn fold(&mut self, now: Duration) {
        if let Some(anchor) = self.anchor {
            let wall = now.saturating_sub(anchor);
            self.timeline += wall.mul_f64(self.speed);
            self.anchor = Some(now);
        }
    }

    /// Stopped to Running; a no-op while already running.
    pub fn start(&mut self, now: Duration) {
        if self.anchor.is_none() {
            self.anchor = Some(now);
        }
    }

    /// Running to Stopped, preserving position.
    pub fn stop(&mut self, now: Duration) {
        self.fold(now);
        self.anchor = None;
    }

    /// Advance to `now` and return the reached position.
    pub fn advance(&mut self, now: Duration) -> Ticks {
        self.fold(now);
        self.position()
    }

    /// Position as of `now`, without mutating the timeline.
    pub fn peek_position(&self, now: Duration) -> Ticks {
        let timeline = match self.anchor {
            Some(anchor) => self.timeline + now.saturating_sub(anchor).mul_f64(self.speed),
            None => self.timeline,
        };
        self.tempo_map.time_to_ticks(timeline)
    }

    /// Rewrite the position. Wall time up to `now` is folded first so the
    /// jump is exact.
    pub fn seek(&mut self, target: Ticks, now: Duration) {
        self.fold(now);
        self.timeline = self.tempo_map.ticks_to_time(target);
    }

    /// Change the rate multiplier. The conversion baseline is re-anchored at
    /// the moment of change, so no position discontinuity occurs.
    pub fn set_speed(&mut self, speed: f64, now: Duration) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(Error::InvalidSpeed(speed));
        }
        self.fold(now);
        self.speed = speed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ConstantTempoMap;

    fn clock() -> PlaybackClock {
        // 120 BPM, 960 PPQ: 1920 ticks per second
        PlaybackClock::new(Arc::new(ConstantTempoMap::default()))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_stopped_clock_holds_position() {
        let mut clock = clock();
        assert!(!clock.is_running());
        assert_eq!(clock.advance(secs(5)), Ticks::ZERO);
    }

    #[test]
    fn test_advance_while_running() {
        let mut clock = clock();
        clock.start(secs(10));
        assert_eq!(clock.advance(secs(11)), Ticks(1920));
        assert_eq!(clock.advance(secs(12)), Ticks(3840));
    }

    #[test]
    fn test_stop_preserves_position() {
        let mut clock = clock();
        clock.start(secs(0));
        clock.stop(secs(1));
        assert_eq!(clock.position(), Ticks(1920));
        // Wall time passing while stopped is ignored.
        assert_eq!(clock.advance(secs(100)), Ticks(1920));
        clock.start(secs(100));
        assert_eq!(clock.advance(secs(101)), Ticks(3840));
    }

    #[test]
    fn test_speed_scales_rate() {
        let mut clock = clock();
        clock.set_speed(2.0, secs(0)).unwrap();
        clock.start(secs(0));
        assert_eq!(clock.advance(secs(1)), Ticks(3840));
    }

    #[test]
    fn test_speed_change_has_no_discontinuity() {
        let mut clock = clock();
        clock.start(secs(0));
        clock.advance(secs(1));
        clock.set_speed(2.0, secs(1)).unwrap();
        // Position unchanged at the moment of the speed change.
        assert_eq!(clock.position(), Ticks(1920));
        assert_eq!(clock.advance(secs(2)), Ticks(1920 + 3840));
    }

    #[test]
    fn test_speed_change_folds_pending_wall_time() {
        let mut clock = clock();
        clock.start(secs(0));
        // Half a second at 1x, then switch to 4x without an advance between.
        clock.set_speed(4.0, millis(500)).unwrap();
        assert_eq!(clock.advance(millis(1000)), Ticks(960 + 3840));
    }

    #[test]
    fn test_invalid_speed_rejected() {
        let mut clock = clock();
        assert!(matches!(
            clock.set_speed(0.0, secs(0)),
            Err(Error::InvalidSpeed(_))
        ));
        assert!(matches!(
            clock.set_speed(-1.0, secs(0)),
            Err(Error::InvalidSpeed(_))
        ));
        assert!(matches!(
            clock.set_speed(f64::NAN, secs(0)),
            Err(Error::InvalidSpeed(_))
        ));
        // State unchanged on rejection.
        assert_eq!(clock.speed(), 1.0);
    }

    #[test]
    fn test_seek_while_running() {
        let mut clock = clock();
        clock.start(secs(0));
        clock.seek(Ticks(9600), secs(1));
        assert_eq!(clock.position(), Ticks(9600));
        assert_eq!(clock.advance(secs(2)), Ticks(9600 + 1920));
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let mut clock = clock();
        clock.start(secs(0));
        assert_eq!(clock.peek_position(secs(1)), Ticks(1920));
        assert_eq!(clock.position(), Ticks::ZERO);
        assert_eq!(clock.advance(secs(1)), Ticks(1920));
    }

    #[test]
    fn test_virtual_tick_source() {
        let source = VirtualTickSource::new();
        let handle = source.clone();
        assert_eq!(source.now(), Duration::ZERO);
        handle.advance(millis(250));
        assert_eq!(source.now(), millis(250));
    }
}
