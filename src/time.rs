//! Musical time and tempo mapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Musical-time position in tempo-map-relative ticks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Ticks(pub u64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    #[inline]
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn saturating_add(self, delta: u64) -> Self {
        Self(self.0.saturating_add(delta))
    }

    #[inline]
    pub fn saturating_sub(self, delta: u64) -> Self {
        Self(self.0.saturating_sub(delta))
    }

    /// Clamp into the inclusive `[start, end]` range.
    #[inline]
    pub fn clamp_to(self, start: Ticks, end: Ticks) -> Self {
        Self(self.0.clamp(start.0, end.0))
    }
}

impl core::ops::Add<u64> for Ticks {
    type Output = Self;

    #[inline]
    fn add(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }
}

impl core::ops::AddAssign<u64> for Ticks {
    #[inline]
    fn add_assign(&mut self, delta: u64) {
        self.0 += delta;
    }
}

impl core::ops::Sub<Ticks> for Ticks {
    type Output = u64;

    #[inline]
    fn sub(self, other: Ticks) -> u64 {
        self.0 - other.0
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}t", self.0)
    }
}

impl From<u64> for Ticks {
    #[inline]
    fn from(ticks: u64) -> Self {
        Self(ticks)
    }
}

/// Converts between musical ticks and elapsed real time.
///
/// Pure and stateless from the engine's perspective; consumed as
/// `Arc<dyn TempoMap>`.
pub trait TempoMap: Send + Sync {
    /// Real time elapsed from the timeline origin to `ticks`.
    fn ticks_to_time(&self, ticks: Ticks) -> Duration;

    /// Musical position reached after `time` of playback from the origin.
    fn time_to_ticks(&self, time: Duration) -> Ticks;
}

/// Fixed-tempo map: `bpm` beats per minute, `ppq` ticks per quarter note.
#[derive(Debug, Clone, Copy)]
pub struct ConstantTempoMap {
    bpm: f64,
    ppq: u32,
}

impl ConstantTempoMap {
    pub fn new(bpm: f64, ppq: u32) -> Self {
        Self {
            bpm: bpm.clamp(1.0, 999.0),
            ppq: ppq.max(1),
        }
    }

    #[inline]
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    #[inline]
    pub fn ppq(&self) -> u32 {
        self.ppq
    }

    #[inline]
    fn ticks_per_second(&self) -> f64 {
        self.bpm / 60.0 * self.ppq as f64
    }
}

impl Default for ConstantTempoMap {
    fn default() -> Self {
        Self::new(120.0, 960)
    }
}

impl TempoMap for ConstantTempoMap {
    #[inline]
    fn ticks_to_time(&self, ticks: Ticks) -> Duration {
        Duration::from_secs_f64(ticks.get() as f64 / self.ticks_per_second())
    }

    #[inline]
    fn time_to_ticks(&self, time: Duration) -> Ticks {
        // Floor with a sub-tick epsilon so ticks_to_time followed by
        // time_to_ticks is exact despite Duration's nanosecond grain.
        Ticks((time.as_secs_f64() * self.ticks_per_second() + 1e-4).floor() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_arithmetic() {
        let t = Ticks::new(960);
        assert_eq!(t + 480, Ticks(1440));
        assert_eq!(t.saturating_sub(480), Ticks(480));
        assert_eq!(t.saturating_sub(2000), Ticks::ZERO);
        assert_eq!(Ticks(1440) - t, 480);
    }

    #[test]
    fn test_ticks_clamp() {
        assert_eq!(Ticks(50).clamp_to(Ticks(100), Ticks(200)), Ticks(100));
        assert_eq!(Ticks(150).clamp_to(Ticks(100), Ticks(200)), Ticks(150));
        assert_eq!(Ticks(250).clamp_to(Ticks(100), Ticks(200)), Ticks(200));
    }

    #[test]
    fn test_constant_tempo_conversion() {
        // 120 BPM, 960 PPQ: one beat = 960 ticks = 0.5 s
        let map = ConstantTempoMap::default();
        assert_eq!(map.ticks_to_time(Ticks(960)), Duration::from_millis(500));
        assert_eq!(map.time_to_ticks(Duration::from_millis(500)), Ticks(960));
        assert_eq!(map.time_to_ticks(Duration::ZERO), Ticks::ZERO);
    }

    #[test]
    fn test_conversion_roundtrip() {
        let map = ConstantTempoMap::new(137.0, 480);
        for ticks in [0u64, 1, 7, 480, 961, 123_456] {
            let t = Ticks(ticks);
            assert_eq!(map.time_to_ticks(map.ticks_to_time(t)), t);
        }
    }

    #[test]
    fn test_tempo_bounds() {
        let map = ConstantTempoMap::new(0.5, 960);
        assert_eq!(map.bpm(), 1.0);
        let map = ConstantTempoMap::new(1500.0, 960);
        assert_eq!(map.bpm(), 999.0);
    }
}
