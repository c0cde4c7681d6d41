//! Clock and timing utilities for render sessions.
//!
//! Export timestamps are derived from the output frame index, never from the
//! wall clock, so an export is bit-for-bit reproducible no matter how long
//! each frame took to converge. The wall clock is only used for
//! progress/ETA reporting.

use std::time::{Duration, Instant};

/// Microseconds per second, the timebase of encoded packets.
pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Presentation timestamp (µs) of an output frame.
pub fn frame_timestamp_us(frame_index: u64, fps: u32) -> i64 {
    (frame_index as f64 * MICROS_PER_SECOND / fps.max(1) as f64).round() as i64
}

/// Duration (µs) of a single output frame.
pub fn frame_duration_us(fps: u32) -> i64 {
    (MICROS_PER_SECOND / fps.max(1) as f64).round() as i64
}

/// Convert microseconds into ticks of the given timescale, rounding to nearest.
pub fn us_to_ticks(us: i64, timescale: u32) -> u64 {
    ((us.max(0) as f64) * timescale as f64 / MICROS_PER_SECOND).round() as u64
}

/// A session clock anchored to the moment a render session started.
#[derive(Debug, Clone)]
pub struct RenderClock {
    /// The instant the session started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RenderClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the session started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at session start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Estimates remaining render time from the durations of completed frames.
///
/// Uses the running mean of all completed frame durations; a single slow
/// frame (e.g. the first one, which pays for allocation) is diluted rather
/// than extrapolated.
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    total_units: u64,
    completed_units: u64,
    busy: Duration,
    unit_started: Option<Instant>,
}

impl EtaEstimator {
    /// Create an estimator for a job of `total_units` frames (or tiles).
    pub fn new(total_units: u64) -> Self {
        Self {
            total_units,
            completed_units: 0,
            busy: Duration::ZERO,
            unit_started: None,
        }
    }

    /// Mark the start of a unit. Calling twice keeps the first instant.
    pub fn begin_unit(&mut self) {
        if self.unit_started.is_none() {
            self.unit_started = Some(Instant::now());
        }
    }

    /// Mark the current unit as complete.
    pub fn end_unit(&mut self) {
        if let Some(started) = self.unit_started.take() {
            self.record(started.elapsed());
        }
    }

    /// Drop the in-flight unit timer (e.g. while paused).
    pub fn suspend(&mut self) {
        self.unit_started = None;
    }

    /// Record a completed unit with an explicit duration.
    pub fn record(&mut self, duration: Duration) {
        self.busy += duration;
        self.completed_units += 1;
    }

    /// Units completed so far.
    pub fn completed(&self) -> u64 {
        self.completed_units
    }

    /// Estimated seconds remaining, or `None` before the first unit completes.
    pub fn eta_secs(&self) -> Option<f64> {
        if self.completed_units == 0 {
            return None;
        }
        let mean = self.busy.as_secs_f64() / self.completed_units as f64;
        let remaining = self.total_units.saturating_sub(self.completed_units);
        Some(mean * remaining as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timestamps_round_to_nearest_microsecond() {
        assert_eq!(frame_timestamp_us(0, 30), 0);
        assert_eq!(frame_timestamp_us(1, 30), 33_333);
        assert_eq!(frame_timestamp_us(2, 30), 66_667);
        assert_eq!(frame_timestamp_us(9, 30), 300_000);
        assert_eq!(frame_duration_us(30), 33_333);
        assert_eq!(frame_duration_us(24), 41_667);
    }

    #[test]
    fn test_us_to_ticks() {
        assert_eq!(us_to_ticks(33_333, 30_000), 1_000);
        assert_eq!(us_to_ticks(66_667, 30_000), 2_000);
        assert_eq!(us_to_ticks(1_000_000, 90_000), 90_000);
        assert_eq!(us_to_ticks(-5, 90_000), 0);
    }

    #[test]
    fn test_clock_elapsed() {
        let clock = RenderClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_eta_uses_mean_of_completed_units() {
        let mut eta = EtaEstimator::new(10);
        assert!(eta.eta_secs().is_none());

        eta.record(Duration::from_secs(4));
        eta.record(Duration::from_secs(2));
        assert_eq!(eta.completed(), 2);
        let remaining = eta.eta_secs().unwrap();
        assert!((remaining - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_eta_suspend_discards_in_flight_unit() {
        let mut eta = EtaEstimator::new(3);
        eta.begin_unit();
        eta.suspend();
        eta.end_unit();
        assert_eq!(eta.completed(), 0);
    }
}
