//! Pulse-window RPM estimation.
//!
//! Every level change on the break-beam input is one pulse; a fan with `blades`
//! blades produces `blades` pulses per revolution. The estimate is the number of
//! pulses seen in the trailing window, scaled to revolutions per minute.
//!
//! Timestamps are a free-running 32-bit microsecond counter that wraps roughly
//! every 71 minutes; all age arithmetic is wrapping.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ControlError;

/// `[sensor]` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Pulses per revolution.
    pub blades: u32,
    /// Trailing window the estimate is computed over.
    pub window_ms: u32,
    /// How often a fresh estimate is published.
    pub update_interval_ms: u32,
    /// Delay between sensor reads in the sampler thread.
    pub sample_interval_us: u64,
    /// Pulse timestamps kept; older ones are overwritten.
    pub log_capacity: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            blades: 3,
            window_ms: 500,
            update_interval_ms: 100,
            sample_interval_us: 100,
            log_capacity: 1000,
        }
    }
}

impl EstimatorConfig {
    /// Reject values the estimator cannot work with.
    pub fn validate(&self) -> Result<(), ControlError> {
        let zero = [
            ("sensor.blades", self.blades == 0),
            ("sensor.window_ms", self.window_ms == 0),
            ("sensor.update_interval_ms", self.update_interval_ms == 0),
            ("sensor.sample_interval_us", self.sample_interval_us == 0),
            ("sensor.log_capacity", self.log_capacity == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ControlError::InvalidConfig(format!("{field} must be non-zero")));
        }
        // 32-bit microsecond timestamps cannot express windows much past an hour.
        if u64::from(self.window_ms) * 1000 > u64::from(u32::MAX / 2) {
            return Err(ControlError::InvalidConfig("sensor.window_ms is too large".into()));
        }
        Ok(())
    }

    /// Delay between sensor reads.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(self.sample_interval_us)
    }
}

/// Convert a pulse count over `window` into RPM.
pub fn rpm_from_pulses(pulses: usize, blades: u32, window: Duration) -> f64 {
    let seconds = window.as_secs_f64();
    if blades == 0 || seconds <= 0.0 {
        return 0.0;
    }
    (pulses as f64 / f64::from(blades)) * (60.0 / seconds)
}

/// Fixed-capacity ring of pulse timestamps, newest overwriting oldest.
#[derive(Debug, Clone)]
pub struct PulseLog {
    stamps: Vec<u32>,
    // Index the next stamp is written to.
    head: usize,
    len: usize,
}

impl PulseLog {
    /// An empty log holding at most `capacity` stamps.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stamps: vec![0; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    /// Record a pulse.
    pub fn push(&mut self, stamp: u32) {
        let capacity = self.stamps.len();
        self.stamps[self.head] = stamp;
        self.head = (self.head + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    /// Number of stamps held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the log holds no stamps.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Count the stamps no older than `window_us` at `now`, forgetting the rest.
    ///
    /// Stamps are scanned newest first and the scan stops at the first stale
    /// one, so a stamp that would look "in the future" after the counter wraps
    /// is never reached.
    pub fn retain_recent(&mut self, now: u32, window_us: u32) -> usize {
        let capacity = self.stamps.len();
        let mut recent = 0;
        while recent < self.len {
            let idx = (self.head + capacity - 1 - recent) % capacity;
            if now.wrapping_sub(self.stamps[idx]) > window_us {
                break;
            }
            recent += 1;
        }
        self.len = recent;
        recent
    }
}

/// Turns raw sensor samples into periodic RPM estimates.
#[derive(Debug, Clone)]
pub struct RpmEstimator {
    blades: u32,
    window: Duration,
    window_us: u32,
    update_us: u32,
    log: PulseLog,
    last_level: Option<bool>,
    last_update: Option<u32>,
    pulses: u64,
}

impl RpmEstimator {
    /// Estimator with an empty pulse log.
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            blades: config.blades,
            window: Duration::from_millis(u64::from(config.window_ms)),
            window_us: config.window_ms.saturating_mul(1000),
            update_us: config.update_interval_ms.saturating_mul(1000),
            log: PulseLog::with_capacity(config.log_capacity),
            last_level: None,
            last_update: None,
            pulses: 0,
        }
    }

    /// Feed one sensor reading taken at `now` (wrapping microseconds).
    ///
    /// Returns a fresh estimate whenever the update interval has elapsed. The
    /// very first reading only latches the level.
    pub fn sample(&mut self, level: bool, now: u32) -> Option<f64> {
        if self.last_level.is_some_and(|previous| previous != level) {
            self.log.push(now);
            self.pulses += 1;
        }
        self.last_level = Some(level);

        let last = *self.last_update.get_or_insert(now);
        if now.wrapping_sub(last) < self.update_us {
            return None;
        }
        self.last_update = Some(now);
        Some(self.estimate(now))
    }

    /// Estimate at `now` from the pulses currently in the window.
    pub fn estimate(&mut self, now: u32) -> f64 {
        let pulses = self.log.retain_recent(now, self.window_us);
        rpm_from_pulses(pulses, self.blades, self.window)
    }

    /// Pulses seen since construction.
    pub fn total_pulses(&self) -> u64 {
        self.pulses
    }
}
