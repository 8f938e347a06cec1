//! Calibration and pulse timing as stored in the experiment scope

use super::{floor2, milliamp, raw_intensity, round2, vars};
use crate::scope::{Value, VariableStore};
use std::time::{Duration, Instant};
use tracing::debug;

/// Confirmed intensity ceiling of one experiment run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    /// Selected level, rounded to two decimals
    pub percent: f64,
    pub raw_intensity: u8,
    pub milliamp: f64,
}

impl CalibrationState {
    /// Truncates the slider level to two decimals and derives the raw
    /// ceiling and current from that published level
    pub fn from_percent(percent: f64) -> Self {
        let percent = floor2(percent.clamp(0.0, 100.0));
        Self {
            percent,
            raw_intensity: raw_intensity(percent),
            milliamp: round2(milliamp(percent)),
        }
    }

    /// Reads the calibration back; `None` if no calibrate step completed
    pub fn load(store: &dyn VariableStore) -> Option<Self> {
        let percent = store.get(vars::CALIBRATION_PERC)?.as_f64()?;
        let raw = store.get(vars::CALIBRATION_VALUE)?.as_i64()?;
        let current = store
            .get(vars::CALIBRATION_MILLIAMP)
            .and_then(Value::as_f64)
            .unwrap_or_else(|| round2(milliamp(percent)));
        Some(Self {
            percent,
            raw_intensity: u8::try_from(raw).ok()?,
            milliamp: current,
        })
    }

    pub fn publish(&self, store: &mut dyn VariableStore) {
        store.set(vars::CALIBRATION_PERC, Value::Float(self.percent));
        store.set(
            vars::CALIBRATION_VALUE,
            Value::Int(i64::from(self.raw_intensity)),
        );
        store.set(vars::CALIBRATION_MILLIAMP, Value::Float(self.milliamp));
    }
}

/// Time of the most recent stimulate call, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseTimingState {
    pub last_pulse: Option<Instant>,
}

impl PulseTimingState {
    pub fn load(store: &dyn VariableStore) -> Self {
        Self {
            last_pulse: store.get(vars::TIME_LAST_PULSE).and_then(Value::as_instant),
        }
    }

    /// Time since the last pulse; `None` if there never was one
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.last_pulse.map(|last| now.saturating_duration_since(last))
    }

    pub fn record(store: &mut dyn VariableStore, at: Instant) {
        debug!("Recording pulse timestamp");
        store.set(vars::TIME_LAST_PULSE, Value::Time(at));
    }
}
