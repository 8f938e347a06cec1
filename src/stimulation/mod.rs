//! Tactile stimulation with calibration ceiling and pulse holdoff
//!
//! A calibrate step lets the operator pick a safe maximum intensity and
//! publishes it into the experiment scope. Later stimulate steps scale every
//! requested percentage by that ceiling and refuse pulses that follow the
//! previous one too closely.
//!
//! ```text
//!               calibrate (OK)                    stimulate
//! Uncalibrated ───────────────► Calibrated ◄──────────────────┐
//!       │                           ▲   └─────────────────────┘
//!       └──── resume(scope) ────────┘
//!          (MissingCalibration if the scope has none)
//! ```

pub mod calibration;
pub mod controller;
pub mod error;
pub mod state;

pub use calibration::{CalibrationDisplay, CalibrationLayout, LogDisplay, Rect, Target};
pub use controller::{
    list_stimulators, Calibrated, PulseOutcome, StimulationReport, TactileStimulator, Uncalibrated,
};
pub use error::StimulationError;
pub use state::{CalibrationState, PulseTimingState};

use crate::config::ConfigError;
use crate::device::{PULSE_DURATION_RANGE_MS, PULSE_VALUE_MAX};
use serde::{Deserialize, Serialize};

/// Output current at 100 % intensity
pub const MILLIAMP_AT_MAX: f64 = 5.0;

pub const DEFAULT_PULSE_DURATION_MS: u16 = 150;

/// Minimum time between two stimulate pulses, in seconds
pub const DEFAULT_PULSE_TIMEOUT_S: f64 = 1.0;

/// Countdown length after a calibration test pulse
pub const DEFAULT_INTER_PULSE_HOLDOFF: u64 = 8;

/// Name filter of stimulator units in `list_attached`
pub const STIMULATOR_FILTER: &str = "SHOCKER";

/// Name filter used when an EVT box stands in for the stimulator
pub const EVT_EMULATION_FILTER: &str = "EventExchanger-EVT";

/// Names under which the stimulator publishes into the experiment scope
pub mod vars {
    pub const CALIBRATION_PERC: &str = "tactstim_calibration_perc";
    pub const CALIBRATION_VALUE: &str = "tactstim_calibration_value";
    pub const CALIBRATION_MILLIAMP: &str = "tactstim_calibration_milliamp";
    pub const PULSE_DURATION_MS: &str = "tactstim_pulse_duration_ms";
    pub const PULSE_VALUE: &str = "tactstim_pulse_value";
    pub const PULSE_MILLIAMP: &str = "tactstim_pulse_milliamp";
    pub const TIME_LAST_PULSE: &str = "tactstim_time_last_pulse";
}

/// When the last-pulse timestamp is written
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HoldoffPolicy {
    /// After every stimulate call, refused and simulated ones included
    #[default]
    EveryInvocation,
    /// Only after a pulse was attempted or simulated
    DeliveredOnly,
}

pub fn validate_pulse_duration(duration_ms: i64) -> Result<u16, ConfigError> {
    u16::try_from(duration_ms)
        .ok()
        .filter(|ms| PULSE_DURATION_RANGE_MS.contains(ms))
        .ok_or(ConfigError::PulseDurationOutOfRange(duration_ms))
}

pub fn validate_percent(percent: f64) -> Result<f64, ConfigError> {
    if (0.0..=100.0).contains(&percent) {
        Ok(percent)
    } else {
        Err(ConfigError::PercentOutOfRange(percent))
    }
}

/// `floor(percent * 254 / 100)`, never above the hardware ceiling
pub fn raw_intensity(percent: f64) -> u8 {
    let raw = (percent * f64::from(PULSE_VALUE_MAX) / 100.0).floor();
    raw.clamp(0.0, f64::from(PULSE_VALUE_MAX)) as u8
}

pub fn milliamp(percent: f64) -> f64 {
    MILLIAMP_AT_MAX * percent / 100.0
}

/// Rounds to two decimals, as values are published to the scope
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Truncates to two decimals; a level published this way never grows
///
/// The slack absorbs float noise from the slider mapping only, so `80.0`
/// computed as `79.99999999999999` still publishes as `80.0`.
pub fn floor2(value: f64) -> f64 {
    ((value * 100.0) + 1e-9).floor() / 100.0
}
