//! Tactile stimulator with compile-time calibration gate
//!
//! Only a `TactileStimulator<Calibrated>` can pulse. It is reached either by
//! running the interactive calibration or by resuming from a calibration
//! another step already published into the same experiment scope.
//!
//! # Safety interlock
//!
//! Every pulse is refused while less than `pulse_timeout` has passed since
//! the last recorded stimulate call. The interlock runs identically in dummy
//! mode and cannot be switched off; only the recording of the timestamp is
//! configurable (see [`HoldoffPolicy`]).

use super::calibration::{CalibrationDisplay, CalibrationLayout, Target};
use super::error::StimulationError;
use super::state::{CalibrationState, PulseTimingState};
use super::{
    milliamp, raw_intensity, round2, validate_percent, validate_pulse_duration, vars,
    HoldoffPolicy, DEFAULT_INTER_PULSE_HOLDOFF, DEFAULT_PULSE_DURATION_MS,
    DEFAULT_PULSE_TIMEOUT_S, EVT_EMULATION_FILTER, MILLIAMP_AT_MAX, STIMULATOR_FILTER,
};
use crate::clock::Clock;
use crate::config::StimulatorConfig;
use crate::device::{Backend, DeviceDriver, DeviceError, Fallback, PULSE_VALUE_MAX};
use crate::input::PointerInput;
use crate::scope::{Value, VariableStore};
use statum::{machine, state};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum StimulatorState {
    Uncalibrated, // No ceiling known yet
    Calibrated,   // Ceiling published in the experiment scope
}

#[machine]
pub struct TactileStimulator<S: StimulatorState> {
    name: String,
    backend: Backend,
    pulse_duration_ms: u16,
    pulse_timeout: Duration,
    inter_pulse_holdoff: u64,
    holdoff_policy: HoldoffPolicy,
    layout: CalibrationLayout,
    clock: Box<dyn Clock>,
}

/// What happened to the pulse of one stimulate call
#[derive(Debug, Clone, PartialEq)]
pub enum PulseOutcome {
    Delivered,
    /// Dummy mode: everything ran except the device call
    Simulated,
    /// Holdoff interlock; no device call was made
    Refused { elapsed: Duration },
    Failed(DeviceError),
}

impl PulseOutcome {
    /// A pulse was sent to the device or simulated
    pub fn was_attempted(&self) -> bool {
        !matches!(self, PulseOutcome::Refused { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StimulationReport {
    /// Percentage as configured on the step
    pub requested_percent: f64,
    /// Percentage after range clamping
    pub applied_percent: f64,
    pub raw_intensity: u8,
    pub milliamp: f64,
    pub outcome: PulseOutcome,
}

impl StimulationReport {
    pub fn was_clamped(&self) -> bool {
        self.requested_percent.to_bits() != self.applied_percent.to_bits()
    }
}

impl<S: StimulatorState> TactileStimulator<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn pulse_duration_ms(&self) -> u16 {
        self.pulse_duration_ms
    }

    pub fn is_dummy(&self) -> bool {
        !self.backend.is_device()
    }

    /// Pulses the device, or reports the pulse in dummy mode
    fn issue_pulse(&mut self, intensity: u8) -> PulseOutcome {
        match &mut self.backend {
            Backend::DeviceBacked(channel) => match channel.pulse(intensity, self.pulse_duration_ms) {
                Ok(()) => PulseOutcome::Delivered,
                Err(e) => {
                    error!("Pulse on '{}' failed: {}", channel.device_id(), e);
                    PulseOutcome::Failed(e)
                }
            },
            Backend::KeyboardBacked | Backend::Dummy => {
                info!(
                    "(Dummy) {} pulsing at intensity {} for {}ms",
                    self.name, intensity, self.pulse_duration_ms
                );
                PulseOutcome::Simulated
            }
        }
    }
}

impl TactileStimulator<Uncalibrated> {
    /// Selects the stimulator device and validates the pulse settings
    ///
    /// A device that cannot be opened puts the item in dummy mode. Invalid
    /// numbers are reported and replaced by their defaults.
    pub fn prepare(driver: &dyn DeviceDriver, config: &StimulatorConfig, clock: Box<dyn Clock>) -> Self {
        info!("Preparing stimulator '{}'", config.name);

        let pulse_duration_ms = match validate_pulse_duration(config.pulse_duration_ms) {
            Ok(ms) => ms,
            Err(e) => {
                error!("{}. Using default of {}ms", e, DEFAULT_PULSE_DURATION_MS);
                DEFAULT_PULSE_DURATION_MS
            }
        };

        let pulse_timeout = match Duration::try_from_secs_f64(config.pulse_timeout_s) {
            Ok(timeout) => timeout,
            Err(e) => {
                error!(
                    "Invalid pulse timeout {}s ({}). Using default of {}s",
                    config.pulse_timeout_s, e, DEFAULT_PULSE_TIMEOUT_S
                );
                Duration::from_secs_f64(DEFAULT_PULSE_TIMEOUT_S)
            }
        };

        let inter_pulse_holdoff = if config.inter_pulse_holdoff_s == 0 {
            warn!(
                "Inter-pulse holdoff of 0 disables the test cooldown. Using {}",
                DEFAULT_INTER_PULSE_HOLDOFF
            );
            DEFAULT_INTER_PULSE_HOLDOFF
        } else {
            config.inter_pulse_holdoff_s
        };

        let backend = Backend::select(driver, &config.device, Fallback::Dummy);
        debug!(
            "Stimulator '{}': backend={}, duration={}ms, timeout={:?}, policy={:?}",
            config.name,
            backend.label(),
            pulse_duration_ms,
            pulse_timeout,
            config.holdoff_policy
        );

        Self::new(
            config.name.clone(),
            backend,
            pulse_duration_ms,
            pulse_timeout,
            inter_pulse_holdoff,
            config.holdoff_policy,
            CalibrationLayout::new(config.canvas_width, config.canvas_height),
            clock,
        )
    }

    /// Stimulate-mode entry: requires a calibration in `scope`
    pub fn resume(
        self,
        scope: &dyn VariableStore,
    ) -> Result<TactileStimulator<Calibrated>, StimulationError> {
        match CalibrationState::load(scope) {
            Some(calibration) => {
                debug!(
                    "Resuming '{}' with calibration ceiling {}%",
                    self.name, calibration.percent
                );
                Ok(self.transition())
            }
            None => {
                error!("'{}': {}", self.name, StimulationError::MissingCalibration);
                Err(StimulationError::MissingCalibration)
            }
        }
    }

    /// Interactive calibration; returns once OK is clicked
    ///
    /// Clicks on the slider only move the displayed level. TEST pulses at
    /// the current level and then blocks for `inter_pulse_holdoff - 1`
    /// seconds. OK publishes the level as the scope's calibration.
    pub fn calibrate(
        mut self,
        scope: &mut dyn VariableStore,
        pointer: &mut dyn PointerInput,
        display: &mut dyn CalibrationDisplay,
    ) -> Result<TactileStimulator<Calibrated>, StimulationError> {
        info!("Starting calibration on '{}'", self.backend.label());
        scope.set(
            vars::PULSE_DURATION_MS,
            Value::Int(i64::from(self.pulse_duration_ms)),
        );

        let mut percent = 0.0;
        display.show_level(percent, milliamp(percent));

        loop {
            pointer.get_click()?;
            let (position, _) = pointer.get_pos();

            match self.layout.hit(position) {
                Some(Target::Slider(level)) => {
                    percent = level;
                    display.show_level(percent, milliamp(percent));
                }
                Some(Target::Test) => self.test_pulse(percent, display),
                Some(Target::Ok) => {
                    let calibration = CalibrationState::from_percent(percent);
                    calibration.publish(scope);
                    info!(
                        "The calibration pulse intensity value is (raw, mA): {}, {:.2}",
                        calibration.raw_intensity, calibration.milliamp
                    );
                    return Ok(self.transition());
                }
                None => debug!("Click at ({:.0}, {:.0}) hit nothing", position.x, position.y),
            }
        }
    }

    fn test_pulse(&mut self, percent: f64, display: &mut dyn CalibrationDisplay) {
        let intensity = raw_intensity(percent);
        display.show_test_pulse(intensity, self.is_dummy());
        if let PulseOutcome::Failed(e) = self.issue_pulse(intensity) {
            warn!("Test pulse not delivered: {}", e);
        }

        for remaining in (1..self.inter_pulse_holdoff).rev() {
            display.show_cooldown(remaining);
            self.clock.sleep(Duration::from_secs(1));
        }
        display.show_cooldown(0);
    }
}

impl TactileStimulator<Calibrated> {
    /// Pulses at `perc_calibr_value` percent of the calibrated ceiling
    ///
    /// Out-of-range percentages become 0. The pulse is refused while the
    /// holdoff interlock is active. The calibration itself is only read.
    pub fn stimulate(
        &mut self,
        scope: &mut dyn VariableStore,
        perc_calibr_value: f64,
    ) -> Result<StimulationReport, StimulationError> {
        let calibration =
            CalibrationState::load(scope).ok_or(StimulationError::MissingCalibration)?;

        let applied_percent = match validate_percent(perc_calibr_value) {
            Ok(percent) => percent,
            Err(e) => {
                warn!("{}. Stimulating at 0% instead", e);
                0.0
            }
        };

        let scaled = applied_percent * calibration.percent;
        let intensity = (scaled * f64::from(PULSE_VALUE_MAX) / 10000.0)
            .floor()
            .clamp(0.0, f64::from(calibration.raw_intensity)) as u8;
        let current = round2(scaled * MILLIAMP_AT_MAX / 10000.0);

        let timing = PulseTimingState::load(scope);
        let outcome = match timing.elapsed(self.clock.now()) {
            Some(elapsed) if elapsed <= self.pulse_timeout => {
                warn!(
                    "The next pulse came too early ({:.3}s after the last, minimum {:.3}s). Please don't pulse in rapid succession!",
                    elapsed.as_secs_f64(),
                    self.pulse_timeout.as_secs_f64()
                );
                PulseOutcome::Refused { elapsed }
            }
            _ => {
                scope.set(vars::PULSE_VALUE, Value::Int(i64::from(intensity)));
                scope.set(vars::PULSE_MILLIAMP, Value::Float(current));
                scope.set(
                    vars::PULSE_DURATION_MS,
                    Value::Int(i64::from(self.pulse_duration_ms)),
                );
                let outcome = self.issue_pulse(intensity);
                if outcome == PulseOutcome::Delivered {
                    info!(
                        "Tactile stimulator now pulsing at (raw, mA): {}, {:.2}",
                        intensity, current
                    );
                }
                outcome
            }
        };

        let record = match self.holdoff_policy {
            HoldoffPolicy::EveryInvocation => true,
            HoldoffPolicy::DeliveredOnly => outcome.was_attempted(),
        };
        if record {
            PulseTimingState::record(scope, self.clock.now());
        }

        Ok(StimulationReport {
            requested_percent: perc_calibr_value,
            applied_percent,
            raw_intensity: intensity,
            milliamp: current,
            outcome,
        })
    }
}

/// Stimulator units that could be selected right now
pub fn list_stimulators(driver: &dyn DeviceDriver, emulate_with_evt: bool) -> Vec<String> {
    let filter = if emulate_with_evt {
        EVT_EMULATION_FILTER
    } else {
        STIMULATOR_FILTER
    };
    match driver.list_attached(filter) {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Listing stimulators failed: {}", e);
            Vec::new()
        }
    }
}
