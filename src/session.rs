//! Ordered experiment steps against one experiment scope
//!
//! Each step prepares its own item the way the experiment runner does: the
//! device is selected at the start of the step and released at its end, so
//! two steps never hold the same unit. Calibration and pulse timing pass
//! between steps only through the scope.

use crate::clock::Clock;
use crate::config::{SessionConfig, StepConfig};
use crate::device::DeviceDriver;
use crate::input::{KeyboardInput, PointerInput};
use crate::response::{CollectedResponse, ResponseBox, ResponseError, ResponseSink};
use crate::scope::VariableStore;
use crate::stimulation::{
    CalibrationDisplay, CalibrationState, StimulationError, StimulationReport, TactileStimulator,
};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("Step {step} (stimulation) failed: {source}")]
    Stimulation {
        step: usize,
        #[source]
        source: StimulationError,
    },

    #[error("Step {step} (response) failed: {source}")]
    Response {
        step: usize,
        #[source]
        source: ResponseError,
    },
}

/// Human-facing collaborators the steps block on
pub struct Participant<'a> {
    pub keyboard: &'a mut dyn KeyboardInput,
    pub pointer: &'a mut dyn PointerInput,
    pub display: &'a mut dyn CalibrationDisplay,
    pub responses: &'a mut dyn ResponseSink,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Calibrated(CalibrationState),
    Stimulated(StimulationReport),
    Responded(CollectedResponse),
}

pub struct Session<'a, C> {
    config: &'a SessionConfig,
    driver: &'a dyn DeviceDriver,
    clock: C,
}

impl<'a, C: Clock + Clone + 'static> Session<'a, C> {
    pub fn new(config: &'a SessionConfig, driver: &'a dyn DeviceDriver, clock: C) -> Self {
        Self {
            config,
            driver,
            clock,
        }
    }

    /// Runs all steps in order, stopping at the first fatal error
    pub fn run(
        &self,
        scope: &mut dyn VariableStore,
        participant: &mut Participant<'_>,
    ) -> Result<Vec<StepOutcome>, SessionError> {
        info!(
            "Running session '{}' ({} steps)",
            self.config.experiment,
            self.config.steps.len()
        );

        let mut outcomes = Vec::with_capacity(self.config.steps.len());
        for (step, step_config) in self.config.steps.iter().enumerate() {
            info!("Step {}: {:?}", step, step_config);
            let outcome = self.run_step(step, step_config, scope, participant);
            match outcome {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Session '{}' stopped: {}", self.config.experiment, e);
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    fn run_step(
        &self,
        step: usize,
        step_config: &StepConfig,
        scope: &mut dyn VariableStore,
        participant: &mut Participant<'_>,
    ) -> Result<StepOutcome, SessionError> {
        let stimulation_error = |source| SessionError::Stimulation { step, source };

        match step_config {
            StepConfig::Calibrate => {
                TactileStimulator::prepare(
                    self.driver,
                    &self.config.stimulator,
                    Box::new(self.clock.clone()),
                )
                .calibrate(scope, participant.pointer, participant.display)
                .map_err(stimulation_error)?;

                CalibrationState::load(scope)
                    .map(StepOutcome::Calibrated)
                    .ok_or(SessionError::Stimulation {
                        step,
                        source: StimulationError::MissingCalibration,
                    })
            }
            StepConfig::Stimulate { perc_calibr_value } => {
                let mut stimulator = TactileStimulator::prepare(
                    self.driver,
                    &self.config.stimulator,
                    Box::new(self.clock.clone()),
                )
                .resume(scope)
                .map_err(stimulation_error)?;

                stimulator
                    .stimulate(scope, *perc_calibr_value)
                    .map(StepOutcome::Stimulated)
                    .map_err(stimulation_error)
            }
            StepConfig::Response { correct_response } => {
                let mut item_config = self.config.response_box.clone();
                if let Some(correct) = correct_response {
                    item_config.correct_response = correct.clone();
                }

                ResponseBox::prepare(self.driver, &item_config)
                    .collect(participant.keyboard, &self.clock, participant.responses)
                    .map(StepOutcome::Responded)
                    .map_err(|source| SessionError::Response { step, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{ResponseBoxConfig, StimulatorConfig};
    use crate::device::mock::MockDriver;
    use crate::input::scripted::{ScriptedKeyboard, ScriptedPointer};
    use crate::input::Position;
    use crate::response::{Correctness, ResponseCode, ResponseLog};
    use crate::scope::ExperimentScope;
    use crate::stimulation::{CalibrationLayout, LogDisplay, PulseOutcome};
    use std::time::Duration;

    fn session_config(steps: Vec<StepConfig>) -> SessionConfig {
        SessionConfig {
            experiment: "test".into(),
            response_box: ResponseBoxConfig {
                device: "Keyboard".into(),
                correct_response: "1".into(),
                ..ResponseBoxConfig::default()
            },
            stimulator: StimulatorConfig {
                device: "SHOCKER #1".into(),
                canvas_width: 1100.0,
                canvas_height: 800.0,
                ..StimulatorConfig::default()
            },
            gpio_units: Vec::new(),
            steps,
        }
    }

    #[test]
    fn test_calibrate_stimulate_respond() {
        let config = session_config(vec![
            StepConfig::Calibrate,
            StepConfig::Stimulate {
                perc_calibr_value: 50.0,
            },
            StepConfig::Stimulate {
                perc_calibr_value: 50.0,
            },
            StepConfig::Response {
                correct_response: Some("2".into()),
            },
        ]);
        let driver = MockDriver::with_attached(&["SHOCKER #1"]);
        let clock = ManualClock::new();
        let layout = CalibrationLayout::new(1100.0, 800.0);

        let mut keyboard = ScriptedKeyboard::new(vec![Some(2)]);
        let mut pointer = ScriptedPointer::new(vec![
            Position::new(layout.x_for_percent(80.0), 14.0),
            layout.ok_box().center(),
        ]);
        let mut display = LogDisplay;
        let mut log = ResponseLog::new();
        let mut scope = ExperimentScope::new("test");

        let outcomes = {
            let mut participant = Participant {
                keyboard: &mut keyboard,
                pointer: &mut pointer,
                display: &mut display,
                responses: &mut log,
            };
            Session::new(&config, &driver, clock.clone())
                .run(&mut scope, &mut participant)
                .unwrap()
        };

        assert_eq!(outcomes.len(), 4);
        match &outcomes[0] {
            StepOutcome::Calibrated(calibration) => assert_eq!(calibration.raw_intensity, 203),
            other => panic!("unexpected {:?}", other),
        }
        match &outcomes[1] {
            StepOutcome::Stimulated(report) => {
                assert_eq!(report.raw_intensity, 101);
                assert_eq!(report.outcome, PulseOutcome::Delivered);
            }
            other => panic!("unexpected {:?}", other),
        }
        // No time passed between the two stimulate steps
        match &outcomes[2] {
            StepOutcome::Stimulated(report) => {
                assert!(matches!(report.outcome, PulseOutcome::Refused { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        match &outcomes[3] {
            StepOutcome::Responded(collected) => {
                assert_eq!(collected.outcome.code(), ResponseCode::Button(2));
                assert_eq!(collected.correct, Correctness::Correct);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(driver.pulses(), vec![(101, 150)]);
        assert_eq!(log.records().len(), 1);
        assert_eq!(clock.slept(), Duration::ZERO);
    }

    #[test]
    fn test_stimulate_before_calibrate_stops_session() {
        let config = session_config(vec![
            StepConfig::Stimulate {
                perc_calibr_value: 50.0,
            },
            StepConfig::Response {
                correct_response: None,
            },
        ]);
        let driver = MockDriver::with_attached(&["SHOCKER #1"]);
        let mut keyboard = ScriptedKeyboard::new(vec![Some(1)]);
        let mut pointer = ScriptedPointer::new(Vec::new());
        let mut display = LogDisplay;
        let mut log = ResponseLog::new();
        let mut scope = ExperimentScope::new("test");

        let mut participant = Participant {
            keyboard: &mut keyboard,
            pointer: &mut pointer,
            display: &mut display,
            responses: &mut log,
        };
        let result = Session::new(&config, &driver, ManualClock::new()).run(&mut scope, &mut participant);

        assert_eq!(
            result,
            Err(SessionError::Stimulation {
                step: 0,
                source: StimulationError::MissingCalibration
            })
        );
        assert!(driver.pulses().is_empty());
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_response_input_loss_is_reported() {
        let config = session_config(vec![StepConfig::Response {
            correct_response: None,
        }]);
        let driver = MockDriver::default();
        let mut keyboard = ScriptedKeyboard::new(Vec::new());
        let mut pointer = ScriptedPointer::new(Vec::new());
        let mut display = LogDisplay;
        let mut log = ResponseLog::new();
        let mut scope = ExperimentScope::new("test");

        let mut participant = Participant {
            keyboard: &mut keyboard,
            pointer: &mut pointer,
            display: &mut display,
            responses: &mut log,
        };
        let result = Session::new(&config, &driver, ManualClock::new()).run(&mut scope, &mut participant);
        assert!(matches!(result, Err(SessionError::Response { step: 0, .. })));
    }
}
