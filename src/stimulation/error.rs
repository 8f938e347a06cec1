//! Error definitions for the stimulation controller

use crate::input::InputError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StimulationError {
    /// Stimulate ran before any calibration was published in this scope
    #[error(
        "No calibration has been done! A calibrate step must precede the stimulate step in the same experiment"
    )]
    MissingCalibration,

    /// The pointer provider stopped delivering input during calibration
    #[error("Calibration input failed: {0}")]
    Input(#[from] InputError),
}
