//! Error definitions for the device channel layer

use thiserror::Error;

/// Failures reported by a device driver or an open channel
///
/// None of these are fatal to an experiment step: callers downgrade them to
/// a log entry and fall back to keyboard or dummy operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    /// Select/initialize of a named device failed
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// Line-set, pulse or event wait failed on an open device
    #[error("Device I/O error: {0}")]
    Io(String),

    /// Argument outside the range the device accepts
    #[error("Invalid device argument: {0}")]
    InvalidArgument(String),

    /// Operation on a channel that was already released
    #[error("Channel already closed: {0}")]
    Closed(String),
}
