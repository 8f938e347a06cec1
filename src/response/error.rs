//! Error definitions for response collection

use crate::input::InputError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResponseError {
    /// Decoded button is not in the allowed response set
    #[error("Button {0} is not an allowed response")]
    NotAllowed(u8),

    /// The keyboard provider stopped delivering input
    #[error("Keyboard input failed: {0}")]
    Input(#[from] InputError),
}
