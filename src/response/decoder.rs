//! Raw event → logical button decoding
//!
//! Response boxes report the pressed line as a bit pattern. A single press
//! sets exactly one bit, so the button is the bit position plus one.
//! Simultaneous presses can arrive as one composite code; those decode to
//! the highest set bit, a known limitation of the box protocol that is kept
//! as-is here.

use super::allowed::AllowedResponseSet;
use super::error::ResponseError;
use crate::device::RawValue;
use std::fmt;
use std::time::Instant;

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseSource {
    Device,
    Keyboard,
}

/// Unprocessed input, consumed immediately by [`decode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Device(RawValue),
    Key(i64),
}

impl RawEvent {
    pub fn source(&self) -> ResponseSource {
        match self {
            RawEvent::Device(_) => ResponseSource::Device,
            RawEvent::Key(_) => ResponseSource::Keyboard,
        }
    }
}

/// Logical response: a 1-based button or the explicit "none" code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Button(u8),
    NoButton,
}

impl ResponseCode {
    /// Numeric form used in logs; "none" is -1
    pub fn as_i64(self) -> i64 {
        match self {
            ResponseCode::Button(button) => i64::from(button),
            ResponseCode::NoButton => -1,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Button(button) => write!(f, "{}", button),
            ResponseCode::NoButton => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correctness {
    Correct,
    Incorrect,
    /// No correct response configured
    Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedResponse {
    pub button: ResponseCode,
    /// Time the device or keyboard reported the event
    pub timestamp: Instant,
    pub source: ResponseSource,
}

/// Maps a raw event to its logical response code
///
/// Keyboard keys pass through unchanged. Device values take the first
/// element of a sequence, then `floor(log2(v)) + 1` for positive values;
/// zero, negative and empty values are [`ResponseCode::NoButton`].
pub fn decode_button(raw: &RawEvent) -> ResponseCode {
    match raw {
        RawEvent::Key(key) => u8::try_from(*key)
            .ok()
            .filter(|&button| button >= 1)
            .map_or(ResponseCode::NoButton, ResponseCode::Button),
        RawEvent::Device(value) => {
            let first = match value {
                RawValue::Single(v) => Some(*v),
                RawValue::Sequence(values) => values.first().copied(),
            };
            match first {
                // floor(log2(v)) == index of the highest set bit
                Some(v) if v > 0 => ResponseCode::Button((64 - v.leading_zeros()) as u8),
                _ => ResponseCode::NoButton,
            }
        }
    }
}

/// Decodes and validates one event against the allow-list
///
/// The explicit "none" code is not subject to the allow-list.
pub fn decode(
    raw: RawEvent,
    timestamp: Instant,
    allowed: &AllowedResponseSet,
) -> Result<DecodedResponse, ResponseError> {
    let button = decode_button(&raw);
    if let ResponseCode::Button(b) = button {
        if !allowed.contains(b) {
            return Err(ResponseError::NotAllowed(b));
        }
    }
    Ok(DecodedResponse {
        button,
        timestamp,
        source: raw.source(),
    })
}
