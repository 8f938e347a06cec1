//! Allow-list and correct-response compilation
//!
//! Both fields arrive as the semicolon-separated strings experimenters type
//! into the item settings, e.g. `1;2;4`.

use super::decoder::{Correctness, ResponseCode};
use crate::config::ConfigError;
use crate::device::EventMask;
use std::collections::BTreeSet;
use tracing::{debug, error, warn};

/// Item default for the allowed responses field
pub const DEFAULT_ALLOWED_RESPONSES: &str = "1;2";

/// Highest button that still has a line in a 32-bit event mask
pub const MAX_BUTTON: u8 = 32;

/// Non-empty ascending set of 1-based button numbers
///
/// Button `n` owns bit `n - 1` of the event mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedResponseSet {
    buttons: BTreeSet<u8>,
}

impl AllowedResponseSet {
    pub fn new(buttons: impl IntoIterator<Item = u8>) -> Result<Self, ConfigError> {
        let buttons: BTreeSet<u8> = buttons.into_iter().collect();
        if buttons.is_empty() {
            return Err(ConfigError::AllowedResponses(String::new()));
        }
        if let Some(bad) = buttons.iter().find(|b| !(1..=MAX_BUTTON).contains(*b)) {
            return Err(ConfigError::AllowedResponses(bad.to_string()));
        }
        Ok(Self { buttons })
    }

    /// Strict form: every `;`-separated token must be a button number
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        text.split(';')
            .map(|token| {
                parse_button(token).ok_or_else(|| ConfigError::AllowedResponses(text.to_string()))
            })
            .collect::<Result<Vec<u8>, _>>()
            .and_then(|buttons| Self::new(buttons))
    }

    /// Compiles the configured field, degrading instead of failing
    ///
    /// Order of attempts: the `;` list (a bare integer is a one-token list),
    /// the first token that parses, and finally the item default.
    pub fn compile(text: &str) -> Self {
        if let Ok(set) = Self::parse(text) {
            debug!("Allowed responses {:?} -> mask {}", set.buttons, set.mask());
            return set;
        }

        if let Some(button) = text.split(';').find_map(parse_button) {
            warn!(
                "Malformed allowed responses '{}', falling back to button {}",
                text, button
            );
            return Self::single(button);
        }

        error!(
            "Unusable allowed responses '{}', falling back to '{}'",
            text, DEFAULT_ALLOWED_RESPONSES
        );
        Self {
            buttons: BTreeSet::from([1, 2]),
        }
    }

    fn single(button: u8) -> Self {
        Self {
            buttons: BTreeSet::from([button]),
        }
    }

    pub fn contains(&self, button: u8) -> bool {
        self.buttons.contains(&button)
    }

    pub fn buttons(&self) -> impl Iterator<Item = u8> + '_ {
        self.buttons.iter().copied()
    }

    /// Key list handed to the keyboard provider
    pub fn keys(&self) -> Vec<i64> {
        self.buttons().map(i64::from).collect()
    }

    pub fn mask(&self) -> EventMask {
        EventMask::from_bits(
            self.buttons()
                .fold(0u32, |mask, button| mask | (1u32 << (button - 1))),
        )
    }
}

fn parse_button(token: &str) -> Option<u8> {
    token
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|button| (1..=MAX_BUTTON).contains(button))
}

/// Responses counted as correct; empty means correctness is not scored
///
/// The token `none` marks "no response" as correct (no-go trials).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CorrectResponses {
    codes: Vec<ResponseCode>,
}

impl CorrectResponses {
    pub fn parse(text: &str) -> Self {
        let mut codes = Vec::new();
        for token in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("none") {
                codes.push(ResponseCode::NoButton);
                continue;
            }
            match token.parse::<u8>() {
                Ok(button) => codes.push(ResponseCode::Button(button)),
                Err(_) => warn!("Ignoring unparseable correct response '{}'", token),
            }
        }
        Self { codes }
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn classify(&self, response: ResponseCode) -> Correctness {
        if self.codes.is_empty() {
            Correctness::Indeterminate
        } else if self.codes.contains(&response) {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        }
    }
}
