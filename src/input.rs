//! Human input collaborators: keyboard keys and pointer clicks
//!
//! The core only consumes these; the binary wires them to the terminal
//! (see `terminal`), a GUI runner would wire them to its own event loop.

use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    /// The input source went away (stdin closed, window destroyed)
    #[error("Input source closed: {0}")]
    Closed(String),
}

/// One accepted key press
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPress {
    /// Numeric key code; digit keys map to their value
    pub key: i64,
    pub timestamp: Instant,
}

/// Keyboard provider used when no response box is selected
pub trait KeyboardInput {
    /// Blocks until one of `allowed_keys` is pressed or `timeout` elapses
    ///
    /// `None` as timeout waits without deadline. `Ok(None)` means timeout.
    fn get_key(
        &mut self,
        allowed_keys: &[i64],
        timeout: Option<Duration>,
    ) -> Result<Option<KeyPress>, InputError>;
}

/// Pointer position in canvas coordinates, origin at the center
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    pub button: u8,
    pub position: Position,
    pub timestamp: Instant,
}

/// Pointer provider for the calibration slider
pub trait PointerInput {
    /// Blocks until a mouse button is clicked
    fn get_click(&mut self) -> Result<Click, InputError>;

    /// Current pointer position and the time it was sampled
    fn get_pos(&mut self) -> (Position, Instant);
}

#[cfg(test)]
pub mod scripted {
    //! Input providers that replay a fixed script

    use super::*;
    use std::collections::VecDeque;

    /// Replays key presses; `None` entries time out. Errors once exhausted.
    #[derive(Debug, Default)]
    pub struct ScriptedKeyboard {
        presses: VecDeque<Option<i64>>,
        pub seen_allowed: Vec<Vec<i64>>,
        pub seen_timeouts: Vec<Option<Duration>>,
    }

    impl ScriptedKeyboard {
        pub fn new(presses: Vec<Option<i64>>) -> Self {
            Self {
                presses: presses.into(),
                ..Self::default()
            }
        }
    }

    impl KeyboardInput for ScriptedKeyboard {
        fn get_key(
            &mut self,
            allowed_keys: &[i64],
            timeout: Option<Duration>,
        ) -> Result<Option<KeyPress>, InputError> {
            self.seen_allowed.push(allowed_keys.to_vec());
            self.seen_timeouts.push(timeout);
            match self.presses.pop_front() {
                Some(Some(key)) => Ok(Some(KeyPress {
                    key,
                    timestamp: Instant::now(),
                })),
                Some(None) => Ok(None),
                None => Err(InputError::Closed("script exhausted".into())),
            }
        }
    }

    /// Clicks at each scripted position in turn. Errors once exhausted.
    #[derive(Debug, Default)]
    pub struct ScriptedPointer {
        clicks: VecDeque<Position>,
        current: Position,
    }

    impl ScriptedPointer {
        pub fn new(clicks: Vec<Position>) -> Self {
            Self {
                clicks: clicks.into(),
                current: Position::default(),
            }
        }
    }

    impl PointerInput for ScriptedPointer {
        fn get_click(&mut self) -> Result<Click, InputError> {
            let position = self
                .clicks
                .pop_front()
                .ok_or_else(|| InputError::Closed("no more clicks".into()))?;
            self.current = position;
            Ok(Click {
                button: 1,
                position,
                timestamp: Instant::now(),
            })
        }

        fn get_pos(&mut self) -> (Position, Instant) {
            (self.current, Instant::now())
        }
    }
}
