//! Line-based stdin collaborators for running a session from a terminal
//!
//! Stdin is read on an async task and handed line by line to the blocking
//! session thread. As keyboard, a line with a number is a key press. As
//! pointer, a number selects that slider percentage and `test` / `ok` click
//! the calibration buttons.

use crate::input::{Click, InputError, KeyPress, KeyboardInput, PointerInput, Position};
use crate::stimulation::CalibrationLayout;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

struct LineSource {
    lines: mpsc::Receiver<String>,
    handle: Handle,
}

impl LineSource {
    /// Next line, or `Ok(None)` when `timeout` passes first
    fn next_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>, InputError> {
        let lines = &mut self.lines;
        // The timer must be created inside the runtime, not on the caller's thread
        let line = match self.handle.block_on(async move {
            match timeout {
                None => Ok(lines.recv().await),
                Some(timeout) => tokio::time::timeout(timeout, lines.recv()).await,
            }
        }) {
            Ok(line) => line,
            Err(_) => return Ok(None),
        };
        line.map(Some)
            .ok_or_else(|| InputError::Closed("stdin".to_string()))
    }
}

/// Shared stdin line feed; hands out the keyboard and pointer views
#[derive(Clone)]
pub struct Terminal {
    source: Arc<Mutex<LineSource>>,
}

impl Terminal {
    /// Starts the stdin reader on `handle`
    pub fn spawn(handle: Handle) -> Self {
        let (tx, rx) = mpsc::channel(64);
        handle.spawn(read_stdin(tx));
        Self::from_lines(rx, handle)
    }

    pub fn from_lines(lines: mpsc::Receiver<String>, handle: Handle) -> Self {
        Self {
            source: Arc::new(Mutex::new(LineSource { lines, handle })),
        }
    }

    pub fn keyboard(&self) -> TerminalKeyboard {
        TerminalKeyboard {
            terminal: self.clone(),
        }
    }

    pub fn pointer(&self, layout: CalibrationLayout) -> TerminalPointer {
        TerminalPointer {
            terminal: self.clone(),
            layout,
            position: Position::default(),
        }
    }

    fn next_line(&self, timeout: Option<Duration>) -> Result<Option<String>, InputError> {
        let mut source = self
            .source
            .lock()
            .map_err(|_| InputError::Closed("stdin reader lock poisoned".to_string()))?;
        source.next_line(timeout)
    }
}

pub struct TerminalKeyboard {
    terminal: Terminal,
}

pub struct TerminalPointer {
    terminal: Terminal,
    layout: CalibrationLayout,
    position: Position,
}

async fn read_stdin(tx: mpsc::Sender<String>) {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if tx.send(line).await.is_err() {
                    debug!("Terminal input no longer needed");
                    break;
                }
            }
            Err(e) => {
                warn!("Reading stdin failed: {}", e);
                break;
            }
        }
    }
    debug!("Stdin reader finished");
}

/// A key line is a bare integer
pub fn parse_key(line: &str) -> Option<i64> {
    line.trim().parse().ok()
}

/// Canvas position a pointer command clicks at
pub fn parse_pointer_command(line: &str, layout: &CalibrationLayout) -> Option<Position> {
    let command = line.trim();
    if command.eq_ignore_ascii_case("test") {
        return Some(layout.test_box().center());
    }
    if command.eq_ignore_ascii_case("ok") {
        return Some(layout.ok_box().center());
    }
    let percent: f64 = command.trim_end_matches('%').trim().parse().ok()?;
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }
    let slider = layout.slider_box();
    Some(Position::new(
        layout.x_for_percent(percent),
        slider.y + slider.h / 2.0,
    ))
}

impl KeyboardInput for TerminalKeyboard {
    fn get_key(
        &mut self,
        allowed_keys: &[i64],
        timeout: Option<Duration>,
    ) -> Result<Option<KeyPress>, InputError> {
        info!("Press one of {:?} and Enter", allowed_keys);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let Some(line) = self.terminal.next_line(remaining)? else {
                return Ok(None);
            };
            let timestamp = Instant::now();

            match parse_key(&line) {
                Some(key) if allowed_keys.contains(&key) => {
                    return Ok(Some(KeyPress { key, timestamp }))
                }
                _ => debug!("Ignoring key input '{}'", line.trim()),
            }
        }
    }
}

impl PointerInput for TerminalPointer {
    fn get_click(&mut self) -> Result<Click, InputError> {
        info!("Enter a level 0-100, 'test' or 'ok'");
        loop {
            let Some(line) = self.terminal.next_line(None)? else {
                continue;
            };
            match parse_pointer_command(&line, &self.layout) {
                Some(position) => {
                    self.position = position;
                    return Ok(Click {
                        button: 1,
                        position,
                        timestamp: Instant::now(),
                    });
                }
                None => warn!("Unknown calibration command '{}'", line.trim()),
            }
        }
    }

    fn get_pos(&mut self) -> (Position, Instant) {
        (self.position, Instant::now())
    }
}
