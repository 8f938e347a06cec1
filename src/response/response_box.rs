//! Response collection item for RSP-12 boxes with keyboard fallback
//!
//! Prepared once per experiment step from its settings: the backend is
//! selected (falling back to the keyboard if the box cannot be opened), the
//! allow-list is compiled into an event mask and the timeout is fixed.
//! [`ResponseBox::collect`] then blocks for one response.

use super::allowed::{AllowedResponseSet, CorrectResponses};
use super::decoder::{decode, Correctness, DecodedResponse, RawEvent, ResponseCode};
use super::error::ResponseError;
use super::log::{ResponseRecord, ResponseSink};
use crate::clock::Clock;
use crate::config::ResponseBoxConfig;
use crate::device::{Backend, DeviceDriver, DeviceError, EventMask, Fallback, WaitOutcome, WaitTimeout};
use crate::input::KeyboardInput;
use chrono::Local;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name filter of response boxes in `list_attached`
pub const RESPONSE_BOX_FILTER: &str = "EventExchanger-RSP-12";

/// Result of one blocking response wait
///
/// A timeout is its own variant and is never folded into a decoded
/// "none" press.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseOutcome {
    Response(DecodedResponse),
    TimedOut,
}

impl ResponseOutcome {
    /// Code recorded for this outcome; a timeout records as "none"
    pub fn code(&self) -> ResponseCode {
        match self {
            ResponseOutcome::Response(response) => response.button,
            ResponseOutcome::TimedOut => ResponseCode::NoButton,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ResponseOutcome::TimedOut)
    }
}

/// Everything one `collect` call produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectedResponse {
    pub outcome: ResponseOutcome,
    pub correct: Correctness,
    pub response_time: Duration,
}

#[derive(Debug)]
pub struct ResponseBox {
    name: String,
    backend: Backend,
    allowed: AllowedResponseSet,
    correct: CorrectResponses,
    timeout: WaitTimeout,
    feedback: bool,
}

impl ResponseBox {
    pub fn prepare(driver: &dyn DeviceDriver, config: &ResponseBoxConfig) -> Self {
        info!("Preparing response item '{}'", config.name);

        let backend = Backend::select(driver, &config.device, Fallback::Keyboard);
        let allowed = AllowedResponseSet::compile(&config.allowed_responses.to_string());
        let timeout = config.timeout.as_wait_timeout();

        debug!(
            "Response item '{}': backend={}, mask={}, timeout={}",
            config.name,
            backend.label(),
            allowed.mask(),
            timeout
        );

        Self {
            name: config.name.clone(),
            backend,
            allowed,
            correct: CorrectResponses::parse(&config.correct_response),
            timeout,
            feedback: config.process_feedback,
        }
    }

    /// Switches to another device, releasing the current one first
    pub fn reselect(&mut self, driver: &dyn DeviceDriver, device_id: &str) {
        let previous = std::mem::replace(&mut self.backend, Backend::KeyboardBacked);
        debug!("Releasing '{}' before selecting '{}'", previous.label(), device_id);
        drop(previous);
        self.backend = Backend::select(driver, device_id, Fallback::Keyboard);
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn allowed(&self) -> &AllowedResponseSet {
        &self.allowed
    }

    pub fn mask(&self) -> EventMask {
        self.allowed.mask()
    }

    pub fn timeout(&self) -> WaitTimeout {
        self.timeout
    }

    /// Blocks for one response and forwards it to `sink`
    ///
    /// Events outside the allow-list are logged and skipped; the wait goes
    /// on for whatever is left of the timeout. A device that fails mid-wait
    /// is dropped in favour of the keyboard.
    pub fn collect(
        &mut self,
        keyboard: &mut dyn KeyboardInput,
        clock: &dyn Clock,
        sink: &mut dyn ResponseSink,
    ) -> Result<CollectedResponse, ResponseError> {
        let onset = clock.now();
        let deadline = self.timeout.as_duration().map(|d| onset + d);

        let mut retrying = false;
        let outcome = loop {
            let remaining = match deadline {
                None => WaitTimeout::Infinite,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(clock.now());
                    if retrying && left.is_zero() {
                        break ResponseOutcome::TimedOut;
                    }
                    WaitTimeout::Millis(left.as_millis() as u64)
                }
            };
            retrying = true;

            let (raw, timestamp) = match self.next_raw_event(keyboard, remaining) {
                Ok(Some(event)) => event,
                Ok(None) => break ResponseOutcome::TimedOut,
                Err(RawWaitError::Device(e)) => {
                    warn!(
                        "Response box '{}' failed ({}). Switching to keyboard.",
                        self.backend.label(),
                        e
                    );
                    self.backend = Backend::KeyboardBacked;
                    continue;
                }
                Err(RawWaitError::Input(e)) => return Err(e.into()),
            };

            match decode(raw, timestamp, &self.allowed) {
                Ok(response) => break ResponseOutcome::Response(response),
                Err(e) => {
                    warn!("Ignoring response on '{}': {}", self.name, e);
                    continue;
                }
            }
        };

        let response_time = match outcome {
            ResponseOutcome::Response(response) => response.timestamp.saturating_duration_since(onset),
            ResponseOutcome::TimedOut => clock.now().saturating_duration_since(onset),
        };
        let correct = self.correct.classify(outcome.code());

        sink.add(ResponseRecord {
            response: outcome.code(),
            response_time,
            correct,
            item: self.name.clone(),
            feedback: self.feedback,
            logged_at: Local::now(),
        });

        Ok(CollectedResponse {
            outcome,
            correct,
            response_time,
        })
    }

    fn next_raw_event(
        &mut self,
        keyboard: &mut dyn KeyboardInput,
        timeout: WaitTimeout,
    ) -> Result<Option<(RawEvent, Instant)>, RawWaitError> {
        match &mut self.backend {
            Backend::DeviceBacked(channel) => {
                match channel
                    .wait_for_event(self.allowed.mask(), timeout)
                    .map_err(RawWaitError::Device)?
                {
                    WaitOutcome::Event { value, timestamp } => {
                        Ok(Some((RawEvent::Device(value), timestamp)))
                    }
                    WaitOutcome::TimedOut => Ok(None),
                }
            }
            Backend::KeyboardBacked | Backend::Dummy => {
                let press = keyboard
                    .get_key(&self.allowed.keys(), timeout.as_duration())
                    .map_err(RawWaitError::Input)?;
                Ok(press.map(|p| (RawEvent::Key(p.key), p.timestamp)))
            }
        }
    }
}

enum RawWaitError {
    Device(DeviceError),
    Input(crate::input::InputError),
}

/// Response boxes that could be selected right now
pub fn list_response_boxes(driver: &dyn DeviceDriver) -> Vec<String> {
    match driver.list_attached(RESPONSE_BOX_FILTER) {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Listing response boxes failed: {}", e);
            Vec::new()
        }
    }
}
