//! Recording driver used by the unit tests

use super::{DeviceChannel, DeviceDriver, DeviceError, WaitOutcome};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(String),
    SetLines(u32),
    Pulse { intensity: u8, duration_ms: u16 },
    Wait { mask: u32, timeout_code: i64 },
    Close(String),
}

#[derive(Debug, Default)]
struct MockState {
    attached: Vec<String>,
    calls: Vec<Call>,
    events: VecDeque<WaitOutcome>,
    fail_io: bool,
}

/// Driver whose channels log every call into shared state
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn with_attached(names: &[&str]) -> Self {
        let driver = Self::default();
        driver.state.lock().unwrap().attached = names.iter().map(|n| n.to_string()).collect();
        driver
    }

    /// Queues the outcome of the next `wait_for_event`; an empty queue times out
    pub fn push_event(&self, outcome: WaitOutcome) {
        self.state.lock().unwrap().events.push_back(outcome);
    }

    /// Makes every later line-set, pulse and wait fail
    pub fn fail_io(&self) {
        self.state.lock().unwrap().fail_io = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pulses(&self) -> Vec<(u8, u16)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Pulse {
                    intensity,
                    duration_ms,
                } => Some((intensity, duration_ms)),
                _ => None,
            })
            .collect()
    }
}

impl DeviceDriver for MockDriver {
    fn open(&self, device_id: &str) -> Result<Box<dyn DeviceChannel>, DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Open(device_id.to_string()));
        if !state.attached.iter().any(|name| name == device_id) {
            return Err(DeviceError::Unavailable(device_id.to_string()));
        }
        Ok(Box::new(MockChannel {
            name: device_id.to_string(),
            state: self.state.clone(),
        }))
    }

    fn list_attached(&self, filter: &str) -> Result<Vec<String>, DeviceError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .attached
            .iter()
            .filter(|name| name.contains(filter))
            .cloned()
            .collect())
    }
}

struct MockChannel {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl DeviceChannel for MockChannel {
    fn set_lines(&mut self, lines: u32) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_io {
            return Err(DeviceError::Io("set_lines failed".into()));
        }
        state.calls.push(Call::SetLines(lines));
        Ok(())
    }

    fn pulse_lines(&mut self, value: u8, duration_ms: u16) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_io {
            return Err(DeviceError::Io("pulse failed".into()));
        }
        state.calls.push(Call::Pulse {
            intensity: value,
            duration_ms,
        });
        Ok(())
    }

    fn wait_for_event(
        &mut self,
        mask: u32,
        timeout_code: i64,
    ) -> Result<WaitOutcome, DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_io {
            return Err(DeviceError::Io("wait failed".into()));
        }
        state.calls.push(Call::Wait { mask, timeout_code });
        Ok(state.events.pop_front().unwrap_or(WaitOutcome::TimedOut))
    }

    fn close(&mut self) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::Close(self.name.clone()));
    }
}
