//! GPIO driver for EVT units wired to a Raspberry Pi header
//!
//! Each configured [`GpioUnit`] is one logical device: its output pins carry
//! the parallel line byte (bit 0 = first pin), its input pins are the
//! response buttons (bit 0 = button 1). Pulsing drives the intensity byte on
//! the outputs for the requested duration and then clears them, which is how
//! the stimulator latches a pulse.

use super::{DeviceChannel, DeviceDriver, DeviceError, RawValue, WaitOutcome};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Input polling period while waiting for a button edge
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Pin assignment of one EVT unit
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GpioUnit {
    /// Device id as listed by `list_attached`, e.g. `EventExchanger-RSP-12 #1`
    pub name: String,
    /// BCM pin numbers of the output lines, least significant bit first
    #[serde(default)]
    pub output_pins: Vec<u8>,
    /// BCM pin numbers of the button inputs, button 1 first
    #[serde(default)]
    pub input_pins: Vec<u8>,
}

impl GpioUnit {
    fn pins(&self) -> impl Iterator<Item = u8> + '_ {
        self.output_pins.iter().chain(self.input_pins.iter()).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GpioDriver {
    units: Vec<GpioUnit>,
}

impl GpioDriver {
    pub fn new(units: Vec<GpioUnit>) -> Self {
        Self { units }
    }

    fn unit(&self, device_id: &str) -> Result<&GpioUnit, DeviceError> {
        self.units
            .iter()
            .find(|unit| unit.name == device_id)
            .ok_or_else(|| DeviceError::Unavailable(format!("no GPIO unit named '{}'", device_id)))
    }
}

impl DeviceDriver for GpioDriver {
    fn open(&self, device_id: &str) -> Result<Box<dyn DeviceChannel>, DeviceError> {
        let unit = self.unit(device_id)?;
        let gpio = Gpio::new().map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        let outputs = unit
            .output_pins
            .iter()
            .map(|&pin| gpio.get(pin).map(|p| p.into_output_low()))
            .collect::<Result<Vec<OutputPin>, _>>()
            .map_err(|e| DeviceError::Unavailable(format!("{}: {}", device_id, e)))?;

        let inputs = unit
            .input_pins
            .iter()
            .map(|&pin| gpio.get(pin).map(|p| p.into_input_pulldown()))
            .collect::<Result<Vec<InputPin>, _>>()
            .map_err(|e| DeviceError::Unavailable(format!("{}: {}", device_id, e)))?;

        info!(
            "Opened GPIO unit '{}' ({} outputs, {} inputs)",
            device_id,
            outputs.len(),
            inputs.len()
        );

        Ok(Box::new(GpioChannel {
            name: unit.name.clone(),
            outputs,
            inputs,
        }))
    }

    fn list_attached(&self, filter: &str) -> Result<Vec<String>, DeviceError> {
        let gpio = match Gpio::new() {
            Ok(gpio) => gpio,
            Err(e) => {
                debug!("GPIO not available on this host: {}", e);
                return Ok(Vec::new());
            }
        };

        // Probing acquires each pin and releases it again when dropped
        let attached = self
            .units
            .iter()
            .filter(|unit| unit.name.contains(filter))
            .filter(|unit| unit.pins().all(|pin| gpio.get(pin).is_ok()))
            .map(|unit| unit.name.clone())
            .collect();
        Ok(attached)
    }
}

struct GpioChannel {
    name: String,
    outputs: Vec<OutputPin>,
    inputs: Vec<InputPin>,
}

impl GpioChannel {
    fn read_inputs(&self) -> u32 {
        self.inputs
            .iter()
            .enumerate()
            .take(32)
            .filter(|(_, pin)| pin.is_high())
            .fold(0, |acc, (bit, _)| acc | (1u32 << bit))
    }
}

impl DeviceChannel for GpioChannel {
    fn set_lines(&mut self, lines: u32) -> Result<(), DeviceError> {
        for (bit, pin) in self.outputs.iter_mut().enumerate().take(32) {
            if lines & (1u32 << bit) != 0 {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        Ok(())
    }

    fn pulse_lines(&mut self, value: u8, duration_ms: u16) -> Result<(), DeviceError> {
        if self.outputs.len() < 8 {
            return Err(DeviceError::Io(format!(
                "'{}' has {} output lines, pulsing needs 8",
                self.name,
                self.outputs.len()
            )));
        }
        self.set_lines(u32::from(value))?;
        std::thread::sleep(Duration::from_millis(u64::from(duration_ms)));
        self.set_lines(0)
    }

    fn wait_for_event(
        &mut self,
        mask: u32,
        timeout_code: i64,
    ) -> Result<WaitOutcome, DeviceError> {
        if self.inputs.is_empty() {
            return Err(DeviceError::Io(format!("'{}' has no input lines", self.name)));
        }

        let deadline = u64::try_from(timeout_code)
            .ok()
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        // Only rising edges count; buttons already held at entry are ignored
        let mut previous = self.read_inputs();
        loop {
            let current = self.read_inputs();
            let pressed = current & !previous & mask;
            if pressed != 0 {
                return Ok(WaitOutcome::Event {
                    value: RawValue::Single(i64::from(pressed)),
                    timestamp: Instant::now(),
                });
            }
            previous = current;

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(WaitOutcome::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.set_lines(0) {
            warn!("Failed to clear lines on '{}': {}", self.name, e);
        }
        // Dropping the pins hands them back to the GPIO subsystem
        self.outputs.clear();
        self.inputs.clear();
        debug!("Closed GPIO unit '{}'", self.name);
    }
}
