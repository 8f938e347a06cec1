//! Device channel layer for EVT response boxes and stimulators
//!
//! Gives the response decoder and the stimulation controller one uniform,
//! fail-safe view of a physical unit. Drivers hand out raw
//! [`DeviceChannel`]s; [`Channel`] wraps one with argument validation and
//! scoped release, and [`Backend`] is the capability variant each subsystem
//! selects once at setup.
//!
//! # Fallback
//!
//! ```text
//! device id ──► sentinel? ──yes──► Keyboard / Dummy
//!                  │ no
//!                  ▼
//!            Channel::open ──err──► warn! ──► Keyboard / Dummy
//!                  │ ok
//!                  ▼
//!            DeviceBacked(channel)
//! ```
//!
//! A failed open is never retried and never propagates as fatal.

pub mod error;
pub mod gpio;
pub mod null;

#[cfg(test)]
pub mod mock;

pub use error::DeviceError;
pub use gpio::{GpioDriver, GpioUnit};
pub use null::NullDriver;

use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Highest raw intensity the stimulator hardware accepts
pub const PULSE_VALUE_MAX: u8 = 254;

/// Accepted pulse duration range in milliseconds
pub const PULSE_DURATION_RANGE_MS: std::ops::RangeInclusive<u16> = 1..=2000;

/// Device id that selects the keyboard provider for responses
pub const KEYBOARD_DEVICE: &str = "Keyboard";

/// Device id that selects dummy mode for stimulation
pub const DUMMY_DEVICE: &str = "DUMMY";

/// One bit per physical input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether the line of 1-based `button` is part of the mask
    pub fn contains_button(self, button: u8) -> bool {
        (1..=32).contains(&button) && self.0 & (1u32 << (button - 1)) != 0
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

/// How long a response wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitTimeout {
    #[default]
    Infinite,
    Millis(u64),
}

impl WaitTimeout {
    /// Wire encoding used by the EVT driver: `-1` means no deadline
    pub fn device_code(self) -> i64 {
        match self {
            WaitTimeout::Infinite => -1,
            WaitTimeout::Millis(ms) => i64::try_from(ms).unwrap_or(i64::MAX),
        }
    }

    /// Deadline form handed to the keyboard provider
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            WaitTimeout::Infinite => None,
            WaitTimeout::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

impl fmt::Display for WaitTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitTimeout::Infinite => write!(f, "infinite"),
            WaitTimeout::Millis(ms) => write!(f, "{}ms", ms),
        }
    }
}

/// Value a device reports for one digital event
///
/// Some hardware reports a burst of codes at once; the decoder only looks at
/// the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Single(i64),
    Sequence(Vec<i64>),
}

/// Result of a blocking event wait
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Event { value: RawValue, timestamp: Instant },
    TimedOut,
}

/// Driver collaborator: selects devices and lists what is attached
pub trait DeviceDriver: Send {
    /// Selects the named device and hands out its raw channel
    fn open(&self, device_id: &str) -> Result<Box<dyn DeviceChannel>, DeviceError>;

    /// Names of currently attached devices containing `filter`
    ///
    /// Re-queried on every call; nothing is cached.
    fn list_attached(&self, filter: &str) -> Result<Vec<String>, DeviceError>;
}

/// Raw per-device operations as the driver exposes them
pub trait DeviceChannel: Send {
    fn set_lines(&mut self, lines: u32) -> Result<(), DeviceError>;

    /// Drives `value` onto the output lines for `duration_ms`, then clears them
    fn pulse_lines(&mut self, value: u8, duration_ms: u16) -> Result<(), DeviceError>;

    /// Blocks until a line in `mask` fires; `timeout_code < 0` waits forever
    fn wait_for_event(&mut self, mask: u32, timeout_code: i64)
        -> Result<WaitOutcome, DeviceError>;

    fn close(&mut self);
}

/// Exclusively owned handle to one selected device
///
/// Lines are zeroed right after selection. The handle closes itself when
/// dropped, so every exit path releases the device.
pub struct Channel {
    device_id: String,
    inner: Option<Box<dyn DeviceChannel>>,
}

impl Channel {
    /// Selects `device_id` and resets its output lines
    pub fn open(driver: &dyn DeviceDriver, device_id: &str) -> Result<Self, DeviceError> {
        debug!("Selecting device: {}", device_id);
        let inner = driver.open(device_id)?;
        let mut channel = Self {
            device_id: device_id.to_string(),
            inner: Some(inner),
        };
        // A failed reset drops `channel`, which closes the half-open device
        channel.reset_lines()?;
        info!("Connected and reset device: {}", device_id);
        Ok(channel)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn raw(&mut self) -> Result<&mut dyn DeviceChannel, DeviceError> {
        match self.inner.as_mut() {
            Some(inner) => Ok(inner.as_mut()),
            None => Err(DeviceError::Closed(self.device_id.clone())),
        }
    }

    pub fn reset_lines(&mut self) -> Result<(), DeviceError> {
        self.set_lines(0)
    }

    pub fn set_lines(&mut self, lines: u32) -> Result<(), DeviceError> {
        self.raw()?.set_lines(lines)
    }

    /// Issues one pulse after checking intensity and duration bounds
    pub fn pulse(&mut self, intensity: u8, duration_ms: u16) -> Result<(), DeviceError> {
        if intensity > PULSE_VALUE_MAX {
            return Err(DeviceError::InvalidArgument(format!(
                "Pulse intensity {} exceeds {}",
                intensity, PULSE_VALUE_MAX
            )));
        }
        if !PULSE_DURATION_RANGE_MS.contains(&duration_ms) {
            return Err(DeviceError::InvalidArgument(format!(
                "Pulse duration {}ms outside {:?}",
                duration_ms, PULSE_DURATION_RANGE_MS
            )));
        }
        debug!(
            "Pulsing {} at {} for {}ms",
            self.device_id, intensity, duration_ms
        );
        self.raw()?.pulse_lines(intensity, duration_ms)
    }

    pub fn wait_for_event(
        &mut self,
        mask: EventMask,
        timeout: WaitTimeout,
    ) -> Result<WaitOutcome, DeviceError> {
        debug!(
            "Waiting on {} for mask {} (timeout {})",
            self.device_id, mask, timeout
        );
        self.raw()?.wait_for_event(mask.bits(), timeout.device_code())
    }

    /// Releases the device; calling it again is a no-op
    pub fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
            debug!("Released device: {}", self.device_id);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("device_id", &self.device_id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Degraded participant used when no device is selected or it fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Keyboard,
    Dummy,
}

/// Capability variant chosen once per subsystem at setup
#[derive(Debug)]
pub enum Backend {
    DeviceBacked(Channel),
    KeyboardBacked,
    Dummy,
}

impl From<Fallback> for Backend {
    fn from(fallback: Fallback) -> Self {
        match fallback {
            Fallback::Keyboard => Backend::KeyboardBacked,
            Fallback::Dummy => Backend::Dummy,
        }
    }
}

impl Backend {
    /// Opens `device_id`, substituting `fallback` for sentinels and failures
    pub fn select(driver: &dyn DeviceDriver, device_id: &str, fallback: Fallback) -> Self {
        if is_sentinel(device_id) {
            debug!("Device '{}' selects {:?} mode", device_id, fallback);
            return fallback.into();
        }

        match Channel::open(driver, device_id) {
            Ok(channel) => Backend::DeviceBacked(channel),
            Err(e) => {
                warn!(
                    "Connecting device '{}' failed ({}). Switching to {:?} mode.",
                    device_id, e, fallback
                );
                fallback.into()
            }
        }
    }

    /// Name of the device or mode, for logs and recorded variables
    pub fn label(&self) -> &str {
        match self {
            Backend::DeviceBacked(channel) => channel.device_id(),
            Backend::KeyboardBacked => KEYBOARD_DEVICE,
            Backend::Dummy => DUMMY_DEVICE,
        }
    }

    pub fn is_device(&self) -> bool {
        matches!(self, Backend::DeviceBacked(_))
    }
}

/// `Keyboard` and `DUMMY` never reach the driver
pub fn is_sentinel(device_id: &str) -> bool {
    let id = device_id.trim();
    id.is_empty() || id.eq_ignore_ascii_case(KEYBOARD_DEVICE) || id.eq_ignore_ascii_case(DUMMY_DEVICE)
}

#[cfg(test)]
mod tests {
    use super::mock::{Call, MockDriver};
    use super::*;

    #[test]
    fn test_open_resets_lines() {
        let driver = MockDriver::with_attached(&["RSP-12 #1"]);
        let channel = Channel::open(&driver, "RSP-12 #1").unwrap();
        assert!(channel.is_open());
        assert_eq!(
            driver.calls(),
            vec![Call::Open("RSP-12 #1".into()), Call::SetLines(0)]
        );
    }

    #[test]
    fn test_close_is_idempotent_and_runs_on_drop() {
        let driver = MockDriver::with_attached(&["SHOCKER"]);
        let mut channel = Channel::open(&driver, "SHOCKER").unwrap();
        channel.close();
        channel.close();
        drop(channel);

        let closes = driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Close(_)))
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_failed_reset_releases_channel() {
        let driver = MockDriver::with_attached(&["SHOCKER"]);
        driver.fail_io();
        assert!(Channel::open(&driver, "SHOCKER").is_err());
        assert_eq!(driver.calls().last(), Some(&Call::Close("SHOCKER".into())));
    }

    #[test]
    fn test_closed_channel_rejects_operations() {
        let driver = MockDriver::with_attached(&["SHOCKER"]);
        let mut channel = Channel::open(&driver, "SHOCKER").unwrap();
        channel.close();
        assert!(matches!(channel.pulse(10, 150), Err(DeviceError::Closed(_))));
    }

    #[test]
    fn test_pulse_bounds_checked_before_hardware() {
        let driver = MockDriver::with_attached(&["SHOCKER"]);
        let mut channel = Channel::open(&driver, "SHOCKER").unwrap();

        assert!(matches!(
            channel.pulse(255, 150),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            channel.pulse(100, 0),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            channel.pulse(100, 2001),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(driver.pulses().is_empty());

        channel.pulse(254, 2000).unwrap();
        assert_eq!(driver.pulses(), vec![(254, 2000)]);
    }

    #[test]
    fn test_wait_encodes_infinite_timeout() {
        let driver = MockDriver::with_attached(&["RSP-12 #1"]);
        let mut channel = Channel::open(&driver, "RSP-12 #1").unwrap();
        let outcome = channel
            .wait_for_event(EventMask::from_bits(0b11), WaitTimeout::Infinite)
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(driver.calls().contains(&Call::Wait {
            mask: 0b11,
            timeout_code: -1
        }));
    }

    #[test]
    fn test_backend_sentinels_skip_driver() {
        let driver = MockDriver::with_attached(&["Keyboard"]);
        assert!(matches!(
            Backend::select(&driver, "Keyboard", Fallback::Keyboard),
            Backend::KeyboardBacked
        ));
        assert!(matches!(
            Backend::select(&driver, "dummy", Fallback::Dummy),
            Backend::Dummy
        ));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_backend_falls_back_when_open_fails() {
        let driver = MockDriver::with_attached(&[]);
        let backend = Backend::select(&driver, "SHOCKER", Fallback::Dummy);
        assert!(matches!(backend, Backend::Dummy));
        assert_eq!(backend.label(), DUMMY_DEVICE);

        let backend = Backend::select(&driver, "RSP-12 #1", Fallback::Keyboard);
        assert!(matches!(backend, Backend::KeyboardBacked));
        // Exactly one attempt per selection
        assert_eq!(driver.calls().len(), 2);
    }

    #[test]
    fn test_event_mask_contains_button() {
        let mask = EventMask::from_bits(0b101);
        assert!(mask.contains_button(1));
        assert!(!mask.contains_button(2));
        assert!(mask.contains_button(3));
        assert!(!mask.contains_button(0));
        assert!(!mask.contains_button(33));
    }

    #[test]
    fn test_wait_timeout_encodings() {
        assert_eq!(WaitTimeout::Infinite.device_code(), -1);
        assert_eq!(WaitTimeout::Millis(2000).device_code(), 2000);
        assert_eq!(WaitTimeout::Infinite.as_duration(), None);
        assert_eq!(
            WaitTimeout::Millis(5).as_duration(),
            Some(Duration::from_millis(5))
        );
    }
}
