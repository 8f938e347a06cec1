use super::{DeviceChannel, DeviceDriver, DeviceError};
use tracing::debug;

/// Driver for hosts without any EVT hardware
///
/// Every open fails with [`DeviceError::Unavailable`], which sends the
/// caller down its keyboard or dummy fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriver;

impl DeviceDriver for NullDriver {
    fn open(&self, device_id: &str) -> Result<Box<dyn DeviceChannel>, DeviceError> {
        debug!("No hardware driver available for '{}'", device_id);
        Err(DeviceError::Unavailable(format!(
            "no hardware driver for '{}'",
            device_id
        )))
    }

    fn list_attached(&self, _filter: &str) -> Result<Vec<String>, DeviceError> {
        Ok(Vec::new())
    }
}
