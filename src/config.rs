//! Session configuration
//!
//! One TOML file describes the hardware and the ordered steps of a run:
//!
//! ```toml
//! experiment = "pilot"
//!
//! [response_box]
//! device = "EventExchanger-RSP-12 #1"
//! allowed_responses = "1;2;3"
//! correct_response = "1"
//! timeout = 2000
//!
//! [stimulator]
//! device = "SHOCKER #1"
//! pulse_duration_ms = 150
//!
//! [[steps]]
//! kind = "calibrate"
//!
//! [[steps]]
//! kind = "stimulate"
//! perc_calibr_value = 50.0
//! ```
//!
//! Values the items would reject at runtime (pulse duration, percent,
//! allow-list) are still accepted here; the owning module validates them
//! and falls back to its defaults with a logged error.

use crate::device::{GpioUnit, WaitTimeout, DUMMY_DEVICE, KEYBOARD_DEVICE};
use crate::response::DEFAULT_ALLOWED_RESPONSES;
use crate::stimulation::{HoldoffPolicy, DEFAULT_PULSE_DURATION_MS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/evtcontroller";
const CONFIG_FILE: &str = "session.toml";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Pulse duration {0}ms is outside 1..=2000")]
    PulseDurationOutOfRange(i64),

    #[error("Stimulation percent {0} is outside 0..=100")]
    PercentOutOfRange(f64),

    #[error("Invalid allowed responses '{0}'")]
    AllowedResponses(String),

    #[error("Config file I/O failed: {0}")]
    Io(String),

    #[error("Config file could not be parsed: {0}")]
    Parse(String),

    #[error("Config could not be serialized: {0}")]
    Serialize(String),
}

/// Loosely typed item field, as experimenters enter it
///
/// Timeouts and allow-lists are typed both as numbers and as strings in
/// existing experiment files, so both forms are accepted.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Setting {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Setting {
    /// Integer milliseconds, or infinite for anything that is not one
    pub fn as_wait_timeout(&self) -> WaitTimeout {
        match self {
            Setting::Int(ms) => timeout_from_millis(*ms),
            Setting::Text(text) => match text.trim().parse::<i64>() {
                Ok(ms) => timeout_from_millis(ms),
                Err(_) => {
                    debug!("Timeout '{}' is not an integer, waiting without deadline", text);
                    WaitTimeout::Infinite
                }
            },
            Setting::Float(ms) => {
                debug!("Timeout {} is not an integer, waiting without deadline", ms);
                WaitTimeout::Infinite
            }
        }
    }
}

fn timeout_from_millis(ms: i64) -> WaitTimeout {
    match u64::try_from(ms) {
        Ok(ms) => WaitTimeout::Millis(ms),
        Err(_) => {
            warn!("Negative timeout {}ms, waiting without deadline", ms);
            WaitTimeout::Infinite
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Int(i) => write!(f, "{}", i),
            Setting::Float(x) => write!(f, "{}", x),
            Setting::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ResponseBoxConfig {
    pub name: String,
    /// Device id, or `Keyboard`
    pub device: String,
    pub allowed_responses: Setting,
    pub correct_response: String,
    /// Milliseconds, or `infinite`
    pub timeout: Setting,
    pub process_feedback: bool,
}

impl Default for ResponseBoxConfig {
    fn default() -> Self {
        Self {
            name: "rsp_pyevt".to_string(),
            device: KEYBOARD_DEVICE.to_string(),
            allowed_responses: Setting::Text(DEFAULT_ALLOWED_RESPONSES.to_string()),
            correct_response: String::new(),
            timeout: Setting::Text("infinite".to_string()),
            process_feedback: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StimulatorConfig {
    pub name: String,
    /// Device id, or `DUMMY`
    pub device: String,
    /// Look for EVT boxes instead of SHOCKER units when listing
    pub emulate_with_evt: bool,
    pub pulse_duration_ms: i64,
    /// Minimum time between two pulses, in seconds
    pub pulse_timeout_s: f64,
    /// Cooldown after a calibration test pulse, in seconds
    pub inter_pulse_holdoff_s: u64,
    pub holdoff_policy: HoldoffPolicy,
    pub canvas_width: f64,
    pub canvas_height: f64,
}

impl Default for StimulatorConfig {
    fn default() -> Self {
        Self {
            name: "tactile_stimulator".to_string(),
            device: DUMMY_DEVICE.to_string(),
            emulate_with_evt: false,
            pulse_duration_ms: i64::from(DEFAULT_PULSE_DURATION_MS),
            pulse_timeout_s: 1.0,
            inter_pulse_holdoff_s: 8,
            holdoff_policy: HoldoffPolicy::default(),
            canvas_width: 1024.0,
            canvas_height: 768.0,
        }
    }
}

/// One step of the run, executed in file order
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    Calibrate,
    Stimulate {
        #[serde(default)]
        perc_calibr_value: f64,
    },
    Response {
        /// Overrides the item's correct response for this trial
        #[serde(default)]
        correct_response: Option<String>,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub experiment: String,
    pub response_box: ResponseBoxConfig,
    pub stimulator: StimulatorConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpio_units: Vec<GpioUnit>,
    pub steps: Vec<StepConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            experiment: "default".to_string(),
            response_box: ResponseBoxConfig::default(),
            stimulator: StimulatorConfig::default(),
            gpio_units: Vec::new(),
            steps: vec![
                StepConfig::Calibrate,
                StepConfig::Stimulate {
                    perc_calibr_value: 50.0,
                },
                StepConfig::Response {
                    correct_response: None,
                },
                StepConfig::Stimulate {
                    perc_calibr_value: 100.0,
                },
                StepConfig::Response {
                    correct_response: None,
                },
            ],
        }
    }
}

impl SessionConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&content)?;
        info!(
            "Loaded session '{}' with {} steps from {}",
            config.experiment,
            config.steps.len(),
            path.display()
        );
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))
    }
}

/// `~/.config/evtcontroller/session.toml`
pub fn default_config_path() -> PathBuf {
    let mut path = get_home_dir();
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

/// Writes the default session to `path` unless a file is already there
pub async fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    if exists {
        return Ok(());
    }

    info!("Creating default configuration at {}", path.display());
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ConfigError::Io(format!("{}: {}", parent.display(), e)))?;
    }
    SessionConfig::default().save(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_session_parses() {
        let config = SessionConfig::from_toml(
            r#"
            experiment = "pilot"

            [response_box]
            device = "EventExchanger-RSP-12 #1"
            allowed_responses = "1;2;3"
            correct_response = "1"
            timeout = 2000

            [stimulator]
            device = "SHOCKER #1"
            pulse_duration_ms = 200
            holdoff_policy = "delivered_only"

            [[gpio_units]]
            name = "SHOCKER #1"
            output_pins = [5, 6, 12, 13, 16, 19, 20, 26]

            [[steps]]
            kind = "calibrate"

            [[steps]]
            kind = "stimulate"
            perc_calibr_value = 50.0

            [[steps]]
            kind = "response"
            correct_response = "2"
            "#,
        )
        .unwrap();

        assert_eq!(config.experiment, "pilot");
        assert_eq!(config.response_box.timeout.as_wait_timeout(), WaitTimeout::Millis(2000));
        assert_eq!(config.response_box.allowed_responses.to_string(), "1;2;3");
        assert_eq!(config.stimulator.pulse_duration_ms, 200);
        assert_eq!(config.stimulator.holdoff_policy, HoldoffPolicy::DeliveredOnly);
        assert_eq!(config.stimulator.pulse_timeout_s, 1.0);
        assert_eq!(config.gpio_units.len(), 1);
        assert_eq!(
            config.steps,
            vec![
                StepConfig::Calibrate,
                StepConfig::Stimulate {
                    perc_calibr_value: 50.0
                },
                StepConfig::Response {
                    correct_response: Some("2".into())
                },
            ]
        );
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = SessionConfig::from_toml("experiment = \"bare\"").unwrap();
        assert_eq!(config.response_box, ResponseBoxConfig::default());
        assert_eq!(config.stimulator.device, DUMMY_DEVICE);
        assert_eq!(config.stimulator.holdoff_policy, HoldoffPolicy::EveryInvocation);
        assert!(config.gpio_units.is_empty());
    }

    #[test]
    fn test_allowed_responses_as_number() {
        let config = SessionConfig::from_toml("[response_box]\nallowed_responses = 3").unwrap();
        assert_eq!(config.response_box.allowed_responses, Setting::Int(3));
        assert_eq!(config.response_box.allowed_responses.to_string(), "3");
    }

    #[test]
    fn test_timeout_forms() {
        assert_eq!(Setting::Int(500).as_wait_timeout(), WaitTimeout::Millis(500));
        assert_eq!(Setting::Text("750".into()).as_wait_timeout(), WaitTimeout::Millis(750));
        assert_eq!(Setting::Text("infinite".into()).as_wait_timeout(), WaitTimeout::Infinite);
        assert_eq!(Setting::Float(2.5).as_wait_timeout(), WaitTimeout::Infinite);
        assert_eq!(Setting::Int(-1).as_wait_timeout(), WaitTimeout::Infinite);
    }

    #[test]
    fn test_unknown_step_kind_rejected() {
        let err = SessionConfig::from_toml("[[steps]]\nkind = \"dance\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_default_survives_toml() {
        let config = SessionConfig::default();
        let parsed = SessionConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[tokio::test]
    async fn test_ensure_default_config_writes_once() {
        let dir = std::env::temp_dir().join(format!("evtcontroller-test-{}", std::process::id()));
        let path = dir.join("session.toml");
        let _ = tokio::fs::remove_dir_all(&dir).await;

        ensure_default_config(&path).await.unwrap();
        let written = SessionConfig::load(&path).await.unwrap();
        assert_eq!(written, SessionConfig::default());

        let mut custom = written.clone();
        custom.experiment = "custom".into();
        custom.save(&path).await.unwrap();
        ensure_default_config(&path).await.unwrap();
        assert_eq!(SessionConfig::load(&path).await.unwrap().experiment, "custom");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
