pub mod clock;
pub mod config;
pub mod device;
pub mod input;
pub mod response;
pub mod scope;
pub mod session;
pub mod stimulation;
pub mod terminal;

use crate::clock::SystemClock;
use crate::config::{default_config_path, ensure_default_config, SessionConfig};
use crate::device::{DeviceDriver, GpioDriver, NullDriver};
use crate::response::{list_response_boxes, ResponseLog};
use crate::scope::ExperimentScope;
use crate::session::{Participant, Session, StepOutcome};
use crate::stimulation::{list_stimulators, CalibrationLayout, LogDisplay};
use crate::terminal::Terminal;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    setup()?;

    let runtime = Runtime::new()?;
    let result = runtime.block_on(run());
    // The stdin reader may still be parked on a read
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run() -> Result<()> {
    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let path = default_config_path();
            ensure_default_config(&path).await?;
            path
        }
    };
    let config = SessionConfig::load(&config_path).await?;

    let driver: Box<dyn DeviceDriver> = if config.gpio_units.is_empty() {
        warn!("No GPIO units configured, running without hardware");
        Box::new(NullDriver)
    } else {
        Box::new(GpioDriver::new(config.gpio_units.clone()))
    };

    info!(
        "Response boxes: {:?}",
        list_response_boxes(driver.as_ref())
    );
    info!(
        "Stimulators: {:?}",
        list_stimulators(driver.as_ref(), config.stimulator.emulate_with_evt)
    );

    let handle = Handle::current();
    let (outcomes, log) =
        tokio::task::spawn_blocking(move || run_session(&config, driver.as_ref(), handle))
            .await
            .map_err(|e| eyre!("Session thread failed: {}", e))??;

    summarize(&outcomes, &log);
    Ok(())
}

/// Runs the blocking session on the current (blocking-pool) thread
fn run_session(
    config: &SessionConfig,
    driver: &dyn DeviceDriver,
    handle: Handle,
) -> Result<(Vec<StepOutcome>, ResponseLog)> {
    let terminal = Terminal::spawn(handle);
    let mut keyboard = terminal.keyboard();
    let mut pointer = terminal.pointer(CalibrationLayout::new(
        config.stimulator.canvas_width,
        config.stimulator.canvas_height,
    ));
    let mut display = LogDisplay;
    let mut log = ResponseLog::new();
    let mut scope = ExperimentScope::new(config.experiment.clone());

    let outcomes = {
        let mut participant = Participant {
            keyboard: &mut keyboard,
            pointer: &mut pointer,
            display: &mut display,
            responses: &mut log,
        };
        Session::new(config, driver, SystemClock).run(&mut scope, &mut participant)?
    };

    for (name, value) in scope.snapshot() {
        info!("{} = {}", name, value);
    }
    Ok((outcomes, log))
}

fn summarize(outcomes: &[StepOutcome], log: &ResponseLog) {
    let pulses = outcomes
        .iter()
        .filter(|o| matches!(o, StepOutcome::Stimulated(r) if r.outcome.was_attempted()))
        .count();
    info!(
        "Session finished: {} steps, {} pulses, {} responses",
        outcomes.len(),
        pulses,
        log.records().len()
    );
    match log.accuracy() {
        Some(accuracy) => info!("Accuracy: {:.1}%", accuracy * 100.0),
        None => info!("Accuracy: not scored"),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
