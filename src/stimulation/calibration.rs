//! Calibration canvas geometry and readout
//!
//! Coordinates are canvas coordinates with the origin at the center, as the
//! pointer provider reports them. The slider spans `width / 2.2` to either
//! side of the center; TEST sits bottom left and OK bottom right.

use crate::input::Position;
use tracing::info;

/// Axis-aligned box; a negative width or height extends left or up
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, pos: Position) -> bool {
        let (left, right) = ordered(self.x, self.x + self.w);
        let (top, bottom) = ordered(self.y, self.y + self.h);
        (left..=right).contains(&pos.x) && (top..=bottom).contains(&pos.y)
    }

    pub fn center(&self) -> Position {
        Position::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// What a click landed on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Slider(f64),
    Test,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationLayout {
    width: f64,
    height: f64,
}

impl CalibrationLayout {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn half_span(&self) -> f64 {
        self.width / 2.2
    }

    pub fn slider_box(&self) -> Rect {
        Rect::new(-self.half_span(), 0.0, 2.0 * self.half_span(), 28.0)
    }

    pub fn test_box(&self) -> Rect {
        Rect::new(
            -self.width / 3.0,
            self.height / 4.0,
            self.width / 10.0,
            self.height / 10.0,
        )
    }

    pub fn ok_box(&self) -> Rect {
        Rect::new(
            self.width / 3.0,
            self.height / 4.0,
            -self.width / 10.0,
            self.height / 10.0,
        )
    }

    /// Slider level under `x`, capped at 100
    ///
    /// The 6 px inset of the slider bar makes the right end saturate just
    /// before the box edge.
    pub fn percent_at(&self, x: f64) -> f64 {
        let span = self.half_span();
        ((x + span) / (2.0 * (span - 6.0)) * 100.0).clamp(0.0, 100.0)
    }

    /// Horizontal position that selects `percent`
    pub fn x_for_percent(&self, percent: f64) -> f64 {
        let span = self.half_span();
        percent / 100.0 * (2.0 * (span - 6.0)) - span
    }

    pub fn hit(&self, pos: Position) -> Option<Target> {
        if self.slider_box().contains(pos) {
            Some(Target::Slider(self.percent_at(pos.x)))
        } else if self.test_box().contains(pos) {
            Some(Target::Test)
        } else if self.ok_box().contains(pos) {
            Some(Target::Ok)
        } else {
            None
        }
    }
}

/// Readout of the calibration run
pub trait CalibrationDisplay {
    fn show_level(&mut self, percent: f64, milliamp: f64);

    fn show_test_pulse(&mut self, raw_intensity: u8, simulated: bool);

    /// Seconds left before the next test pulse is possible
    fn show_cooldown(&mut self, remaining_s: u64);
}

/// Writes the readout to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDisplay;

impl CalibrationDisplay for LogDisplay {
    fn show_level(&mut self, percent: f64, milliamp: f64) {
        info!("Calibration level {:.1}% ({:.1}mA)", percent, milliamp);
    }

    fn show_test_pulse(&mut self, raw_intensity: u8, simulated: bool) {
        if simulated {
            info!(
                "(Dummy) Tactile stimulator pulsing intensity value: {}",
                raw_intensity
            );
        } else {
            info!("Test pulse at intensity value {}", raw_intensity);
        }
    }

    fn show_cooldown(&mut self, remaining_s: u64) {
        info!("wait... {}", remaining_s);
    }
}
