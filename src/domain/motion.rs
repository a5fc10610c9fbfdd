//! Motion Accumulator
//!
//! Integrates decoded deltas into a bounded cursor position and a
//! saturating wheel counter.

use crate::domain::models::{Buttons, MouseDelta, MouseSnapshot};
use tracing::warn;

pub const WHEEL_LIMIT: i32 = 127;

#[derive(Debug, Clone)]
pub struct MotionAccumulator {
    buttons: Buttons,
    dx: i32,
    dy: i32,
    wheel: i32,
    cursor_x: f64,
    cursor_y: f64,
    sensitivity_x: f64,
    sensitivity_y: f64,
    width: u32,
    height: u32,
}

impl Default for MotionAccumulator {
    fn default() -> Self {
        Self {
            buttons: Buttons::NONE,
            dx: 0,
            dy: 0,
            wheel: 0,
            cursor_x: 0.0,
            cursor_y: 0.0,
            sensitivity_x: 1.0,
            sensitivity_y: 1.0,
            width: 0,
            height: 0,
        }
    }
}

impl MotionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: MouseDelta) {
        if let Some(buttons) = delta.buttons {
            self.buttons = buttons;
        }

        self.dx = self.dx.saturating_add(delta.dx);
        self.dy = self.dy.saturating_add(delta.dy);

        self.cursor_x = clamp_axis(
            self.cursor_x + delta.dx as f64 * self.sensitivity_x,
            self.width,
        );
        self.cursor_y = clamp_axis(
            self.cursor_y + delta.dy as f64 * self.sensitivity_y,
            self.height,
        );

        self.wheel = self
            .wheel
            .saturating_add(delta.wheel)
            .clamp(-WHEEL_LIMIT, WHEEL_LIMIT);
    }

    /// Change the bounds, rescaling the cursor by the new/old ratio.
    ///
    /// An axis whose previous bound was unset (0) is not rescaled.
    pub fn set_display_resolution(&mut self, width: u32, height: u32) {
        if self.width != 0 {
            self.cursor_x *= width as f64 / self.width as f64;
        }
        if self.height != 0 {
            self.cursor_y *= height as f64 / self.height as f64;
        }
        self.width = width;
        self.height = height;
        self.cursor_x = clamp_axis(self.cursor_x, width);
        self.cursor_y = clamp_axis(self.cursor_y, height);
    }

    pub fn display_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Move the cursor, clamped to the display. A NaN coordinate leaves
    /// that axis where it was.
    pub fn set_cursor_position(&mut self, x: f64, y: f64) {
        if x.is_nan() || y.is_nan() {
            warn!("Ignoring NaN cursor coordinate ({}, {})", x, y);
        }
        if !x.is_nan() {
            self.cursor_x = clamp_axis(x, self.width);
        }
        if !y.is_nan() {
            self.cursor_y = clamp_axis(y, self.height);
        }
    }

    pub fn cursor_position(&self) -> (f64, f64) {
        (self.cursor_x, self.cursor_y)
    }

    /// Non-finite factors are ignored and keep the previous value.
    pub fn set_sensitivity(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            warn!("Ignoring non-finite sensitivity ({}, {})", x, y);
        }
        if x.is_finite() {
            self.sensitivity_x = x;
        }
        if y.is_finite() {
            self.sensitivity_y = y;
        }
    }

    pub fn sensitivity(&self) -> (f64, f64) {
        (self.sensitivity_x, self.sensitivity_y)
    }

    /// Current state without consuming the accumulated deltas.
    pub fn peek(&self) -> MouseSnapshot {
        MouseSnapshot {
            buttons: self.buttons,
            dx: self.dx,
            dy: self.dy,
            wheel: self.wheel,
            x: self.cursor_x,
            y: self.cursor_y,
        }
    }

    /// Current state; resets the accumulated deltas.
    pub fn take_snapshot(&mut self) -> MouseSnapshot {
        let snapshot = self.peek();
        self.dx = 0;
        self.dy = 0;
        self.wheel = 0;
        snapshot
    }

    /// Drop unreported motion and release buttons. Cursor and settings stay.
    pub fn reset(&mut self) {
        self.buttons = Buttons::NONE;
        self.dx = 0;
        self.dy = 0;
        self.wheel = 0;
    }
}

fn clamp_axis(value: f64, bound: u32) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, bound as f64)
}
