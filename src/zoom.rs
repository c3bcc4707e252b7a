//! Zoom and pan state of the canvas viewport
//!
//! Zoom is stored as an integer percentage, the unit the host UI exposes,
//! and converted to a factor for the transform math. Pan is in buffer pixels.

use crate::geometry::{self, Point, Size};

/// Scroll/pan direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Zoom and pan state for the canvas
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Zoom {
    /// Current zoom in percent (100 = 1:1)
    percent: u32,

    /// Pan offset in buffer pixels
    pub pan: Point,
}

impl Default for Zoom {
    fn default() -> Self {
        Self {
            percent: Self::DEFAULT_PERCENT,
            pan: Point::default(),
        }
    }
}

impl Zoom {
    pub const DEFAULT_PERCENT: u32 = 100;
    /// Minimum allowed zoom
    pub const MIN_PERCENT: u32 = 10;
    /// Maximum allowed zoom
    pub const MAX_PERCENT: u32 = 400;
    /// Base pan step in widget pixels
    pub const BASE_PAN_STEP: f64 = 40.0;

    #[must_use]
    pub fn new(percent: u32) -> Self {
        Self {
            percent: Self::clamp_percent(percent),
            pan: Point::default(),
        }
    }

    /// Current zoom in percent
    #[must_use]
    pub fn percent(&self) -> u32 {
        self.percent
    }

    /// Current zoom as a factor (1.0 = 100%)
    #[must_use]
    pub fn factor(&self) -> f64 {
        f64::from(self.percent) / 100.0
    }

    /// Set the zoom, clamped to 10..=400; returns whether it changed
    pub fn set_percent(&mut self, percent: u32) -> bool {
        let clamped = Self::clamp_percent(percent);
        if clamped == self.percent {
            return false;
        }
        self.percent = clamped;
        true
    }

    /// Pan by one step in the given direction, adjusting the step by zoom.
    ///
    /// The horizontal axis is clamped; the vertical one is left free.
    pub fn pan_step(&mut self, direction: ScrollDirection, buffer: Size, widget: Size) {
        let step = Self::BASE_PAN_STEP / self.factor();
        let mut pan = self.pan;
        match direction {
            ScrollDirection::Up => pan.y -= step,
            ScrollDirection::Down => pan.y += step,
            ScrollDirection::Left => pan.x -= step,
            ScrollDirection::Right => pan.x += step,
        }
        self.pan = self.settle(pan, buffer, widget);
    }

    /// Apply the horizontal clamp and the fits-vertically rule to a pan value
    #[must_use]
    pub fn settle(&self, pan: Point, buffer: Size, widget: Size) -> Point {
        settle_pan(pan, buffer, widget, self.factor())
    }

    /// Clamp percent to the valid range
    #[must_use]
    pub fn clamp_percent(percent: u32) -> u32 {
        percent.clamp(Self::MIN_PERCENT, Self::MAX_PERCENT)
    }

    /// Clamp a fractional percent (pinch zoom), handling NaN/Inf
    #[must_use]
    pub fn clamp_fractional(percent: f64) -> f64 {
        if percent.is_finite() {
            percent.clamp(f64::from(Self::MIN_PERCENT), f64::from(Self::MAX_PERCENT))
        } else {
            f64::from(Self::DEFAULT_PERCENT)
        }
    }
}

/// Clamp horizontal pan and zero vertical pan when the buffer fits
#[must_use]
pub fn settle_pan(pan: Point, buffer: Size, widget: Size, zoom: f64) -> Point {
    Point::new(
        geometry::clamp_pan_x(pan.x, buffer.width, widget.width, zoom),
        geometry::settle_pan_y(pan.y, buffer.height, widget.height, zoom),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped() {
        let mut zoom = Zoom::default();
        assert!(zoom.set_percent(1000));
        assert_eq!(zoom.percent(), 400);
        assert!(zoom.set_percent(0));
        assert_eq!(zoom.percent(), 10);
        assert!(!zoom.set_percent(5));
        assert_eq!(Zoom::new(250).factor(), 2.5);
    }

    #[test]
    fn pan_step_scales_with_zoom_and_clamps_horizontally() {
        let buffer = Size::new(1000.0, 4000.0);
        let widget = Size::new(800.0, 600.0);
        let mut zoom = Zoom::new(200);

        zoom.pan_step(ScrollDirection::Down, buffer, widget);
        assert_eq!(zoom.pan.y, 20.0);

        zoom.pan_step(ScrollDirection::Left, buffer, widget);
        assert_eq!(zoom.pan.x, 0.0);

        zoom.pan_step(ScrollDirection::Up, buffer, widget);
        zoom.pan_step(ScrollDirection::Up, buffer, widget);
        assert_eq!(zoom.pan.y, -20.0);
    }

    #[test]
    fn fractional_clamp_handles_nan() {
        assert_eq!(Zoom::clamp_fractional(f64::NAN), 100.0);
        assert_eq!(Zoom::clamp_fractional(3.0), 10.0);
        assert_eq!(Zoom::clamp_fractional(512.5), 400.0);
    }
}
