//! Coordinate transforms between widget, buffer and document-page space
//!
//! Three coordinate systems are in play:
//! 1. Widget space: logical pixels of the on-screen canvas widget.
//! 2. Buffer space: pixels of the (possibly combined, double-height) page buffer.
//! 3. Page space: document points of a single logical page (PDF user space).
//!
//! Everything here is pure. Zoom is always a factor (1.0 = 100%), pan is in
//! buffer pixels, centering offsets are in widget pixels.

use serde::{Deserialize, Serialize};

/// Tolerance used when deciding whether a derived DPI ratio differs from 1.0
const DPI_RATIO_EPSILON: f64 = 0.01;

/// Reference logical DPI used when only the physical DPI is known
const REFERENCE_DPI: f64 = 96.0;

/// A point in any of the coordinate spaces
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        Self::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    #[must_use]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f64> for Point {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f64> for Point {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

/// Width/height pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Axis-aligned rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanning two corner points in any order
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x0 = a.x.min(b.x);
        let y0 = a.y.min(b.y);
        Self::new(x0, y0, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            Self::default()
        } else {
            Self::new(x0, y0, x1 - x0, y1 - y0)
        }
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    #[must_use]
    pub fn translated(&self, by: Point) -> Self {
        Self::new(self.x + by.x, self.y + by.y, self.width, self.height)
    }
}

/// Offset that centers a zoomed buffer inside the widget on axes where it is smaller
#[must_use]
pub fn center_offset(buffer: Size, widget: Size, zoom: f64) -> Point {
    let scaled = buffer.scaled(zoom);
    let dx = if scaled.width < widget.width {
        (widget.width - scaled.width) / 2.0
    } else {
        0.0
    };
    let dy = if scaled.height < widget.height {
        (widget.height - scaled.height) / 2.0
    } else {
        0.0
    };
    Point::new(dx, dy)
}

/// Widget coordinates to buffer pixels
#[must_use]
pub fn widget_to_buffer(point: Point, zoom: f64, pan: Point, center: Point) -> Point {
    (point - center) / zoom + pan
}

/// Buffer pixels to widget coordinates, inverse of [`widget_to_buffer`]
#[must_use]
pub fn buffer_to_widget(point: Point, zoom: f64, pan: Point, center: Point) -> Point {
    (point - pan) * zoom + center
}

/// Map a whole buffer rectangle into widget space
#[must_use]
pub fn buffer_rect_to_widget(rect: Rect, zoom: f64, pan: Point, center: Point) -> Rect {
    let origin = buffer_to_widget(Point::new(rect.x, rect.y), zoom, pan, center);
    Rect::new(origin.x, origin.y, rect.width * zoom, rect.height * zoom)
}

/// Map a whole widget rectangle into buffer space
#[must_use]
pub fn widget_rect_to_buffer(rect: Rect, zoom: f64, pan: Point, center: Point) -> Rect {
    let origin = widget_to_buffer(Point::new(rect.x, rect.y), zoom, pan, center);
    Rect::new(origin.x, origin.y, rect.width / zoom, rect.height / zoom)
}

/// Valid horizontal pan range for a zoomed buffer inside a widget.
///
/// `None` means the buffer fits and must stay centered (pan locked to 0).
#[must_use]
pub fn horizontal_pan_range(buffer_width: f64, widget_width: f64, zoom: f64) -> Option<f64> {
    let scaled = buffer_width * zoom;
    if scaled <= widget_width {
        None
    } else {
        Some(scaled - widget_width)
    }
}

/// Clamp a horizontal pan value; the vertical axis is left alone on purpose
/// because vertical overscroll drives page switching.
#[must_use]
pub fn clamp_pan_x(pan_x: f64, buffer_width: f64, widget_width: f64, zoom: f64) -> f64 {
    match horizontal_pan_range(buffer_width, widget_width, zoom) {
        None => 0.0,
        Some(max) => pan_x.clamp(0.0, max),
    }
}

/// Vertical pan is only forced to 0 when the whole buffer fits in the widget
#[must_use]
pub fn settle_pan_y(pan_y: f64, buffer_height: f64, widget_height: f64, zoom: f64) -> f64 {
    if buffer_height * zoom < widget_height {
        0.0
    } else {
        pan_y
    }
}

/// What the platform reports about the screen the canvas lives on
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenInfo {
    pub device_pixel_ratio: f64,
    pub physical_dpi: f64,
    pub logical_dpi: f64,
    /// Logical screen size, used to size note buffers when no page defines one
    pub logical_size: Size,
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
            physical_dpi: REFERENCE_DPI,
            logical_dpi: REFERENCE_DPI,
            logical_size: Size::new(1440.0, 900.0),
        }
    }
}

/// Manual DPI scale override, or automatic detection
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DpiScale {
    Auto,
    Manual(f64),
}

impl DpiScale {
    /// Settings store the override as a float where anything `<= 0.0` means auto
    #[must_use]
    pub fn from_setting(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            Self::Manual(value)
        } else {
            Self::Auto
        }
    }
}

/// Resolve the device pixel scale.
///
/// An explicit override wins. Otherwise the physical/logical DPI ratio is
/// used when it is meaningfully different from 1, then physical DPI against
/// the 96 DPI reference, then the platform device pixel ratio.
#[must_use]
pub fn effective_dpi_scale(screen: &ScreenInfo, scale: DpiScale) -> f64 {
    if let DpiScale::Manual(value) = scale {
        return value;
    }

    if screen.logical_dpi > 0.0 && screen.physical_dpi > 0.0 {
        let ratio = screen.physical_dpi / screen.logical_dpi;
        if (ratio - 1.0).abs() >= DPI_RATIO_EPSILON {
            return ratio;
        }
    }

    if screen.physical_dpi > 0.0 {
        let ratio = screen.physical_dpi / REFERENCE_DPI;
        if (ratio - 1.0).abs() >= DPI_RATIO_EPSILON {
            return ratio;
        }
    }

    if screen.device_pixel_ratio > 0.0 && screen.device_pixel_ratio.is_finite() {
        screen.device_pixel_ratio
    } else {
        1.0
    }
}

/// Geometry needed to translate between buffer pixels and page points
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageLayout {
    /// Width of the rendered page image in buffer pixels
    pub image_width: f64,
    /// Height of one logical page in buffer pixels
    pub single_page_height: f64,
    /// Whether the buffer stacks two pages
    pub combined: bool,
    pub top_page: usize,
    /// Page size in document points of the top page
    pub top_size: Size,
    /// Bottom page index and size, when a bottom page exists
    pub bottom: Option<(usize, Size)>,
}

impl PageLayout {
    /// Buffer pixel to (page index, page point).
    ///
    /// Returns `None` when the point is in a blank bottom half or the layout is degenerate.
    #[must_use]
    pub fn buffer_to_page(&self, point: Point) -> Option<(usize, Point)> {
        if self.image_width <= 0.0 || self.single_page_height <= 0.0 {
            return None;
        }

        let (page, size, local) = if self.combined && point.y >= self.single_page_height {
            let (page, size) = self.bottom?;
            (
                page,
                size,
                Point::new(point.x, point.y - self.single_page_height),
            )
        } else {
            (self.top_page, self.top_size, point)
        };

        if size.is_empty() {
            return None;
        }

        let scale_x = size.width / self.image_width;
        let scale_y = size.height / self.single_page_height;
        Some((page, Point::new(local.x * scale_x, local.y * scale_y)))
    }

    /// Page point to buffer pixel; `None` if the page is not part of this layout
    #[must_use]
    pub fn page_to_buffer(&self, page: usize, point: Point) -> Option<Point> {
        let (size, y_offset) = if page == self.top_page {
            (self.top_size, 0.0)
        } else {
            match self.bottom {
                Some((bottom, size)) if bottom == page && self.combined => {
                    (size, self.single_page_height)
                }
                _ => return None,
            }
        };

        if size.is_empty() {
            return None;
        }

        let scale_x = self.image_width / size.width;
        let scale_y = self.single_page_height / size.height;
        Some(Point::new(point.x * scale_x, point.y * scale_y + y_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    #[test]
    fn center_offset_only_on_axes_that_fit() {
        let offset = center_offset(Size::new(400.0, 2000.0), Size::new(1000.0, 800.0), 1.0);
        assert_eq!(offset, Point::new(300.0, 0.0));

        let zoomed = center_offset(Size::new(400.0, 2000.0), Size::new(1000.0, 800.0), 4.0);
        assert_eq!(zoomed, Point::new(0.0, 0.0));
    }

    #[test]
    fn widget_buffer_round_trip() {
        let center = Point::new(120.0, 0.0);
        let pan = Point::new(30.0, 900.0);
        let p = Point::new(417.5, 33.25);

        let buffer = widget_to_buffer(p, 1.5, pan, center);
        assert!(approx(buffer_to_widget(buffer, 1.5, pan, center), p));
    }

    #[test]
    fn widget_to_buffer_subtracts_center_divides_and_adds_pan() {
        let p = widget_to_buffer(
            Point::new(110.0, 60.0),
            2.0,
            Point::new(5.0, 7.0),
            Point::new(10.0, 20.0),
        );
        assert_eq!(p, Point::new(55.0, 27.0));
    }

    #[test]
    fn horizontal_clamp_locks_when_buffer_fits() {
        assert_eq!(clamp_pan_x(250.0, 800.0, 1000.0, 1.0), 0.0);
        assert_eq!(clamp_pan_x(-20.0, 800.0, 1000.0, 2.0), 0.0);
        assert_eq!(clamp_pan_x(900.0, 800.0, 1000.0, 2.0), 600.0);
        assert_eq!(clamp_pan_x(123.0, 800.0, 1000.0, 2.0), 123.0);
    }

    #[test]
    fn vertical_pan_left_unclamped_for_tall_buffers() {
        assert_eq!(settle_pan_y(-340.0, 4000.0, 900.0, 1.0), -340.0);
        assert_eq!(settle_pan_y(5000.0, 4000.0, 900.0, 1.0), 5000.0);
        assert_eq!(settle_pan_y(200.0, 400.0, 900.0, 1.0), 0.0);
    }

    #[test]
    fn manual_dpi_override_wins() {
        let screen = ScreenInfo {
            device_pixel_ratio: 2.0,
            physical_dpi: 192.0,
            logical_dpi: 96.0,
            ..ScreenInfo::default()
        };
        assert_eq!(effective_dpi_scale(&screen, DpiScale::Manual(1.25)), 1.25);
    }

    #[test]
    fn auto_dpi_prefers_physical_over_logical() {
        let screen = ScreenInfo {
            device_pixel_ratio: 1.0,
            physical_dpi: 144.0,
            logical_dpi: 96.0,
            ..ScreenInfo::default()
        };
        assert!((effective_dpi_scale(&screen, DpiScale::Auto) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn auto_dpi_falls_back_to_device_ratio() {
        let screen = ScreenInfo {
            device_pixel_ratio: 2.0,
            physical_dpi: 96.0,
            logical_dpi: 96.0,
            ..ScreenInfo::default()
        };
        assert_eq!(effective_dpi_scale(&screen, DpiScale::Auto), 2.0);

        let unknown = ScreenInfo {
            device_pixel_ratio: 1.75,
            physical_dpi: 0.0,
            logical_dpi: 0.0,
            ..ScreenInfo::default()
        };
        assert_eq!(effective_dpi_scale(&unknown, DpiScale::Auto), 1.75);
    }

    #[test]
    fn dpi_setting_zero_means_auto() {
        assert_eq!(DpiScale::from_setting(0.0), DpiScale::Auto);
        assert_eq!(DpiScale::from_setting(-1.0), DpiScale::Auto);
        assert_eq!(DpiScale::from_setting(1.5), DpiScale::Manual(1.5));
    }

    fn combined_layout() -> PageLayout {
        PageLayout {
            image_width: 1200.0,
            single_page_height: 1600.0,
            combined: true,
            top_page: 4,
            top_size: Size::new(600.0, 800.0),
            bottom: Some((5, Size::new(600.0, 800.0))),
        }
    }

    #[test]
    fn bottom_half_maps_to_next_page() {
        let layout = combined_layout();
        let (page, p) = layout.buffer_to_page(Point::new(600.0, 2400.0)).unwrap();
        assert_eq!(page, 5);
        assert!(approx(p, Point::new(300.0, 400.0)));

        let back = layout.page_to_buffer(5, p).unwrap();
        assert!(approx(back, Point::new(600.0, 2400.0)));
    }

    #[test]
    fn blank_bottom_half_has_no_page() {
        let layout = PageLayout {
            bottom: None,
            ..combined_layout()
        };
        assert!(layout.buffer_to_page(Point::new(10.0, 1700.0)).is_none());
        assert!(layout.buffer_to_page(Point::new(10.0, 10.0)).is_some());
    }

    #[test]
    fn rect_union_and_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 15.0, 15.0));
        assert_eq!(a.intersection(&b), Rect::new(5.0, 5.0, 5.0, 5.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&Rect::new(20.0, 20.0, 1.0, 1.0)));
        assert_eq!(Rect::default().union(&a), a);
    }
}
