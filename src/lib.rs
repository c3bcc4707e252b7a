// Export modules for use in tests
pub mod autoscroll;
pub mod bitmap;
pub mod canvas;
pub mod combined;
pub mod debounce;
pub mod geometry;
pub mod gesture;
pub mod panic_handler;
pub mod pdf;
pub mod settings;
pub mod text_regions;
pub mod zoom;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the canvas surface
pub use canvas::{CanvasEvent, PageCanvas, RepaintKind, Snapshot};
pub use geometry::{Point, Rect, ScreenInfo, Size};
pub use settings::Settings;
