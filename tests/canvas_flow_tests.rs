use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::Rgba;
use inkleaf::bitmap::{self, TRANSPARENT, band_is_solid, page_background};
use inkleaf::combined::CombinedBuffer;
use inkleaf::pdf::{NoteStore, lock_cache, shared_cache};
use inkleaf::test_utils::test_helpers::{Gate, SyntheticProvider, synthetic_page_color};
use inkleaf::zoom::ScrollDirection;
use inkleaf::{CanvasEvent, PageCanvas, Point, ScreenInfo, Settings, Size};

const WAIT: Duration = Duration::from_secs(5);

fn canvas_with(pages: usize) -> PageCanvas {
    let mut canvas = PageCanvas::new(
        Settings::default(),
        ScreenInfo::default(),
        Size::new(400.0, 300.0),
    );
    canvas
        .open_document(Arc::new(SyntheticProvider::new(pages)), "doc.pdf")
        .unwrap();
    canvas
}

fn drain(canvas: &PageCanvas) -> Vec<CanvasEvent> {
    canvas.events().try_iter().collect()
}

/// Host reaction to switch requests
fn follow_switches(canvas: &mut PageCanvas, events: &[CanvasEvent]) {
    for event in events {
        if let CanvasEvent::AutoscrollRequested(direction) = event {
            let page = canvas.current_page();
            match direction {
                ScrollDirection::Down => canvas.load_page(page + 1),
                ScrollDirection::Up => canvas.load_page(page.saturating_sub(1)),
                ScrollDirection::Left | ScrollDirection::Right => {}
            }
            canvas.wait_for_renders(WAIT);
        }
    }
}

#[test]
fn combined_buffer_with_unrendered_bottom_is_blank() {
    let cache = shared_cache(6);
    let top = bitmap::filled(120, 160, synthetic_page_color(4));
    lock_cache(&cache).put(4, top);

    let combined =
        CombinedBuffer::from_cache(&cache, 4, Some(5), (10, 10), page_background(false));

    assert_eq!(combined.bitmap().dimensions(), (120, 320));
    assert_eq!(combined.top_page(), 4);
    assert_eq!(combined.bottom_page(), Some(5));
    assert!(band_is_solid(combined.bitmap(), 0, 160, synthetic_page_color(4)));
    assert!(band_is_solid(combined.bitmap(), 160, 320, page_background(false)));
}

#[test]
fn scrolling_through_document_reaches_last_page() {
    let mut canvas = canvas_with(3);
    canvas.load_page(0);
    canvas.wait_for_renders(WAIT);
    drain(&canvas);

    for expected in 1..=2 {
        let threshold = canvas.autoscroll_threshold();
        canvas.set_pan(0.0, threshold + 10.0);
        let events = drain(&canvas);
        assert!(events.contains(&CanvasEvent::AutoscrollRequested(ScrollDirection::Down)));
        follow_switches(&mut canvas, &events);
        assert_eq!(canvas.current_page(), expected);
    }

    // The last page sits above a blank lower half and cannot switch further.
    let buffer = canvas.combined().unwrap();
    assert_eq!(buffer.bottom_page(), None);
    assert!(band_is_solid(buffer.bitmap(), 256, 512, page_background(false)));

    canvas.set_pan(0.0, 300.0);
    let events = drain(&canvas);
    assert!(!events.iter().any(|e| matches!(e, CanvasEvent::AutoscrollRequested(_))));
    assert_eq!(canvas.current_page(), 2);
}

#[test]
fn scrolling_up_returns_to_previous_page() {
    let mut canvas = canvas_with(4);
    canvas.load_page(2);
    canvas.wait_for_renders(WAIT);
    drain(&canvas);

    canvas.set_pan(0.0, -100.0);
    let events = drain(&canvas);
    assert!(events.contains(&CanvasEvent::AutoscrollRequested(ScrollDirection::Up)));
    follow_switches(&mut canvas, &events);

    assert_eq!(canvas.current_page(), 1);
    let buffer = canvas.combined().unwrap();
    assert!(band_is_solid(buffer.bitmap(), 0, 256, synthetic_page_color(1)));
    assert!(band_is_solid(buffer.bitmap(), 256, 512, synthetic_page_color(2)));
}

#[test]
fn touch_drag_carries_over_page_switch() {
    let mut canvas = canvas_with(4);
    canvas.load_page(0);
    canvas.wait_for_renders(WAIT);
    drain(&canvas);

    let start = Instant::now();
    let touch = |phase, y| {
        inkleaf::gesture::TouchEvent::new(
            phase,
            vec![inkleaf::gesture::TouchPoint::pressed(Point::new(200.0, y))],
        )
    };
    canvas.handle_touch(&touch(inkleaf::gesture::TouchPhase::Begin, 280.0), start);
    canvas.handle_touch(
        &touch(inkleaf::gesture::TouchPhase::Update, 10.0),
        start + Duration::from_millis(16),
    );
    let events = drain(&canvas);
    follow_switches(&mut canvas, &events);

    assert_eq!(canvas.current_page(), 1);
    assert_eq!(canvas.pan(), Point::new(0.0, 14.0));
    assert!(canvas.snapshot().is_some());

    canvas.handle_touch(
        &touch(inkleaf::gesture::TouchPhase::End, 10.0),
        start + Duration::from_millis(2000),
    );
    let events = drain(&canvas);
    assert!(events.contains(&CanvasEvent::GestureEnded));
}

#[test]
fn notes_without_document_use_screen_sized_pages() {
    let dir = tempfile::tempdir().unwrap();
    let store = NoteStore::new(dir.path(), "diary");
    let ink = Rgba([0, 0, 0, 255]);
    let mut page = bitmap::filled(300, 200, TRANSPARENT);
    page.put_pixel(10, 10, ink);
    store.save_bitmap(1, &page).unwrap();

    let mut canvas = PageCanvas::new(
        Settings::default(),
        ScreenInfo::default(),
        Size::new(400.0, 300.0),
    );
    canvas.open_notes(store.clone()).unwrap();
    canvas.load_page(0);

    // Page 0 has no stored ink; page 1 below it defines the page size.
    let buffer = canvas.combined().unwrap();
    assert_eq!(buffer.bitmap().dimensions(), (300, 400));
    assert!(!buffer.top_ready());
    assert!(buffer.bottom_ready());
    assert_eq!(*buffer.bitmap().get_pixel(10, 210), ink);
    assert_eq!(canvas.page_count(), None);

    let composed = canvas.composed().unwrap();
    assert_eq!(*composed.get_pixel(0, 0), page_background(false));
    assert_eq!(*composed.get_pixel(10, 210), ink);

    page.put_pixel(20, 20, ink);
    canvas.save_note_page(1, &page).unwrap();
    assert_eq!(*canvas.combined().unwrap().bitmap().get_pixel(20, 220), ink);
    assert!(store.exists(1));
}

#[test]
fn closing_document_clears_views() {
    let mut canvas = canvas_with(2);
    canvas.load_page(0);
    canvas.wait_for_renders(WAIT);
    assert!(!lock_cache(canvas.document_cache()).is_empty());

    canvas.close_document();
    assert!(canvas.combined().is_none());
    assert!(lock_cache(canvas.document_cache()).is_empty());
    assert_eq!(canvas.page_count(), None);
}

#[test]
fn preview_fills_the_view_until_full_render_lands() {
    let gate = Gate::closed();
    let provider = SyntheticProvider::new(3)
        .with_gate(gate.clone())
        .ungated_up_to(100.0);
    let mut canvas = PageCanvas::new(
        Settings::default(),
        ScreenInfo::default(),
        Size::new(400.0, 300.0),
    );
    canvas
        .open_document(Arc::new(provider), "doc.pdf")
        .unwrap();
    canvas.load_page(0);

    let deadline = Instant::now() + WAIT;
    while !canvas.combined().unwrap().is_complete() && Instant::now() < deadline {
        canvas.tick(Instant::now());
        thread::sleep(Duration::from_millis(5));
    }

    let buffer = canvas.combined().unwrap();
    assert_eq!(buffer.bitmap().dimensions(), (192, 512));
    assert!(band_is_solid(buffer.bitmap(), 0, 256, synthetic_page_color(0)));
    assert!(band_is_solid(buffer.bitmap(), 256, 512, synthetic_page_color(1)));
    assert!(!lock_cache(canvas.document_cache()).contains(0));

    gate.open();
    canvas.wait_for_renders(WAIT);
    assert!(lock_cache(canvas.document_cache()).contains_all(&[0, 1]));
    assert!(canvas.combined().unwrap().is_complete());
}
