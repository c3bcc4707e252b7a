use inkleaf::geometry::{
    PageLayout, Point, Rect, Size, buffer_rect_to_widget, buffer_to_widget, center_offset,
    widget_rect_to_buffer, widget_to_buffer,
};
use inkleaf::zoom::{Zoom, settle_pan};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EPSILON: f64 = 1e-3;

fn close(a: Point, b: Point) -> bool {
    (a.x - b.x).abs() < EPSILON && (a.y - b.y).abs() < EPSILON
}

#[test]
fn widget_buffer_round_trip_holds_across_zoom_and_pan() {
    let mut rng = StdRng::seed_from_u64(42);
    let buffer = Size::new(1200.0, 3400.0);
    let widget = Size::new(900.0, 700.0);

    for percent in [10, 100, 400] {
        let zoom = f64::from(percent) / 100.0;
        let center = center_offset(buffer, widget, zoom);
        for pan in [Point::new(0.0, 0.0), Point::new(500.0, 1200.0)] {
            for _ in 0..100 {
                let p = Point::new(
                    rng.gen_range(-200.0..1100.0),
                    rng.gen_range(-200.0..900.0),
                );
                let back = buffer_to_widget(widget_to_buffer(p, zoom, pan, center), zoom, pan, center);
                assert!(close(p, back), "{p:?} -> {back:?} at {percent}% pan {pan:?}");
            }
        }
    }
}

#[test]
fn rect_mapping_round_trips() {
    let buffer = Size::new(800.0, 2000.0);
    let widget = Size::new(1000.0, 600.0);
    let zoom = 1.5;
    let pan = Point::new(20.0, 300.0);
    let center = center_offset(buffer, widget, zoom);

    let rect = Rect::new(100.0, 400.0, 50.0, 25.0);
    let widget_rect = buffer_rect_to_widget(rect, zoom, pan, center);
    assert!((widget_rect.width - 75.0).abs() < EPSILON);

    let back = widget_rect_to_buffer(widget_rect, zoom, pan, center);
    assert!(close(Point::new(back.x, back.y), Point::new(rect.x, rect.y)));
    assert!((back.height - rect.height).abs() < EPSILON);
}

#[test]
fn narrow_buffer_is_centered_and_pan_locked() {
    let buffer = Size::new(400.0, 2000.0);
    let widget = Size::new(1000.0, 600.0);

    let center = center_offset(buffer, widget, 1.0);
    assert_eq!(center, Point::new(300.0, 0.0));

    let pan = settle_pan(Point::new(150.0, 700.0), buffer, widget, 1.0);
    assert_eq!(pan, Point::new(0.0, 700.0));
}

#[test]
fn short_buffer_zeroes_vertical_pan() {
    let buffer = Size::new(2000.0, 400.0);
    let widget = Size::new(1000.0, 600.0);

    let pan = Zoom::new(100).settle(Point::new(5000.0, -80.0), buffer, widget);
    assert_eq!(pan, Point::new(1000.0, 0.0));
}

#[test]
fn page_points_round_trip_through_combined_layout() {
    let layout = PageLayout {
        image_width: 816.0,
        single_page_height: 1056.0,
        combined: true,
        top_page: 4,
        top_size: Size::new(612.0, 792.0),
        bottom: Some((5, Size::new(612.0, 792.0))),
    };

    for (page, point) in [(4, Point::new(100.0, 700.0)), (5, Point::new(10.0, 20.0))] {
        let buffer = layout.page_to_buffer(page, point).unwrap();
        let (back_page, back) = layout.buffer_to_page(buffer).unwrap();
        assert_eq!(back_page, page);
        assert!(close(back, point));
    }

    let last = PageLayout { bottom: None, ..layout };
    assert!(last.buffer_to_page(Point::new(10.0, 1500.0)).is_none());
}
