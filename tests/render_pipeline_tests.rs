use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use inkleaf::pdf::{
    DEFAULT_PREVIEW_DPI, RenderParams, RenderResponse, RenderService, lock_cache, shared_cache,
};
use inkleaf::test_utils::test_helpers::{Gate, SyntheticProvider, synthetic_page_color};
use serial_test::serial;

const WAIT: Duration = Duration::from_secs(5);

fn service(provider: &SyntheticProvider, workers: usize) -> RenderService {
    RenderService::new(
        Arc::new(provider.clone()),
        PathBuf::from("synthetic.pdf"),
        RenderParams::default(),
        shared_cache(6),
        workers,
    )
    .unwrap()
}

#[test]
#[serial]
fn cancel_all_blocks_until_workers_release_handles() {
    let gate = Gate::closed();
    let provider = SyntheticProvider::new(8).with_gate(gate.clone());
    let stats = provider.stats();
    let mut service = service(&provider, 2);

    for page in 0..4 {
        assert!(service.request_page(page).is_some());
    }

    // Wait until both workers sit inside a render.
    let deadline = Instant::now() + WAIT;
    while stats.live() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(stats.live(), 2);

    let opener = {
        let gate = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            gate.open();
        })
    };

    let started = Instant::now();
    service.cancel_all();
    assert!(started.elapsed() >= Duration::from_millis(90));
    opener.join().unwrap();

    assert_eq!(stats.live(), 0);
    assert_eq!(service.in_flight_count(), 0);
    assert!(lock_cache(service.cache()).is_empty());

    // Nothing left behind can still write into the cache.
    thread::sleep(Duration::from_millis(50));
    assert!(lock_cache(service.cache()).is_empty());
}

#[test]
#[serial]
fn requests_after_cancel_start_a_fresh_generation() {
    let provider = SyntheticProvider::new(4);
    let stats = provider.stats();
    let mut service = service(&provider, 2);

    service.request_page(0);
    service.wait_for_responses(WAIT);
    service.cancel_all();
    assert_eq!(stats.live(), 0);

    assert!(service.request_page(1).is_some());
    let responses = service.wait_for_responses(WAIT);
    assert!(
        responses
            .iter()
            .any(|r| matches!(r, RenderResponse::Page { page: 1, .. }))
    );
    let page = service.get_cached_page(1).unwrap();
    assert_eq!(*page.get_pixel(0, 0), synthetic_page_color(1));
}

#[test]
#[serial]
fn workers_open_private_handles() {
    let gate = Gate::closed();
    let provider = SyntheticProvider::new(8).with_gate(gate.clone());
    let stats = provider.stats();
    let mut service = service(&provider, 3);
    let baseline = stats.opened();

    for page in 0..6 {
        service.request_page(page);
    }
    let deadline = Instant::now() + WAIT;
    while stats.opened() < baseline + 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    gate.open();
    service.wait_for_responses(WAIT);

    // One handle per worker, reused across requests.
    assert_eq!(stats.opened() - baseline, 3);
    assert!(lock_cache(service.cache()).contains_all(&[0, 1, 2, 3, 4, 5]));

    service.shutdown();
    assert_eq!(stats.live(), 0);
}

#[test]
#[serial]
fn prefetch_skips_cached_and_out_of_range_pages() {
    let provider = SyntheticProvider::new(5);
    let mut service = service(&provider, 2);

    service.request_page(3);
    service.wait_for_responses(WAIT);

    let queued = service.prefetch(&[2, 3, 4, 5]);
    assert_eq!(queued.len(), 2);
    service.wait_for_responses(WAIT);
    assert!(lock_cache(service.cache()).contains_all(&[2, 3, 4]));
    assert!(!service.is_page_cached(5));
}

#[test]
#[serial]
fn text_regions_report_page_sizes() {
    let provider = SyntheticProvider::new(3).with_text(
        1,
        inkleaf::geometry::Rect::new(1.0, 2.0, 3.0, 4.0),
        "word",
    );
    let mut service = service(&provider, 1);

    let id = service.request_text_regions(vec![1, 2]).unwrap();
    let responses = service.wait_for_responses(WAIT);
    let pages = responses
        .into_iter()
        .find_map(|r| match r {
            RenderResponse::TextRegions { id: got, pages } if got == id => Some(pages),
            _ => None,
        })
        .unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].boxes[0].text, "word");
    assert!(pages[1].boxes.is_empty());
    assert_eq!(pages[1].size, inkleaf::geometry::Size::new(72.0, 96.0));
}

#[test]
#[serial]
fn preview_arrives_while_full_render_is_blocked() {
    let gate = Gate::closed();
    let provider = SyntheticProvider::new(3)
        .with_gate(gate.clone())
        .ungated_up_to(100.0);
    let stats = provider.stats();
    let mut service = service(&provider, 1);

    assert!(service.request_preview(1, DEFAULT_PREVIEW_DPI).is_some());
    assert!(service.request_page(1).is_some());

    let deadline = Instant::now() + WAIT;
    let mut preview = None;
    while preview.is_none() && Instant::now() < deadline {
        preview = service.poll_responses().into_iter().find_map(|r| match r {
            RenderResponse::Preview { page: 1, data, .. } => Some(data),
            _ => None,
        });
        thread::sleep(Duration::from_millis(5));
    }
    let preview = preview.unwrap();

    // Upscaled to the full render size and never cached.
    assert_eq!(preview.dimensions(), (192, 256));
    assert_eq!(*preview.get_pixel(0, 0), synthetic_page_color(1));
    assert_eq!(*preview.get_pixel(191, 255), synthetic_page_color(1));
    assert!(!service.is_page_cached(1));
    assert_eq!(stats.renders(), 1);

    gate.open();
    let responses = service.wait_for_responses(WAIT);
    assert!(
        responses
            .iter()
            .any(|r| matches!(r, RenderResponse::Page { page: 1, .. }))
    );
    assert!(service.is_page_cached(1));
    assert_eq!(stats.renders(), 2);

    // Nothing to preview once the full render is cached.
    assert!(service.request_preview(1, DEFAULT_PREVIEW_DPI).is_none());
}
