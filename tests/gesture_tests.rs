use std::time::{Duration, Instant};

use inkleaf::geometry::{Point, Size};
use inkleaf::gesture::{
    GestureContext, GestureEffect, GestureMachine, GestureMode, GesturePhase, GestureTuning,
    TouchEvent, TouchPhase, TouchPoint,
};
use inkleaf::zoom::ScrollDirection;

/// Minimal host: applies pans and records page switches
struct Host {
    ctx: GestureContext,
    switches: Vec<ScrollDirection>,
}

impl Host {
    fn new(ctx: GestureContext) -> Self {
        Self {
            ctx,
            switches: Vec::new(),
        }
    }

    fn apply(&mut self, effects: Vec<GestureEffect>) {
        for effect in effects {
            match effect {
                GestureEffect::SetPan(pan) => self.ctx.pan = pan,
                GestureEffect::SetZoom(percent) => self.ctx.zoom_percent = percent,
                GestureEffect::Autoscroll(direction) => self.switches.push(direction),
                _ => {}
            }
        }
    }
}

fn finger(phase: TouchPhase, y: f64) -> TouchEvent {
    TouchEvent::new(phase, vec![TouchPoint::pressed(Point::new(500.0, y))])
}

fn tall_context() -> GestureContext {
    GestureContext {
        buffer: Size::new(1000.0, 10_000.0),
        widget: Size::new(1000.0, 800.0),
        zoom_percent: 100,
        pan: Point::new(0.0, 1000.0),
        page_height: None,
        edited: false,
    }
}

#[test]
fn fling_coasts_with_geometric_decay_then_stops() {
    let tuning = GestureTuning::default();
    let tick = tuning.tick_interval();
    let mut machine = GestureMachine::new(tuning.clone(), GestureMode::Full);
    let mut host = Host::new(tall_context());
    let mut now = Instant::now();

    let mut y = 700.0;
    host.apply(machine.handle(&finger(TouchPhase::Begin, y), &host.ctx, now));
    for _ in 0..5 {
        now += Duration::from_millis(16);
        y -= 16.0;
        host.apply(machine.handle(&finger(TouchPhase::Update, y), &host.ctx, now));
    }
    assert_eq!(host.ctx.pan, Point::new(0.0, 1080.0));

    let effects = machine.handle(&finger(TouchPhase::End, y), &host.ctx, now);
    assert!(effects.contains(&GestureEffect::InertiaStarted));
    host.apply(effects);
    assert_eq!(machine.phase(), GesturePhase::InertiaDecay);

    let mut expected_pan = 1080.0;
    let mut speed: f64 = 1.0;
    let mut ticks = 0;
    while machine.phase() == GesturePhase::InertiaDecay {
        now += tick;
        host.apply(machine.tick(&host.ctx, now));
        ticks += 1;

        speed *= tuning.friction;
        if speed >= tuning.inertia_stop_velocity {
            expected_pan += speed * tuning.tick_ms as f64;
            assert!((machine.state().inertia_velocity.y + speed).abs() < 1e-9);
        }
        assert!((host.ctx.pan.y - expected_pan).abs() < 1e-6, "tick {ticks}");
        assert!(ticks < 1_000);
    }

    // 0.92^36 is the first power below 0.05.
    assert_eq!(ticks, 36);
    assert_eq!(machine.phase(), GesturePhase::Idle);
    assert!(!machine.is_touch_panning());
}

#[test]
fn drag_across_boundary_switches_once_and_resumes() {
    let mut machine = GestureMachine::new(GestureTuning::default(), GestureMode::Full);
    let mut host = Host::new(GestureContext {
        buffer: Size::new(1000.0, 4000.0),
        page_height: Some(2000.0),
        pan: Point::new(0.0, 1900.0),
        ..tall_context()
    });
    let start = Instant::now();

    host.apply(machine.handle(&finger(TouchPhase::Begin, 600.0), &host.ctx, start));
    host.apply(machine.handle(
        &finger(TouchPhase::Update, 450.0),
        &host.ctx,
        start + Duration::from_millis(16),
    ));
    assert_eq!(host.switches, vec![ScrollDirection::Down]);
    assert_eq!(host.ctx.pan.y, 2050.0);

    // The host loads the next page; the drag continues on the new buffer.
    host.apply(machine.resume_after_page_load(&host.ctx));
    assert_eq!(host.ctx.pan, Point::new(0.0, 50.0));
    assert!(machine.is_touch_panning());

    for step in 1..=10u32 {
        host.apply(machine.handle(
            &finger(TouchPhase::Update, 450.0 - 10.0 * f64::from(step)),
            &host.ctx,
            start + Duration::from_millis(16 + 16 * u64::from(step)),
        ));
    }
    assert_eq!(host.ctx.pan.y, 150.0);
    assert_eq!(host.switches.len(), 1);
}

#[test]
fn external_scroll_switch_has_no_continuation() {
    let mut machine = GestureMachine::new(GestureTuning::default(), GestureMode::Full);
    let ctx = GestureContext {
        page_height: Some(1500.0),
        pan: Point::new(0.0, 1400.0),
        ..tall_context()
    };

    let effects = machine.check_external_pan(
        ctx.pan,
        Point::new(0.0, 1540.0),
        &ctx,
        Instant::now(),
    );
    assert_eq!(effects, vec![GestureEffect::Autoscroll(ScrollDirection::Down)]);
    assert!(!machine.has_continuation());
    assert!(machine.resume_after_page_load(&ctx).is_empty());
}

#[test]
fn edited_page_requests_save_before_switch() {
    let mut machine = GestureMachine::new(GestureTuning::default(), GestureMode::Full);
    let ctx = GestureContext {
        page_height: Some(2000.0),
        pan: Point::new(0.0, 1600.0),
        edited: true,
        ..tall_context()
    };

    let effects =
        machine.check_external_pan(ctx.pan, Point::new(0.0, 1750.0), &ctx, Instant::now());
    assert_eq!(effects, vec![GestureEffect::EarlySave]);
}
