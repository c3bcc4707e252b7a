//! Touch gesture and inertia state machine
//!
//! The machine never owns the viewport. Every call receives a
//! [`GestureContext`] describing the current buffer, widget, zoom and pan,
//! and answers with a list of [`GestureEffect`]s the canvas applies in order.
//! Time is passed in explicitly so the whole machine is deterministic.
//!
//! ```text
//! Idle --1 finger--> SinglePan --lift, fast--> InertiaDecay --slow--> Idle
//!   |                    |--lift, slow--> Idle
//!   +--2 fingers--> PinchZoom --lift--> Idle
//! any --3+ fingers--> Idle
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::autoscroll::{self, Thresholds};
use crate::geometry::{self, Point, Rect, Size};
use crate::zoom::{ScrollDirection, Zoom, settle_pan};

/// Floor for [`GestureTuning::inertia_stop_velocity`] so inertia always ends
pub const MIN_INERTIA_STOP_VELOCITY: f64 = 0.001;

/// Tunable constants of the gesture engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureTuning {
    /// Fraction of inertia velocity kept per tick
    pub friction: f64,
    /// Inertia stops below this speed (buffer px per ms)
    pub inertia_stop_velocity: f64,
    /// Lift-off speed needed to start inertia (buffer px per ms)
    pub inertia_start_velocity: f64,
    pub tick_ms: u64,
    /// Number of velocity samples averaged at lift-off
    pub velocity_window: usize,
    pub switch_cooldown_ms: u64,
    /// Two-finger updates are ignored this long after a drag switched pages
    pub switch_recovery_ms: u64,
    pub early_save_zone_px: f64,
    pub backward_switch_px: f64,
    pub backward_save_px: f64,
    /// Below this page height thresholds become a quarter page
    pub small_page_threshold_px: f64,
}

impl Default for GestureTuning {
    fn default() -> Self {
        Self {
            friction: 0.92,
            inertia_stop_velocity: 0.05,
            inertia_start_velocity: 0.1,
            tick_ms: 16,
            velocity_window: 5,
            switch_cooldown_ms: 300,
            switch_recovery_ms: 50,
            early_save_zone_px: 300.0,
            backward_switch_px: 300.0,
            backward_save_px: 5.0,
            small_page_threshold_px: 600.0,
        }
    }
}

impl GestureTuning {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Speed below which inertia stops, never below [`MIN_INERTIA_STOP_VELOCITY`]
    #[must_use]
    pub fn stop_velocity(&self) -> f64 {
        if self.inertia_stop_velocity.is_nan() {
            return MIN_INERTIA_STOP_VELOCITY;
        }
        self.inertia_stop_velocity.max(MIN_INERTIA_STOP_VELOCITY)
    }
}

/// Which axes touch gestures may move
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureMode {
    /// Pan on both axes and pinch-zoom
    #[default]
    Full,
    /// Vertical pan only, no pinch-zoom
    YAxisOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchPhase {
    Begin,
    Update,
    End,
}

/// One finger in a touch event, in widget coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchPoint {
    pub position: Point,
    /// Where this finger first touched down
    pub press_position: Point,
}

impl TouchPoint {
    #[must_use]
    pub fn new(position: Point, press_position: Point) -> Self {
        Self {
            position,
            press_position,
        }
    }

    /// A finger that has not moved since touching down
    #[must_use]
    pub fn pressed(position: Point) -> Self {
        Self::new(position, position)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TouchEvent {
    pub phase: TouchPhase,
    pub points: Vec<TouchPoint>,
}

impl TouchEvent {
    #[must_use]
    pub fn new(phase: TouchPhase, points: Vec<TouchPoint>) -> Self {
        Self { phase, points }
    }
}

/// Viewport facts the machine needs for one step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureContext {
    /// Size of the page buffer in buffer pixels
    pub buffer: Size,
    pub widget: Size,
    pub zoom_percent: u32,
    pub pan: Point,
    /// Height of one page when a combined buffer is shown
    pub page_height: Option<f64>,
    /// Whether the visible page has unsaved edits
    pub edited: bool,
}

impl GestureContext {
    fn zoom(&self) -> f64 {
        f64::from(self.zoom_percent) / 100.0
    }
}

/// What the canvas must do in response to a gesture step
#[derive(Clone, Debug, PartialEq)]
pub enum GestureEffect {
    SetPan(Point),
    SetZoom(u32),
    /// Touch panning (drag or inertia) started or stopped
    TouchPanning(bool),
    /// Capture the given widget region for translated redraws
    CaptureSnapshot(Rect),
    /// Paint the snapshot shifted by `offset`, repainting only `dirty`
    MoveSnapshot { offset: Point, dirty: Rect },
    DropSnapshot,
    RepaintAll,
    EarlySave,
    Autoscroll(ScrollDirection),
    /// The host should call [`GestureMachine::tick`] every tick interval
    InertiaStarted,
    GestureEnded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GesturePhase {
    #[default]
    Idle,
    SinglePan,
    PinchZoom,
    InertiaDecay,
}

/// Rolling window of (velocity, elapsed ms) samples
#[derive(Clone, Debug, Default)]
pub struct VelocityTracker {
    samples: VecDeque<(Point, f64)>,
    window: usize,
}

impl VelocityTracker {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
        }
    }

    pub fn push(&mut self, velocity: Point, elapsed_ms: f64) {
        self.samples.push_back((velocity, elapsed_ms));
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average velocity weighted by each sample's elapsed time
    #[must_use]
    pub fn weighted_average(&self) -> Option<Point> {
        let total: f64 = self.samples.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return None;
        }
        let sum = self
            .samples
            .iter()
            .fold(Point::default(), |acc, (v, w)| acc + *v * *w);
        Some(sum / total)
    }
}

/// Observable gesture state
#[derive(Clone, Debug, Default)]
pub struct GestureState {
    pub phase: GesturePhase,
    pub active_touch_count: usize,
    pub velocity: VelocityTracker,
    /// Buffer px per ms
    pub inertia_velocity: Point,
    pub inertia_pan: Point,
    /// Pan when the current snapshot was captured
    pub touch_pan_start: Point,
    /// Page switches are ignored while touch panning until this instant
    pub cooldown_until: Option<Instant>,
    pub recovery_until: Option<Instant>,
    /// Pan to restore once the host has loaded the switched-to page
    pub continuation: Option<Point>,
    /// Widget region covered by the current snapshot
    pub snapshot_region: Option<Rect>,
}

pub struct GestureMachine {
    state: GestureState,
    tuning: GestureTuning,
    mode: GestureMode,
    enabled: bool,
    last_touch: Point,
    last_sample_at: Option<Instant>,
    /// Fractional zoom percent while pinching; `None` outside a pinch
    pinch_zoom: Option<f64>,
    last_pinch_scale: f64,
}

impl GestureMachine {
    #[must_use]
    pub fn new(tuning: GestureTuning, mode: GestureMode) -> Self {
        Self {
            state: GestureState {
                velocity: VelocityTracker::new(tuning.velocity_window),
                ..GestureState::default()
            },
            tuning,
            mode,
            enabled: true,
            last_touch: Point::default(),
            last_sample_at: None,
            pinch_zoom: None,
            last_pinch_scale: 1.0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> GesturePhase {
        self.state.phase
    }

    #[must_use]
    pub fn state(&self) -> &GestureState {
        &self.state
    }

    #[must_use]
    pub fn tuning(&self) -> &GestureTuning {
        &self.tuning
    }

    #[must_use]
    pub fn mode(&self) -> GestureMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: GestureMode) {
        self.mode = mode;
    }

    /// Disabled machines ignore touch input entirely
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Dragging or coasting: the states in which page switches carry over
    #[must_use]
    pub fn is_touch_panning(&self) -> bool {
        matches!(
            self.state.phase,
            GesturePhase::SinglePan | GesturePhase::InertiaDecay
        )
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.phase != GesturePhase::Idle
    }

    /// Whether a page switch continuation is waiting for the next page load
    #[must_use]
    pub fn has_continuation(&self) -> bool {
        self.state.continuation.is_some()
    }

    /// Feed one touch event
    pub fn handle(
        &mut self,
        event: &TouchEvent,
        ctx: &GestureContext,
        now: Instant,
    ) -> Vec<GestureEffect> {
        if !self.enabled {
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.state.active_touch_count = event.points.len();

        match event.points.as_slice() {
            [] => {}
            [point] => self.single_finger(event.phase, *point, ctx, now, &mut effects),
            [first, second] => {
                self.two_fingers(event.phase, *first, *second, ctx, now, &mut effects);
            }
            _ => self.reset_corrupted(&mut effects),
        }

        if event.phase == TouchPhase::End {
            self.finish_touch(ctx, &mut effects);
        }

        effects
    }

    fn single_finger(
        &mut self,
        phase: TouchPhase,
        point: TouchPoint,
        ctx: &GestureContext,
        now: Instant,
        effects: &mut Vec<GestureEffect>,
    ) {
        match phase {
            TouchPhase::Begin => self.begin_pan(point.position, ctx, now, effects),
            TouchPhase::Update if self.state.phase == GesturePhase::SinglePan => {
                self.update_pan(point.position, ctx, now, effects);
            }
            TouchPhase::Update | TouchPhase::End => {}
        }
    }

    fn begin_pan(
        &mut self,
        position: Point,
        ctx: &GestureContext,
        now: Instant,
        effects: &mut Vec<GestureEffect>,
    ) {
        if self.state.phase == GesturePhase::InertiaDecay {
            self.state.snapshot_region = None;
            effects.push(GestureEffect::DropSnapshot);
        }

        self.state.cooldown_until = None;
        self.state.phase = GesturePhase::SinglePan;
        self.last_touch = position;
        self.last_sample_at = Some(now);
        self.state.velocity.clear();
        self.state.touch_pan_start = ctx.pan;
        effects.push(GestureEffect::TouchPanning(true));

        let region = snapshot_region(ctx, ctx.pan);
        self.state.snapshot_region = Some(region);
        effects.push(GestureEffect::CaptureSnapshot(region));
    }

    fn update_pan(
        &mut self,
        position: Point,
        ctx: &GestureContext,
        now: Instant,
        effects: &mut Vec<GestureEffect>,
    ) {
        let delta = position - self.last_touch;
        if let Some(last) = self.last_sample_at {
            let elapsed_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            if elapsed_ms > 0.0 {
                let vx = match self.mode {
                    GestureMode::Full => delta.x / elapsed_ms,
                    GestureMode::YAxisOnly => 0.0,
                };
                self.state
                    .velocity
                    .push(Point::new(vx, delta.y / elapsed_ms), elapsed_ms);
            }
        }
        self.last_sample_at = Some(now);
        self.last_touch = position;

        let zoom = ctx.zoom();
        let mut target = ctx.pan - delta / zoom;
        if self.mode == GestureMode::YAxisOnly {
            target.x = ctx.pan.x;
        }
        let target = settle_pan(target, ctx.buffer, ctx.widget, zoom);
        self.move_pan(target, ctx, now, effects);
    }

    fn two_fingers(
        &mut self,
        phase: TouchPhase,
        first: TouchPoint,
        second: TouchPoint,
        ctx: &GestureContext,
        now: Instant,
        effects: &mut Vec<GestureEffect>,
    ) {
        if self.mode == GestureMode::YAxisOnly || phase == TouchPhase::End {
            return;
        }

        if phase == TouchPhase::Update
            && self.state.recovery_until.is_some_and(|until| now < until)
        {
            debug!("Ignoring two-finger update during page switch recovery");
            return;
        }

        if self.is_touch_panning() {
            effects.push(GestureEffect::TouchPanning(false));
        }
        if self.state.snapshot_region.take().is_some() {
            effects.push(GestureEffect::DropSnapshot);
        }
        if self.state.phase != GesturePhase::PinchZoom {
            self.pinch_zoom = Some(f64::from(ctx.zoom_percent));
        }
        self.state.phase = GesturePhase::PinchZoom;

        let current_dist = first.position.distance(second.position);
        let start_dist = first.press_position.distance(second.press_position);

        match phase {
            TouchPhase::Begin => {
                self.last_pinch_scale = 1.0;
                self.pinch_zoom = Some(f64::from(ctx.zoom_percent));
            }
            TouchPhase::Update if start_dist > 0.0 => {
                let scale = current_dist / start_dist;
                let change = scale / self.last_pinch_scale;
                let internal = Zoom::clamp_fractional(
                    self.pinch_zoom.unwrap_or(f64::from(ctx.zoom_percent)) * change,
                );
                self.pinch_zoom = Some(internal);
                self.last_pinch_scale = scale;

                let old_zoom = ctx.zoom();
                let new_zoom = internal / 100.0;
                let center = first.position.midpoint(second.position);
                let adjusted = center - geometry::center_offset(ctx.buffer, ctx.widget, old_zoom);
                let anchor = adjusted / old_zoom + ctx.pan;

                let percent = Zoom::clamp_percent(internal.round() as u32);
                if percent != ctx.zoom_percent {
                    effects.push(GestureEffect::SetZoom(percent));
                }

                let target = settle_pan(anchor - adjusted / new_zoom, ctx.buffer, ctx.widget, new_zoom);
                if target != ctx.pan {
                    effects.push(GestureEffect::SetPan(target));
                    self.check_autoscroll(ctx.pan.y, target, ctx, now, effects);
                }
                effects.push(GestureEffect::RepaintAll);
            }
            TouchPhase::Update | TouchPhase::End => {}
        }
    }

    fn reset_corrupted(&mut self, effects: &mut Vec<GestureEffect>) {
        debug!(
            "Resetting gesture on {} touch points",
            self.state.active_touch_count
        );
        if self.is_touch_panning() {
            effects.push(GestureEffect::TouchPanning(false));
        }
        self.state.phase = GesturePhase::Idle;
        self.state.recovery_until = None;
        self.state.continuation = None;
        self.state.velocity.clear();
        self.state.inertia_velocity = Point::default();
        self.state.snapshot_region = None;
        effects.push(GestureEffect::DropSnapshot);
        effects.push(GestureEffect::RepaintAll);
    }

    fn finish_touch(&mut self, ctx: &GestureContext, effects: &mut Vec<GestureEffect>) {
        self.last_pinch_scale = 1.0;
        self.pinch_zoom = None;
        self.state.active_touch_count = 0;

        match self.state.phase {
            GesturePhase::SinglePan => {
                let velocity = self
                    .state
                    .velocity
                    .weighted_average()
                    .map(|avg| avg / ctx.zoom());
                match velocity {
                    Some(mut v) if v.length() > self.tuning.inertia_start_velocity => {
                        if self.mode == GestureMode::YAxisOnly {
                            v.x = 0.0;
                        }
                        self.state.phase = GesturePhase::InertiaDecay;
                        self.state.inertia_velocity = v;
                        self.state.inertia_pan = ctx.pan;
                        effects.push(GestureEffect::InertiaStarted);
                    }
                    _ => self.end_touch_panning(effects),
                }
            }
            GesturePhase::PinchZoom => self.state.phase = GesturePhase::Idle,
            GesturePhase::Idle | GesturePhase::InertiaDecay => {}
        }

        self.state.recovery_until = None;
        effects.push(GestureEffect::GestureEnded);
    }

    fn end_touch_panning(&mut self, effects: &mut Vec<GestureEffect>) {
        self.state.phase = GesturePhase::Idle;
        self.state.cooldown_until = None;
        self.state.inertia_velocity = Point::default();
        self.state.snapshot_region = None;
        effects.push(GestureEffect::TouchPanning(false));
        effects.push(GestureEffect::DropSnapshot);
        effects.push(GestureEffect::RepaintAll);
    }

    /// Advance inertia by one tick
    pub fn tick(&mut self, ctx: &GestureContext, now: Instant) -> Vec<GestureEffect> {
        let mut effects = Vec::new();
        if self.state.phase != GesturePhase::InertiaDecay {
            return effects;
        }

        let mut velocity = self.state.inertia_velocity * self.tuning.friction;
        if velocity.length() < self.tuning.stop_velocity() {
            self.end_touch_panning(&mut effects);
            return effects;
        }

        let zoom = ctx.zoom();
        let mut pan = self.state.inertia_pan - velocity * self.tuning.tick_ms as f64;
        let settled = settle_pan(pan, ctx.buffer, ctx.widget, zoom);
        if settled.x != pan.x {
            velocity.x = 0.0;
        }
        pan = settled;

        self.state.inertia_velocity = velocity;
        self.state.inertia_pan = pan;
        self.move_pan(pan, ctx, now, &mut effects);
        effects
    }

    /// Apply a gesture-driven pan and evaluate page-switch thresholds
    fn move_pan(
        &mut self,
        target: Point,
        ctx: &GestureContext,
        now: Instant,
        effects: &mut Vec<GestureEffect>,
    ) {
        if target == ctx.pan {
            return;
        }

        effects.push(GestureEffect::SetPan(target));
        match self.state.snapshot_region {
            Some(region) => {
                let offset = (self.state.touch_pan_start - target) * ctx.zoom();
                let widget = Rect::new(0.0, 0.0, ctx.widget.width, ctx.widget.height);
                let dirty = region.union(&region.translated(offset)).intersection(&widget);
                effects.push(GestureEffect::MoveSnapshot { offset, dirty });
            }
            None => effects.push(GestureEffect::RepaintAll),
        }

        self.check_autoscroll(ctx.pan.y, target, ctx, now, effects);
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.state.cooldown_until.is_some_and(|until| now < until)
    }

    fn check_autoscroll(
        &mut self,
        old_y: f64,
        new_pan: Point,
        ctx: &GestureContext,
        now: Instant,
        effects: &mut Vec<GestureEffect>,
    ) {
        let Some(page_height) = ctx.page_height.filter(|h| *h > 0.0) else {
            return;
        };

        let touch_panning = self.is_touch_panning();
        if touch_panning && self.in_cooldown(now) {
            return;
        }

        let thresholds = Thresholds::for_page_height(page_height, &self.tuning);
        let result = autoscroll::check(old_y, new_pan.y, &thresholds, ctx.edited);

        if result.early_save {
            effects.push(GestureEffect::EarlySave);
        }

        let Some(switch) = result.switch else {
            return;
        };

        if touch_panning {
            self.state.continuation = Some(Point::new(new_pan.x, switch.continuation_y));
            self.state.cooldown_until =
                Some(now + Duration::from_millis(self.tuning.switch_cooldown_ms));
            if self.state.phase == GesturePhase::SinglePan {
                self.state.recovery_until =
                    Some(now + Duration::from_millis(self.tuning.switch_recovery_ms));
            }
            debug!(
                "Page switch {:?} with continuation {:?}",
                switch.direction, self.state.continuation
            );
        }
        effects.push(GestureEffect::Autoscroll(switch.direction));
    }

    /// Evaluate a pan change that did not come from a gesture (scrollbars, keys)
    pub fn check_external_pan(
        &mut self,
        old: Point,
        new: Point,
        ctx: &GestureContext,
        now: Instant,
    ) -> Vec<GestureEffect> {
        let mut effects = Vec::new();
        if old.y != new.y {
            self.check_autoscroll(old.y, new, ctx, now, &mut effects);
        }
        effects
    }

    /// A programmatic pan interrupts any running gesture
    pub fn external_pan(&mut self) -> Vec<GestureEffect> {
        self.interrupt()
    }

    /// A programmatic zoom interrupts any running gesture
    pub fn external_zoom(&mut self) -> Vec<GestureEffect> {
        self.pinch_zoom = None;
        self.last_pinch_scale = 1.0;
        self.interrupt()
    }

    fn interrupt(&mut self) -> Vec<GestureEffect> {
        let mut effects = Vec::new();
        if !self.is_active() && self.state.snapshot_region.is_none() {
            return effects;
        }
        debug!("Gesture interrupted by external viewport change");
        if self.is_touch_panning() {
            effects.push(GestureEffect::TouchPanning(false));
        }
        self.state.phase = GesturePhase::Idle;
        self.state.velocity.clear();
        self.state.inertia_velocity = Point::default();
        self.state.continuation = None;
        self.state.cooldown_until = None;
        self.state.recovery_until = None;
        self.state.snapshot_region = None;
        effects.push(GestureEffect::DropSnapshot);
        effects.push(GestureEffect::RepaintAll);
        effects
    }

    /// Forget a page switch the host refused (first or last page)
    pub fn abort_page_switch(&mut self) {
        if self.state.continuation.take().is_some() {
            debug!("Page switch aborted, continuation dropped");
        }
        self.state.cooldown_until = None;
        self.state.recovery_until = None;
    }

    /// Restore the pending continuation after the host loaded the switched-to page.
    ///
    /// `ctx` describes the newly loaded buffer.
    pub fn resume_after_page_load(&mut self, ctx: &GestureContext) -> Vec<GestureEffect> {
        let Some(pan) = self.state.continuation.take() else {
            return Vec::new();
        };

        self.state.touch_pan_start = pan;
        self.state.inertia_pan = pan;

        let mut effects = vec![GestureEffect::SetPan(pan), GestureEffect::DropSnapshot];
        self.state.snapshot_region = None;
        if self.is_touch_panning() {
            let region = snapshot_region(ctx, pan);
            self.state.snapshot_region = Some(region);
            effects.push(GestureEffect::CaptureSnapshot(region));
        }
        effects
    }
}

/// Widget region covered by the zoomed buffer at `pan`, clipped to the widget
#[must_use]
pub fn snapshot_region(ctx: &GestureContext, pan: Point) -> Rect {
    let zoom = ctx.zoom();
    let center = geometry::center_offset(ctx.buffer, ctx.widget, zoom);
    let canvas = Rect::new(
        center.x - pan.x * zoom,
        center.y - pan.y * zoom,
        ctx.buffer.width * zoom,
        ctx.buffer.height * zoom,
    );
    canvas.intersection(&Rect::new(0.0, 0.0, ctx.widget.width, ctx.widget.height))
}
