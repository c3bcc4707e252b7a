//! The page canvas: owns both page caches, both render services, the viewport
//! and the gesture machine, and reports what changed through an event channel.
//!
//! The canvas never paints. Hosts drain [`PageCanvas::events`], read the
//! composed buffers, and call [`PageCanvas::tick`] from their event loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use image::imageops::{self, FilterType};
use log::{debug, info, warn};

use crate::bitmap::{self, Bitmap, TRANSPARENT, page_background};
use crate::combined::{self, CombinedBuffer, PageSlot};
use crate::debounce::Debounce;
use crate::geometry::{self, DpiScale, PageLayout, Point, Rect, ScreenInfo, Size};
use crate::gesture::{
    GestureContext, GestureEffect, GestureMachine, GestureMode, GesturePhase, TouchEvent,
};
use crate::pdf::{
    DocumentProvider, NoteStore, PageText, RenderParams, RenderResponse, RenderService,
    RequestId, SharedPageCache, SourceError, lock_cache, shared_cache,
};
use crate::settings::Settings;
use crate::text_regions::{TextRegionCache, TextRegionEntry, TextRegionKey};
use crate::zoom::{ScrollDirection, Zoom};

/// PDF user space is 72 points per inch
const POINTS_PER_INCH: f64 = 72.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RepaintKind {
    Full,
    /// Only this widget region changed
    Region(Rect),
}

/// Notifications for the host UI
#[derive(Clone, Debug, PartialEq)]
pub enum CanvasEvent {
    PageLoaded(usize),
    ZoomChanged(u32),
    PanChanged { x: f64, y: f64 },
    GestureEnded,
    /// Pan crossed a page-switch threshold; the host should load the adjacent page
    AutoscrollRequested(ScrollDirection),
    /// Pan is about to cross a page-switch threshold with unsaved edits
    EarlySaveRequested,
    RepaintRequested(RepaintKind),
}

/// Widget pixels captured at gesture start, painted shifted while panning
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub bitmap: Bitmap,
    /// Widget region the bitmap was captured from
    pub region: Rect,
    /// Current translation to paint the bitmap with
    pub offset: Point,
}

struct NoteLayer {
    store: NoteStore,
    service: RenderService,
}

pub struct PageCanvas {
    settings: Settings,
    screen: ScreenInfo,
    widget: Size,
    zoom: Zoom,
    gesture: GestureMachine,
    current_page: usize,
    edited: bool,

    pdf_cache: SharedPageCache<Bitmap>,
    note_cache: SharedPageCache<Bitmap>,
    pdf: Option<RenderService>,
    /// Low-DPI stand-ins for visible document pages whose full render is pending
    previews: HashMap<usize, Arc<Bitmap>>,
    notes: Option<NoteLayer>,
    text_regions: TextRegionCache,
    pending_text: Option<(RequestId, TextRegionKey)>,
    pdf_prefetch: Debounce<usize>,
    note_prefetch: Debounce<usize>,

    pdf_buffer: Option<CombinedBuffer>,
    note_buffer: Option<CombinedBuffer>,
    snapshot: Option<Snapshot>,
    touch_panning: bool,
    next_inertia_tick: Option<Instant>,

    events_tx: Sender<CanvasEvent>,
    events_rx: Receiver<CanvasEvent>,
}

impl PageCanvas {
    #[must_use]
    pub fn new(settings: Settings, screen: ScreenInfo, widget: Size) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        let mut gesture = GestureMachine::new(settings.gesture.clone(), settings.gesture_mode);
        gesture.set_enabled(settings.touch_gestures_enabled);

        Self {
            screen,
            widget,
            zoom: Zoom::default(),
            gesture,
            current_page: 0,
            edited: false,
            pdf_cache: shared_cache(settings.page_cache_capacity),
            note_cache: shared_cache(settings.page_cache_capacity),
            pdf: None,
            previews: HashMap::new(),
            notes: None,
            text_regions: TextRegionCache::new(settings.text_region_cache_capacity),
            pending_text: None,
            pdf_prefetch: Debounce::new(settings.prefetch_delay()),
            note_prefetch: Debounce::new(settings.prefetch_delay()),
            pdf_buffer: None,
            note_buffer: None,
            snapshot: None,
            touch_panning: false,
            next_inertia_tick: None,
            events_tx,
            events_rx,
            settings,
        }
    }

    // ---- documents -------------------------------------------------------

    /// Open a rendered document, replacing any open one.
    ///
    /// In-flight renders of the previous document are cancelled and awaited
    /// before this returns. Returns the page count. An unreadable document is
    /// reported and leaves the open one in place.
    pub fn open_document(
        &mut self,
        provider: Arc<dyn DocumentProvider>,
        path: impl Into<PathBuf>,
    ) -> Result<Option<usize>, SourceError> {
        let path = path.into();
        let params = self.render_params();
        match self.pdf.as_mut() {
            Some(service) => {
                service.swap_document(provider, path.clone())?;
                service.set_params(params);
            }
            None => {
                let service = RenderService::new(
                    provider,
                    path.clone(),
                    params,
                    Arc::clone(&self.pdf_cache),
                    self.settings.render_workers,
                )?;
                lock_cache(&self.pdf_cache).clear();
                self.pdf = Some(service);
            }
        }

        self.interrupt_gesture();
        self.pending_text = None;
        self.pdf_prefetch.cancel();
        self.text_regions.clear();
        self.previews.clear();
        self.pdf_buffer = None;

        let page_count = self.page_count();
        info!("Opened document {path:?} with {page_count:?} pages");
        Ok(page_count)
    }

    /// Close the rendered document, waiting for its workers to exit
    pub fn close_document(&mut self) {
        let Some(mut service) = self.pdf.take() else {
            return;
        };
        info!("Closing document {:?}", service.doc_path());
        service.shutdown();
        lock_cache(&self.pdf_cache).clear();
        self.text_regions.clear();
        self.previews.clear();
        self.pending_text = None;
        self.pdf_prefetch.cancel();
        self.pdf_buffer = None;
        self.interrupt_gesture();
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    /// Attach a notebook whose pages live in `store`
    pub fn open_notes(&mut self, store: NoteStore) -> Result<(), SourceError> {
        let provider: Arc<dyn DocumentProvider> = Arc::new(store.clone());
        let folder = store.folder().to_path_buf();
        let params = RenderParams {
            dpi: self.settings.pdf_render_dpi,
            invert: false,
        };

        match self.notes.as_mut() {
            Some(layer) => {
                layer.service.swap_document(provider, folder)?;
                layer.store = store;
            }
            None => {
                let service = RenderService::new(
                    provider,
                    folder,
                    params,
                    Arc::clone(&self.note_cache),
                    self.settings.render_workers,
                )?;
                lock_cache(&self.note_cache).clear();
                self.notes = Some(NoteLayer { store, service });
            }
        }
        self.note_prefetch.cancel();
        self.note_buffer = None;
        info!("Opened notebook {:?}", self.notes.as_ref().map(|n| n.store.notebook_id()));
        Ok(())
    }

    pub fn close_notes(&mut self) {
        let Some(mut layer) = self.notes.take() else {
            return;
        };
        layer.service.shutdown();
        lock_cache(&self.note_cache).clear();
        self.note_prefetch.cancel();
        self.note_buffer = None;
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    // ---- page navigation -------------------------------------------------

    /// Show `page` (with `page + 1` below it) using the current time
    pub fn load_page(&mut self, page: usize) {
        self.load_page_at(page, Instant::now());
    }

    /// Show `page` (with `page + 1` below it).
    ///
    /// Visible document pages are requested from the render workers, visible
    /// note pages are read from disk right away, and neighbour prefetch is
    /// scheduled after the prefetch delay. Uncached document pages first get a
    /// cheap preview render that is shown until the full render lands. A
    /// pending gesture continuation is restored here.
    pub fn load_page_at(&mut self, page: usize, now: Instant) {
        let page = self.clamp_page(page);
        let changed = page != self.current_page;
        self.current_page = page;

        let bottom = self.bottom_page();
        self.previews
            .retain(|p, _| *p == page || bottom == Some(*p));
        let preview_dpi = self.settings.pdf_preview_dpi;
        if let Some(service) = self.pdf.as_mut() {
            for visible in [Some(page), bottom].into_iter().flatten() {
                service.request_preview(visible, preview_dpi);
                service.request_page(visible);
            }
            self.pdf_prefetch.schedule(page, now);
        }
        if self.notes.is_some() {
            self.load_visible_notes();
            self.note_prefetch.schedule(page, now);
        }

        self.rebuild_pdf_buffer();
        self.rebuild_note_buffer();
        self.request_text_regions();

        let ctx = self.gesture_context();
        let effects = self.gesture.resume_after_page_load(&ctx);
        if !effects.is_empty() {
            self.apply_effects(effects, now);
        } else if changed {
            let pan = self.settle(Point::new(self.zoom.pan.x, 0.0));
            self.update_pan(pan);
        } else {
            let pan = self.settle(self.zoom.pan);
            self.update_pan(pan);
        }

        debug!("Loaded page {page} (bottom {bottom:?})");
        self.emit(CanvasEvent::PageLoaded(page));
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    fn clamp_page(&self, page: usize) -> usize {
        match self.page_count() {
            Some(count) if count > 0 => page.min(count - 1),
            _ => page,
        }
    }

    /// Page in the lower half; `None` when the top page is the document's last
    fn bottom_page(&self) -> Option<usize> {
        let next = self.current_page + 1;
        match self.page_count() {
            Some(count) => (next < count).then_some(next),
            None => Some(next),
        }
    }

    fn is_visible(&self, page: usize) -> bool {
        page == self.current_page || self.bottom_page() == Some(page)
    }

    fn load_visible_notes(&self) {
        let Some(layer) = self.notes.as_ref() else {
            return;
        };
        let pages = [Some(self.current_page), self.bottom_page()];
        for page in pages.into_iter().flatten() {
            if lock_cache(&self.note_cache).contains(page) {
                continue;
            }
            match layer.store.load_bitmap(page) {
                Ok(bitmap) => {
                    lock_cache(&self.note_cache).put(page, bitmap);
                }
                Err(e) if e.is_missing() => {}
                Err(e) => warn!("Failed to load note page {page}: {e}"),
            }
        }
    }

    // ---- cache management ------------------------------------------------

    /// Drop everything cached for `page` and reload it if visible
    pub fn invalidate_page(&mut self, page: usize) {
        lock_cache(&self.note_cache).invalidate(page);
        lock_cache(&self.pdf_cache).invalidate(page);
        self.previews.remove(&page);
        self.text_regions.invalidate_page(page);
        if !self.is_visible(page) {
            return;
        }

        if let Some(service) = self.pdf.as_mut() {
            service.request_page(page);
        }
        self.rebuild_pdf_buffer();
        self.request_text_regions();
        self.load_visible_notes();
        self.rebuild_note_buffer();
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    /// Drop note pages `page - 1`, `page` and `page + 1`.
    ///
    /// Both combined views that show `page` are affected by an edit to it.
    pub fn invalidate_around(&mut self, page: usize) {
        let pages: Vec<usize> = [page.checked_sub(1), Some(page), Some(page + 1)]
            .into_iter()
            .flatten()
            .collect();
        {
            let mut cache = lock_cache(&self.note_cache);
            for &p in &pages {
                cache.invalidate(p);
            }
        }
        self.reload_notes_if_visible(&pages);
    }

    fn reload_notes_if_visible(&mut self, pages: &[usize]) {
        if self.notes.is_none() || !pages.iter().any(|&p| self.is_visible(p)) {
            return;
        }
        self.load_visible_notes();
        self.rebuild_note_buffer();
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    /// Persist a note page and refresh the views that show it
    pub fn save_note_page(&mut self, page: usize, bitmap: &Bitmap) -> Result<(), SourceError> {
        let Some(layer) = self.notes.as_ref() else {
            return Err(SourceError::Missing(page));
        };
        layer.store.save_bitmap(page, bitmap)?;
        self.invalidate_around(page);
        Ok(())
    }

    /// Drop every cached page bitmap and text region
    pub fn clear_cache(&mut self) {
        lock_cache(&self.pdf_cache).clear();
        lock_cache(&self.note_cache).clear();
        self.text_regions.clear();
        self.previews.clear();
        debug!("Cleared page caches");
    }

    // ---- display settings ------------------------------------------------

    fn dpi_scale(&self) -> f64 {
        geometry::effective_dpi_scale(
            &self.screen,
            DpiScale::from_setting(self.settings.dpi_scale_override),
        )
    }

    fn render_params(&self) -> RenderParams {
        RenderParams {
            dpi: self.settings.pdf_render_dpi * self.dpi_scale() as f32,
            invert: self.settings.dark_mode,
        }
    }

    /// Switch document inversion; cached pages are re-rendered
    pub fn set_dark_mode(&mut self, dark: bool) {
        if self.settings.dark_mode == dark {
            return;
        }
        self.settings.dark_mode = dark;
        self.apply_render_params();
    }

    /// Update screen metrics; a changed DPI scale re-renders cached pages
    pub fn set_screen(&mut self, screen: ScreenInfo) {
        self.screen = screen;
        self.apply_render_params();
    }

    fn apply_render_params(&mut self) {
        let params = self.render_params();
        let bottom = self.bottom_page();
        let Some(service) = self.pdf.as_mut() else {
            return;
        };
        if service.params() == params {
            return;
        }

        info!("Render parameters changed to {params:?}");
        service.set_params(params);
        self.previews.clear();
        for visible in [Some(self.current_page), bottom].into_iter().flatten() {
            service.request_preview(visible, self.settings.pdf_preview_dpi);
            service.request_page(visible);
        }
        // Text layouts depend on the render DPI and pending extractions were cancelled.
        self.text_regions.clear();
        self.pending_text = None;
        self.request_text_regions();
        self.rebuild_pdf_buffer();
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    pub fn set_edited(&mut self, edited: bool) {
        self.edited = edited;
    }

    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn set_gesture_mode(&mut self, mode: GestureMode) {
        self.settings.gesture_mode = mode;
        self.gesture.set_mode(mode);
    }

    pub fn set_touch_enabled(&mut self, enabled: bool) {
        self.settings.touch_gestures_enabled = enabled;
        if !enabled {
            self.interrupt_gesture();
        }
        self.gesture.set_enabled(enabled);
    }

    /// New widget size; any running gesture is interrupted
    pub fn resize(&mut self, widget: Size) {
        if self.widget == widget {
            return;
        }
        self.widget = widget;
        self.interrupt_gesture();
        let pan = self.settle(self.zoom.pan);
        self.update_pan(pan);
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    // ---- viewport --------------------------------------------------------

    /// Set zoom in percent (clamped to 10..=400)
    pub fn set_zoom(&mut self, percent: u32) {
        let effects = self.gesture.external_zoom();
        self.apply_effects(effects, Instant::now());

        if !self.zoom.set_percent(percent) {
            return;
        }
        self.emit(CanvasEvent::ZoomChanged(self.zoom.percent()));
        let pan = self.settle(self.zoom.pan);
        self.update_pan(pan);
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
    }

    /// Set pan in buffer pixels; may request a page switch
    pub fn set_pan(&mut self, x: f64, y: f64) {
        let now = Instant::now();
        let effects = self.gesture.external_pan();
        self.apply_effects(effects, now);

        let old = self.zoom.pan;
        let new = self.settle(Point::new(x, y));
        if !self.update_pan(new) {
            return;
        }
        self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));

        let ctx = self.gesture_context();
        let effects = self.gesture.check_external_pan(old, new, &ctx, now);
        self.apply_effects(effects, now);
    }

    /// Keyboard-style scroll by one step
    pub fn scroll(&mut self, direction: ScrollDirection) {
        let mut zoom = self.zoom;
        zoom.pan_step(direction, self.buffer_size(), self.widget);
        self.set_pan(zoom.pan.x, zoom.pan.y);
    }

    fn settle(&self, pan: Point) -> Point {
        self.zoom.settle(pan, self.buffer_size(), self.widget)
    }

    fn update_pan(&mut self, pan: Point) -> bool {
        if self.zoom.pan == pan {
            return false;
        }
        self.zoom.pan = pan;
        self.emit(CanvasEvent::PanChanged { x: pan.x, y: pan.y });
        true
    }

    #[must_use]
    pub fn zoom_percent(&self) -> u32 {
        self.zoom.percent()
    }

    #[must_use]
    pub fn pan(&self) -> Point {
        self.zoom.pan
    }

    #[must_use]
    pub fn widget_size(&self) -> Size {
        self.widget
    }

    /// Size of the active combined buffer in buffer pixels
    #[must_use]
    pub fn buffer_size(&self) -> Size {
        self.combined().map(CombinedBuffer::size).unwrap_or_default()
    }

    fn center_offset(&self) -> Point {
        geometry::center_offset(self.buffer_size(), self.widget, self.zoom.factor())
    }

    #[must_use]
    pub fn widget_to_buffer(&self, point: Point) -> Point {
        geometry::widget_to_buffer(point, self.zoom.factor(), self.zoom.pan, self.center_offset())
    }

    #[must_use]
    pub fn buffer_to_widget(&self, point: Point) -> Point {
        geometry::buffer_to_widget(point, self.zoom.factor(), self.zoom.pan, self.center_offset())
    }

    /// Pan-Y at which a forward page switch fires; 0 without a combined buffer
    #[must_use]
    pub fn autoscroll_threshold(&self) -> f64 {
        self.combined()
            .map_or(0.0, |buffer| f64::from(buffer.single_page_height()))
    }

    // ---- gestures --------------------------------------------------------

    fn gesture_context(&self) -> GestureContext {
        GestureContext {
            buffer: self.buffer_size(),
            widget: self.widget,
            zoom_percent: self.zoom.percent(),
            pan: self.zoom.pan,
            page_height: self
                .combined()
                .map(|buffer| f64::from(buffer.single_page_height())),
            edited: self.edited,
        }
    }

    /// Feed a touch event
    pub fn handle_touch(&mut self, event: &TouchEvent, now: Instant) {
        let ctx = self.gesture_context();
        let effects = self.gesture.handle(event, &ctx, now);
        self.apply_effects(effects, now);
    }

    fn interrupt_gesture(&mut self) {
        let effects = self.gesture.external_pan();
        self.apply_effects(effects, Instant::now());
        self.next_inertia_tick = None;
    }

    fn can_switch(&self, direction: ScrollDirection) -> bool {
        match direction {
            ScrollDirection::Up => self.current_page > 0,
            ScrollDirection::Down => self.bottom_page().is_some(),
            ScrollDirection::Left | ScrollDirection::Right => false,
        }
    }

    fn apply_effects(&mut self, effects: Vec<GestureEffect>, now: Instant) {
        for effect in effects {
            match effect {
                GestureEffect::SetPan(pan) => {
                    self.update_pan(pan);
                }
                GestureEffect::SetZoom(percent) => {
                    if self.zoom.set_percent(percent) {
                        self.emit(CanvasEvent::ZoomChanged(self.zoom.percent()));
                    }
                }
                GestureEffect::TouchPanning(active) => self.touch_panning = active,
                GestureEffect::CaptureSnapshot(region) => {
                    self.snapshot = self.capture_snapshot(region);
                }
                GestureEffect::MoveSnapshot { offset, dirty } => {
                    if let Some(snapshot) = self.snapshot.as_mut() {
                        snapshot.offset = offset;
                    }
                    self.emit(CanvasEvent::RepaintRequested(RepaintKind::Region(dirty)));
                }
                GestureEffect::DropSnapshot => self.snapshot = None,
                GestureEffect::RepaintAll => {
                    self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
                }
                GestureEffect::EarlySave => self.emit(CanvasEvent::EarlySaveRequested),
                GestureEffect::Autoscroll(direction) => {
                    if self.can_switch(direction) {
                        self.emit(CanvasEvent::AutoscrollRequested(direction));
                    } else {
                        debug!(
                            "Ignoring {direction:?} page switch at page {}",
                            self.current_page
                        );
                        self.gesture.abort_page_switch();
                    }
                }
                GestureEffect::InertiaStarted => {
                    self.next_inertia_tick = Some(now + self.gesture.tuning().tick_interval());
                }
                GestureEffect::GestureEnded => self.emit(CanvasEvent::GestureEnded),
            }
        }
    }

    fn capture_snapshot(&self, region: Rect) -> Option<Snapshot> {
        let view = self.render_viewport();
        bitmap::crop(&view, region).map(|bitmap| Snapshot {
            bitmap,
            region,
            offset: Point::default(),
        })
    }

    fn tick_inertia(&mut self, now: Instant) {
        let interval = self.gesture.tuning().tick_interval();
        while let Some(due) = self.next_inertia_tick {
            if self.gesture.phase() != GesturePhase::InertiaDecay {
                self.next_inertia_tick = None;
                break;
            }
            if now < due {
                break;
            }

            let ctx = self.gesture_context();
            let effects = self.gesture.tick(&ctx, due);
            let switched = effects
                .iter()
                .any(|e| matches!(e, GestureEffect::Autoscroll(_)));
            self.next_inertia_tick = Some(due + interval);
            self.apply_effects(effects, due);
            if switched {
                // Let the host load the next page before coasting further.
                break;
            }
        }
    }

    // ---- event loop ------------------------------------------------------

    /// Advance timers and collect finished renders.
    ///
    /// Call this at least every inertia tick interval while a gesture is coasting.
    pub fn tick(&mut self, now: Instant) {
        let pdf_responses = self
            .pdf
            .as_mut()
            .map(RenderService::poll_responses)
            .unwrap_or_default();
        self.process_pdf_responses(pdf_responses);

        let note_responses = self
            .notes
            .as_mut()
            .map(|layer| layer.service.poll_responses())
            .unwrap_or_default();
        self.process_note_responses(note_responses);

        if let Some(page) = self.pdf_prefetch.poll(now) {
            self.prefetch(page, false);
        }
        if let Some(page) = self.note_prefetch.poll(now) {
            self.prefetch(page, true);
        }

        self.tick_inertia(now);
    }

    /// Block until outstanding renders finish or `timeout` elapses
    pub fn wait_for_renders(&mut self, timeout: Duration) {
        let pdf_responses = self
            .pdf
            .as_mut()
            .map(|service| service.wait_for_responses(timeout))
            .unwrap_or_default();
        self.process_pdf_responses(pdf_responses);

        let note_responses = self
            .notes
            .as_mut()
            .map(|layer| layer.service.wait_for_responses(timeout))
            .unwrap_or_default();
        self.process_note_responses(note_responses);
    }

    /// Whether any render or text request is still outstanding
    #[must_use]
    pub fn has_pending_renders(&self) -> bool {
        self.pdf.as_ref().is_some_and(|s| s.in_flight_count() > 0)
            || self
                .notes
                .as_ref()
                .is_some_and(|n| n.service.in_flight_count() > 0)
    }

    fn prefetch(&mut self, page: usize, notes: bool) {
        if page != self.current_page {
            debug!("Dropping stale prefetch for page {page}, now at {}", self.current_page);
            return;
        }

        let pages: Vec<usize> = [page.checked_sub(1), Some(page + 1), Some(page + 2)]
            .into_iter()
            .flatten()
            .collect();
        let service = if notes {
            self.notes.as_mut().map(|layer| &mut layer.service)
        } else {
            self.pdf.as_mut()
        };
        if let Some(service) = service {
            let queued = service.prefetch(&pages);
            debug!("Prefetching around page {page}: {} requests queued", queued.len());
        }
    }

    fn process_pdf_responses(&mut self, responses: Vec<RenderResponse>) {
        let mut visible_changed = false;
        for response in responses {
            match response {
                RenderResponse::Page { page, .. } => {
                    self.previews.remove(&page);
                    visible_changed |= self.is_visible(page);
                }
                RenderResponse::Preview { page, data, .. } => {
                    if self.is_visible(page) && !lock_cache(&self.pdf_cache).contains(page) {
                        self.previews.insert(page, data);
                        visible_changed = true;
                    }
                }
                RenderResponse::TextRegions { id, pages } => self.store_text_regions(id, pages),
                RenderResponse::Cancelled { .. } => {}
                RenderResponse::Error { id, page, .. } => {
                    if self.pending_text.is_some_and(|(pending, _)| pending == id) {
                        self.pending_text = None;
                    }
                    debug!("Document page {page:?} unavailable");
                }
            }
        }

        if visible_changed {
            self.rebuild_pdf_buffer();
            self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
        }
    }

    fn process_note_responses(&mut self, responses: Vec<RenderResponse>) {
        let visible_changed = responses.iter().any(|response| {
            matches!(response, RenderResponse::Page { page, .. } if self.is_visible(*page))
        });
        if visible_changed {
            self.rebuild_note_buffer();
            self.emit(CanvasEvent::RepaintRequested(RepaintKind::Full));
        }
    }

    // ---- composition -----------------------------------------------------

    fn screen_fallback(&self) -> (u32, u32) {
        let size = self.screen.logical_size.scaled(self.dpi_scale());
        (
            size.width.round().max(1.0) as u32,
            size.height.round().max(1.0) as u32,
        )
    }

    fn rebuild_pdf_buffer(&mut self) {
        if self.pdf.is_none() {
            self.pdf_buffer = None;
            return;
        }
        let fallback = self
            .pdf_buffer
            .as_ref()
            .map(|b| (b.bitmap().width(), b.single_page_height()))
            .unwrap_or_else(|| self.screen_fallback());
        let top_page = self.current_page;
        let bottom_page = self.bottom_page();
        let (top, bottom) = {
            let mut cache = lock_cache(&self.pdf_cache);
            (cache.get(top_page), bottom_page.and_then(|p| cache.get(p)))
        };
        let top = top.or_else(|| self.previews.get(&top_page).cloned());
        let bottom = bottom.or_else(|| bottom_page.and_then(|p| self.previews.get(&p).cloned()));

        self.pdf_buffer = Some(CombinedBuffer::compose(
            PageSlot::new(top_page, top.as_deref()),
            bottom_page.map(|page| PageSlot::new(page, bottom.as_deref())),
            fallback,
            page_background(self.settings.dark_mode),
        ));
    }

    fn rebuild_note_buffer(&mut self) {
        if self.notes.is_none() {
            self.note_buffer = None;
            return;
        }
        let fallback = self
            .pdf_buffer
            .as_ref()
            .map(|b| (b.bitmap().width(), b.single_page_height()))
            .unwrap_or_else(|| self.screen_fallback());
        self.note_buffer = Some(CombinedBuffer::from_cache(
            &self.note_cache,
            self.current_page,
            self.bottom_page(),
            fallback,
            TRANSPARENT,
        ));
    }

    /// The buffer that defines the canvas geometry: the document layer if a
    /// document is open, the note layer otherwise
    #[must_use]
    pub fn combined(&self) -> Option<&CombinedBuffer> {
        self.pdf_buffer.as_ref().or(self.note_buffer.as_ref())
    }

    #[must_use]
    pub fn document_buffer(&self) -> Option<&CombinedBuffer> {
        self.pdf_buffer.as_ref()
    }

    #[must_use]
    pub fn note_buffer(&self) -> Option<&CombinedBuffer> {
        self.note_buffer.as_ref()
    }

    /// Note layer composited over the document layer
    #[must_use]
    pub fn composed(&self) -> Option<Bitmap> {
        combined::flatten(
            self.pdf_buffer.as_ref(),
            self.note_buffer.as_ref(),
            page_background(self.settings.dark_mode),
        )
    }

    /// What the widget shows at the current zoom and pan
    #[must_use]
    pub fn render_viewport(&self) -> Bitmap {
        let width = self.widget.width.round().max(1.0) as u32;
        let height = self.widget.height.round().max(1.0) as u32;
        let mut out = bitmap::filled(width, height, page_background(self.settings.dark_mode));

        let Some(composed) = self.composed() else {
            return out;
        };
        let zoom = self.zoom.factor();
        let buffer = Rect::new(
            0.0,
            0.0,
            f64::from(composed.width()),
            f64::from(composed.height()),
        );
        let visible = geometry::widget_rect_to_buffer(
            Rect::new(0.0, 0.0, f64::from(width), f64::from(height)),
            zoom,
            self.zoom.pan,
            self.center_offset(),
        )
        .intersection(&buffer);

        let Some(part) = bitmap::crop(&composed, visible) else {
            return out;
        };
        let scaled_width = (f64::from(part.width()) * zoom).round().max(1.0) as u32;
        let scaled_height = (f64::from(part.height()) * zoom).round().max(1.0) as u32;
        let scaled = imageops::resize(&part, scaled_width, scaled_height, FilterType::Triangle);
        let origin = self.buffer_to_widget(Point::new(visible.x.floor(), visible.y.floor()));
        bitmap::blit(
            &mut out,
            &scaled,
            origin.x.round() as i64,
            origin.y.round() as i64,
        );
        out
    }

    // ---- text ------------------------------------------------------------

    fn request_text_regions(&mut self) {
        let key = TextRegionKey(self.current_page);
        if self.text_regions.contains(key) || self.pending_text.is_some_and(|(_, k)| k == key) {
            return;
        }
        let mut pages = vec![self.current_page];
        pages.extend(self.bottom_page());
        let Some(service) = self.pdf.as_mut() else {
            return;
        };
        self.pending_text = service.request_text_regions(pages).map(|id| (id, key));
    }

    fn store_text_regions(&mut self, id: RequestId, pages: Vec<PageText>) {
        let Some((pending, key)) = self.pending_text else {
            return;
        };
        if pending != id {
            return;
        }
        self.pending_text = None;

        let top = key.top_page();
        let size_of = |page: usize| pages.iter().find(|p| p.page == page).map(|p| p.size);
        let Some(top_size) = size_of(top) else {
            return;
        };
        let scale = f64::from(self.render_params().dpi) / POINTS_PER_INCH;
        let layout = PageLayout {
            image_width: (top_size.width * scale).round(),
            single_page_height: (top_size.height * scale).round(),
            combined: true,
            top_page: top,
            top_size,
            bottom: size_of(top + 1).map(|size| (top + 1, size)),
        };
        let entry = TextRegionEntry::new(layout, pages);
        debug!("Cached {} text boxes for {key:?}", entry.boxes.len());
        self.text_regions.insert(key, entry);
    }

    /// Text of the boxes inside the widget-space selection rectangle.
    ///
    /// `None` while the text of the visible pages has not been extracted.
    pub fn selected_text(&mut self, start: Point, end: Point) -> Option<String> {
        let selection = Rect::from_corners(self.widget_to_buffer(start), self.widget_to_buffer(end));
        let entry = self
            .text_regions
            .get(TextRegionKey(self.current_page))?;
        Some(entry.text_in(selection))
    }

    // ---- accessors -------------------------------------------------------

    /// Event stream for the host
    #[must_use]
    pub fn events(&self) -> &Receiver<CanvasEvent> {
        &self.events_rx
    }

    fn emit(&self, event: CanvasEvent) {
        // The receiver lives in `self`, so sending cannot fail.
        let _ = self.events_tx.send(event);
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Page count of the open document, `None` without one
    #[must_use]
    pub fn page_count(&self) -> Option<usize> {
        self.pdf.as_ref().and_then(RenderService::page_count)
    }

    #[must_use]
    pub fn gesture(&self) -> &GestureMachine {
        &self.gesture
    }

    #[must_use]
    pub fn is_touch_panning(&self) -> bool {
        self.touch_panning
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn document_cache(&self) -> &SharedPageCache<Bitmap> {
        &self.pdf_cache
    }

    #[must_use]
    pub fn note_cache(&self) -> &SharedPageCache<Bitmap> {
        &self.note_cache
    }
}
