use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use inkleaf::gesture::{TouchEvent, TouchPhase, TouchPoint};
use inkleaf::pdf::NoteStore;
use inkleaf::settings::load_settings;
use inkleaf::zoom::ScrollDirection;
use inkleaf::{CanvasEvent, PageCanvas, Point, ScreenInfo, Size, panic_handler};

/// How long to wait for visible pages before giving up
const RENDER_TIMEOUT: Duration = Duration::from_secs(10);
/// Samples in a simulated fling
const FLING_STEPS: u32 = 5;

/// Headless driver for the page canvas
#[derive(Parser, Debug)]
#[command(name = "inkleaf", version, about)]
struct Args {
    /// PDF document to show under the notes
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Folder holding note pages
    #[arg(long)]
    notes: Option<PathBuf>,

    /// Notebook id used in note page file names
    #[arg(long, default_value = "notebook")]
    notebook: String,

    /// Page to show on top of the canvas
    #[arg(long, default_value_t = 0)]
    page: usize,

    /// Zoom in percent
    #[arg(long, default_value_t = 100)]
    zoom: u32,

    /// Widget size as WIDTHxHEIGHT
    #[arg(long, default_value = "1280x800", value_parser = parse_size)]
    widget: Size,

    /// Force dark mode regardless of settings
    #[arg(long)]
    dark: bool,

    /// Settings file instead of the user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulate an upward fling at this speed (widget px per ms)
    #[arg(long)]
    fling: Option<f64>,

    /// Write the composed combined buffer to this PNG
    #[arg(long)]
    export: Option<PathBuf>,

    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,

    #[arg(long, default_value = "inkleaf.log")]
    log_file: PathBuf,
}

fn parse_size(value: &str) -> Result<Size, String> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let width: f64 = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let height: f64 = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if width <= 0.0 || height <= 0.0 {
        return Err("widget size must be positive".to_string());
    }
    Ok(Size::new(width, height))
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse()
        .map_err(|_| format!("unknown log level {value:?}"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    WriteLogger::init(
        args.log_level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("cannot create log file {:?}", args.log_file))?,
    )?;
    panic_handler::initialize_panic_handler();

    info!("Starting inkleaf");

    let mut settings = load_settings(args.config.as_deref());
    if args.dark {
        settings.dark_mode = true;
    }

    let mut canvas = PageCanvas::new(settings, ScreenInfo::default(), args.widget);
    if let Some(path) = &args.pdf {
        open_pdf(&mut canvas, path)?;
    }
    if let Some(folder) = &args.notes {
        canvas
            .open_notes(NoteStore::new(folder, args.notebook.clone()))
            .with_context(|| format!("cannot open notes in {folder:?}"))?;
    }
    if args.pdf.is_none() && args.notes.is_none() {
        anyhow::bail!("nothing to show: pass --pdf and/or --notes");
    }

    canvas.load_page(args.page);
    canvas.set_zoom(args.zoom);
    canvas.wait_for_renders(RENDER_TIMEOUT);
    drive_events(&mut canvas, Instant::now());

    if let Some(speed) = args.fling {
        fling(&mut canvas, speed);
    }

    if let Some(out) = &args.export {
        let composed = canvas
            .composed()
            .context("no page buffer to export")?;
        composed
            .save(out)
            .with_context(|| format!("cannot write {out:?}"))?;
        info!("Exported {}x{} combined buffer to {out:?}", composed.width(), composed.height());
    }

    let pan = canvas.pan();
    println!(
        "page {} of {}, zoom {}%, pan ({:.1}, {:.1})",
        canvas.current_page() + 1,
        canvas
            .page_count()
            .map_or_else(|| "?".to_string(), |n| n.to_string()),
        canvas.zoom_percent(),
        pan.x,
        pan.y
    );

    info!("Shutting down inkleaf");
    Ok(())
}

#[cfg(feature = "pdf")]
fn open_pdf(canvas: &mut PageCanvas, path: &std::path::Path) -> Result<()> {
    use std::sync::Arc;

    let pages = canvas
        .open_document(Arc::new(inkleaf::pdf::MupdfProvider), path)
        .with_context(|| format!("cannot open {path:?}"))?;
    info!("Document has {pages:?} pages");
    Ok(())
}

#[cfg(not(feature = "pdf"))]
fn open_pdf(_canvas: &mut PageCanvas, path: &std::path::Path) -> Result<()> {
    anyhow::bail!("cannot open {path:?}: built without the `pdf` feature")
}

/// React to canvas events the way an interactive host would
fn drive_events(canvas: &mut PageCanvas, now: Instant) {
    let events: Vec<CanvasEvent> = canvas.events().try_iter().collect();
    for event in events {
        match event {
            CanvasEvent::AutoscrollRequested(direction) => {
                let page = canvas.current_page();
                let next = match direction {
                    ScrollDirection::Down => page + 1,
                    ScrollDirection::Up => page.saturating_sub(1),
                    ScrollDirection::Left | ScrollDirection::Right => page,
                };
                info!("Switching from page {page} to {next}");
                canvas.load_page_at(next, now);
                canvas.wait_for_renders(RENDER_TIMEOUT);
            }
            CanvasEvent::EarlySaveRequested => {
                debug!("Early save requested on page {}", canvas.current_page());
            }
            other => debug!("Canvas event: {other:?}"),
        }
    }
}

/// Drag upward at `speed`, release, and let inertia run out on a virtual clock
fn fling(canvas: &mut PageCanvas, speed: f64) {
    let tick = canvas.settings().gesture.tick_interval();
    let step = speed * tick.as_secs_f64() * 1000.0;
    let widget = canvas.widget_size();
    let start_at = Point::new(widget.width / 2.0, widget.height * 0.8);

    let mut now = Instant::now();
    let mut position = start_at;
    canvas.handle_touch(
        &TouchEvent::new(TouchPhase::Begin, vec![TouchPoint::pressed(position)]),
        now,
    );
    for _ in 0..FLING_STEPS {
        now += tick;
        position.y -= step;
        canvas.handle_touch(
            &TouchEvent::new(
                TouchPhase::Update,
                vec![TouchPoint::new(position, start_at)],
            ),
            now,
        );
        drive_events(canvas, now);
    }
    canvas.handle_touch(
        &TouchEvent::new(TouchPhase::End, vec![TouchPoint::new(position, start_at)]),
        now,
    );

    let mut ticks = 0u32;
    while canvas.gesture().is_active() {
        now += tick;
        canvas.tick(now);
        drive_events(canvas, now);
        ticks += 1;
        if ticks > 10_000 {
            warn!("Inertia did not settle, giving up");
            break;
        }
    }
    info!("Fling settled after {ticks} ticks");
}
