use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gesture::{GestureMode, GestureTuning, MIN_INERTIA_STOP_VELOCITY};
use crate::pdf::{
    DEFAULT_PAGE_CACHE_CAPACITY, DEFAULT_PREVIEW_DPI, DEFAULT_RENDER_DPI, DEFAULT_WORKERS,
};
use crate::text_regions::DEFAULT_TEXT_REGION_CAPACITY;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "inkleaf";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Inverts document pages and darkens blank fill
    #[serde(default)]
    pub dark_mode: bool,

    /// Device pixel scale; `0.0` or less detects it from the screen
    #[serde(default)]
    pub dpi_scale_override: f64,

    #[serde(default = "default_render_dpi")]
    pub pdf_render_dpi: f32,

    /// Quick preview resolution shown until a full render lands; `0.0` disables it
    #[serde(default = "default_preview_dpi")]
    pub pdf_preview_dpi: f32,

    #[serde(default = "default_page_cache_capacity")]
    pub page_cache_capacity: usize,

    #[serde(default = "default_text_region_capacity")]
    pub text_region_cache_capacity: usize,

    #[serde(default = "default_render_workers")]
    pub render_workers: usize,

    #[serde(default = "default_prefetch_delay_ms")]
    pub prefetch_delay_ms: u64,

    #[serde(default)]
    pub gesture_mode: GestureMode,

    #[serde(default = "default_true")]
    pub touch_gestures_enabled: bool,

    #[serde(default)]
    pub gesture: GestureTuning,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_render_dpi() -> f32 {
    DEFAULT_RENDER_DPI
}

fn default_preview_dpi() -> f32 {
    DEFAULT_PREVIEW_DPI
}

fn default_page_cache_capacity() -> usize {
    DEFAULT_PAGE_CACHE_CAPACITY
}

fn default_text_region_capacity() -> usize {
    DEFAULT_TEXT_REGION_CAPACITY
}

fn default_render_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_prefetch_delay_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            dark_mode: false,
            dpi_scale_override: 0.0,
            pdf_render_dpi: default_render_dpi(),
            pdf_preview_dpi: default_preview_dpi(),
            page_cache_capacity: default_page_cache_capacity(),
            text_region_cache_capacity: default_text_region_capacity(),
            render_workers: default_render_workers(),
            prefetch_delay_ms: default_prefetch_delay_ms(),
            gesture_mode: GestureMode::default(),
            touch_gestures_enabled: true,
            gesture: GestureTuning::default(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn prefetch_delay(&self) -> Duration {
        Duration::from_millis(self.prefetch_delay_ms)
    }

    /// Replace out-of-range values with defaults
    fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.page_cache_capacity == 0 {
            warn!("page_cache_capacity must be positive, using {}", defaults.page_cache_capacity);
            self.page_cache_capacity = defaults.page_cache_capacity;
        }
        if self.text_region_cache_capacity == 0 {
            warn!(
                "text_region_cache_capacity must be positive, using {}",
                defaults.text_region_cache_capacity
            );
            self.text_region_cache_capacity = defaults.text_region_cache_capacity;
        }
        if self.render_workers == 0 {
            warn!("render_workers must be positive, using {}", defaults.render_workers);
            self.render_workers = defaults.render_workers;
        }
        if !(self.pdf_render_dpi.is_finite() && self.pdf_render_dpi > 0.0) {
            warn!("Invalid pdf_render_dpi {}, using {}", self.pdf_render_dpi, defaults.pdf_render_dpi);
            self.pdf_render_dpi = defaults.pdf_render_dpi;
        }
        if !(self.gesture.friction > 0.0 && self.gesture.friction < 1.0) {
            warn!(
                "Gesture friction must be in (0, 1), using {}",
                defaults.gesture.friction
            );
            self.gesture.friction = defaults.gesture.friction;
        }
        if !(self.gesture.inertia_stop_velocity.is_finite()
            && self.gesture.inertia_stop_velocity >= MIN_INERTIA_STOP_VELOCITY)
        {
            warn!(
                "Inertia stop velocity must be at least {MIN_INERTIA_STOP_VELOCITY}, using {}",
                defaults.gesture.inertia_stop_velocity
            );
            self.gesture.inertia_stop_velocity = defaults.gesture.inertia_stop_velocity;
        }
        if !(self.pdf_preview_dpi.is_finite() && self.pdf_preview_dpi >= 0.0) {
            warn!("Invalid pdf_preview_dpi {}, disabling previews", self.pdf_preview_dpi);
            self.pdf_preview_dpi = 0.0;
        }
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `path`, or from the user config directory.
///
/// A missing file is created with defaults. Unreadable or invalid files are
/// logged and replaced by defaults in memory only.
#[must_use]
pub fn load_settings(path: Option<&Path>) -> Settings {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match preferred_config_path() {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using default settings");
                return Settings::default();
            }
        },
    };

    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        save_settings_to_file(&settings, &path);
        return settings;
    }

    load_settings_from_path(&path).unwrap_or_default()
}

fn load_settings_from_path(path: &Path) -> Option<Settings> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                settings.sanitize();
                Some(settings)
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                None
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            None
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // v0 files stored the DPI override as a percentage.
    if settings.version == 0 && settings.dpi_scale_override > 10.0 {
        settings.dpi_scale_override /= 100.0;
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let body = match serde_yaml::to_string(settings) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize settings: {e}");
            return;
        }
    };

    match fs::write(path, format!("{SETTINGS_HEADER}{body}")) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# inkleaf canvas settings
# ============================================================================
# dpi_scale_override: 0 detects the scale from the screen
# gesture_mode: full | y_axis_only
# gesture: touch tuning (velocities in buffer pixels per millisecond)

"#;
