//! Page-switch threshold policy for combined (double-height) buffers
//!
//! A combined buffer shows page N on top and page N+1 below. Scrolling down
//! past the top page, or far enough above it, asks the host to switch pages.
//! Early-save zones fire slightly before a switch so pending edits can be
//! flushed while the user is still scrolling.

use crate::gesture::GestureTuning;
use crate::zoom::ScrollDirection;

/// Pan-Y values at which saves and switches fire, for one page height
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Height of one page; crossing it downward switches forward
    pub forward_switch: f64,
    pub forward_save: f64,
    pub backward_save: f64,
    pub backward_switch: f64,
}

impl Thresholds {
    /// Thresholds for a combined buffer whose top page is `page_height` tall.
    ///
    /// Short pages cannot fit the fixed offsets, so they use a quarter page instead.
    #[must_use]
    pub fn for_page_height(page_height: f64, tuning: &GestureTuning) -> Self {
        if page_height < tuning.small_page_threshold_px {
            let quarter = page_height / 4.0;
            return Self {
                forward_switch: page_height,
                forward_save: page_height - quarter,
                backward_save: -quarter,
                backward_switch: -quarter,
            };
        }

        Self {
            forward_switch: page_height,
            forward_save: page_height - tuning.early_save_zone_px,
            backward_save: -tuning.backward_save_px,
            backward_switch: -tuning.backward_switch_px,
        }
    }
}

/// A page switch triggered by a pan change
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSwitch {
    pub direction: ScrollDirection,
    /// Pan-Y on the newly loaded combined buffer showing the same content row
    pub continuation_y: f64,
}

/// Outcome of moving the vertical pan from one value to another
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ThresholdCheck {
    pub early_save: bool,
    pub switch: Option<PageSwitch>,
}

/// Evaluate a vertical pan change against the thresholds.
///
/// Only crossings count: staying beyond a threshold never fires again.
#[must_use]
pub fn check(old_y: f64, new_y: f64, thresholds: &Thresholds, edited: bool) -> ThresholdCheck {
    let mut result = ThresholdCheck::default();

    if edited {
        let forward_save = old_y < thresholds.forward_save && new_y >= thresholds.forward_save;
        let backward_save = old_y > thresholds.backward_save && new_y <= thresholds.backward_save;
        result.early_save = forward_save || backward_save;
    }

    if old_y < thresholds.forward_switch && new_y >= thresholds.forward_switch {
        result.switch = Some(PageSwitch {
            direction: ScrollDirection::Down,
            continuation_y: new_y - thresholds.forward_switch,
        });
    } else if old_y > thresholds.backward_switch && new_y <= thresholds.backward_switch {
        result.switch = Some(PageSwitch {
            direction: ScrollDirection::Up,
            continuation_y: thresholds.forward_switch + new_y,
        });
    }

    result
}
