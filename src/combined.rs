//! Double-height buffers stacking page N above page N+1
//!
//! A combined buffer is always a fresh composition. Cached page bitmaps are
//! only read, so drawing into the combined buffer never touches them.

use std::sync::Arc;

use image::Rgba;
use log::debug;

use crate::bitmap::{self, Bitmap};
use crate::geometry::Size;
use crate::pdf::cache::{SharedPageCache, lock_cache};

/// One half of a combined buffer: the logical page and its bitmap if available
#[derive(Clone, Copy, Debug)]
pub struct PageSlot<'a> {
    pub page: usize,
    pub bitmap: Option<&'a Bitmap>,
}

impl<'a> PageSlot<'a> {
    #[must_use]
    pub fn new(page: usize, bitmap: Option<&'a Bitmap>) -> Self {
        Self { page, bitmap }
    }

    #[must_use]
    pub fn empty(page: usize) -> Self {
        Self { page, bitmap: None }
    }
}

#[derive(Clone, Debug)]
pub struct CombinedBuffer {
    top_page: usize,
    /// Page shown in the lower half; `None` past the last page
    bottom_page: Option<usize>,
    top_ready: bool,
    bottom_ready: bool,
    single_page_height: u32,
    bitmap: Bitmap,
}

impl CombinedBuffer {
    /// Stack `top` above `bottom`.
    ///
    /// The page height comes from whichever half is rendered, falling back to
    /// `fallback` when neither is. Missing halves are filled with `fill`.
    #[must_use]
    pub fn compose(
        top: PageSlot<'_>,
        bottom: Option<PageSlot<'_>>,
        fallback: (u32, u32),
        fill: Rgba<u8>,
    ) -> Self {
        let bottom_bitmap = bottom.and_then(|slot| slot.bitmap);
        let reference = top.bitmap.or(bottom_bitmap);

        let (width, single_page_height) = match reference {
            Some(bitmap) => {
                let width = top
                    .bitmap
                    .map_or(0, Bitmap::width)
                    .max(bottom_bitmap.map_or(0, Bitmap::width));
                (width, bitmap.height())
            }
            None => fallback,
        };
        let width = width.max(1);
        let single_page_height = single_page_height.max(1);

        let mut canvas = bitmap::filled(width, single_page_height * 2, fill);
        if let Some(top_bitmap) = top.bitmap {
            bitmap::blit(&mut canvas, top_bitmap, 0, 0);
        }
        if let Some(bottom_bitmap) = bottom_bitmap {
            bitmap::blit(&mut canvas, bottom_bitmap, 0, i64::from(single_page_height));
        }

        Self {
            top_page: top.page,
            bottom_page: bottom.map(|slot| slot.page),
            top_ready: top.bitmap.is_some(),
            bottom_ready: bottom_bitmap.is_some(),
            single_page_height,
            bitmap: canvas,
        }
    }

    /// Compose from a page cache, promoting both pages.
    ///
    /// Bitmaps are cloned out of their `Arc`s before composing so the cache
    /// lock is released first.
    #[must_use]
    pub fn from_cache(
        cache: &SharedPageCache<Bitmap>,
        top_page: usize,
        bottom_page: Option<usize>,
        fallback: (u32, u32),
        fill: Rgba<u8>,
    ) -> Self {
        let (top, bottom): (Option<Arc<Bitmap>>, Option<Arc<Bitmap>>) = {
            let mut cache = lock_cache(cache);
            (cache.get(top_page), bottom_page.and_then(|p| cache.get(p)))
        };

        debug!(
            "Composing pages {top_page}/{bottom_page:?} (top cached: {}, bottom cached: {})",
            top.is_some(),
            bottom.is_some()
        );

        Self::compose(
            PageSlot::new(top_page, top.as_deref()),
            bottom_page.map(|page| PageSlot::new(page, bottom.as_deref())),
            fallback,
            fill,
        )
    }

    #[must_use]
    pub fn top_page(&self) -> usize {
        self.top_page
    }

    #[must_use]
    pub fn bottom_page(&self) -> Option<usize> {
        self.bottom_page
    }

    /// Whether the top half shows rendered content rather than fill
    #[must_use]
    pub fn top_ready(&self) -> bool {
        self.top_ready
    }

    #[must_use]
    pub fn bottom_ready(&self) -> bool {
        self.bottom_ready
    }

    /// Both existing halves show rendered content
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.top_ready && (self.bottom_page.is_none() || self.bottom_ready)
    }

    #[must_use]
    pub fn single_page_height(&self) -> u32 {
        self.single_page_height
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(
            f64::from(self.bitmap.width()),
            f64::from(self.bitmap.height()),
        )
    }

    #[must_use]
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Drawing surface; the cached bitmaps it was composed from are unaffected
    pub fn bitmap_mut(&mut self) -> &mut Bitmap {
        &mut self.bitmap
    }
}

/// Alpha-composite a note layer over a document buffer into a new bitmap.
///
/// Without a document buffer the layer is composited over `background`.
#[must_use]
pub fn flatten(
    base: Option<&CombinedBuffer>,
    layer: Option<&CombinedBuffer>,
    background: Rgba<u8>,
) -> Option<Bitmap> {
    let mut out = match (base, layer) {
        (Some(base), _) => base.bitmap.clone(),
        (None, Some(layer)) => {
            bitmap::filled(layer.bitmap.width(), layer.bitmap.height(), background)
        }
        (None, None) => return None,
    };
    if let Some(layer) = layer {
        bitmap::composite_over(&mut out, &layer.bitmap);
    }
    Some(out)
}
