//! LRU cache of extracted text geometry, keyed by the top page of a combined view

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::geometry::{PageLayout, Point, Rect};
use crate::pdf::provider::{PageText, TextBox};

/// Default number of cached text-region entries
pub const DEFAULT_TEXT_REGION_CAPACITY: usize = 5;

/// Cache key for text regions: the combined view with this page on top
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextRegionKey(pub usize);

impl TextRegionKey {
    #[must_use]
    pub fn top_page(self) -> usize {
        self.0
    }

    /// Whether this view shows `page`
    #[must_use]
    pub fn covers(self, page: usize) -> bool {
        self.0 == page || self.0 + 1 == page
    }
}

/// Text boxes of one view together with the layout they were extracted for
#[derive(Clone, Debug)]
pub struct TextRegionEntry {
    pub layout: PageLayout,
    /// Boxes in page points, top page first
    pub boxes: Vec<TextBox>,
}

impl TextRegionEntry {
    /// Build an entry from worker output, keeping only pages in the layout
    #[must_use]
    pub fn new(layout: PageLayout, pages: Vec<PageText>) -> Self {
        let mut pages = pages;
        pages.sort_by_key(|p| p.page);
        let boxes = pages
            .into_iter()
            .filter(|p| p.page == layout.top_page || layout.bottom.is_some_and(|(b, _)| b == p.page))
            .flat_map(|p| p.boxes)
            .collect();
        Self { layout, boxes }
    }

    /// Rectangle of a box in buffer pixels
    #[must_use]
    pub fn buffer_rect(&self, text_box: &TextBox) -> Option<Rect> {
        let r = text_box.rect;
        let a = self
            .layout
            .page_to_buffer(text_box.page, Point::new(r.x, r.y))?;
        let b = self
            .layout
            .page_to_buffer(text_box.page, Point::new(r.right(), r.bottom()))?;
        Some(Rect::from_corners(a, b))
    }

    /// Text of every box intersecting `selection` (buffer pixels), in reading order
    #[must_use]
    pub fn text_in(&self, selection: Rect) -> String {
        self.boxes
            .iter()
            .filter(|b| {
                self.buffer_rect(b)
                    .is_some_and(|rect| rect.intersects(&selection))
            })
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// LRU cache of text regions per combined view
pub struct TextRegionCache {
    cache: LruCache<TextRegionKey, Arc<TextRegionEntry>>,
}

impl TextRegionCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get an entry, promoting it in the LRU order
    #[must_use]
    pub fn get(&mut self, key: TextRegionKey) -> Option<Arc<TextRegionEntry>> {
        self.cache.get(&key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: TextRegionKey) -> bool {
        self.cache.contains(&key)
    }

    pub fn insert(&mut self, key: TextRegionKey, entry: TextRegionEntry) -> Arc<TextRegionEntry> {
        let arc = Arc::new(entry);
        self.cache.put(key, Arc::clone(&arc));
        arc
    }

    /// Drop every view that shows `page`
    pub fn invalidate_page(&mut self, page: usize) {
        let keys: Vec<_> = self
            .cache
            .iter()
            .filter(|(k, _)| k.covers(page))
            .map(|(k, _)| *k)
            .collect();

        for key in keys {
            self.cache.pop(&key);
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
