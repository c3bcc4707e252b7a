//! Bounded LRU page cache for rendered pages
//!
//! Bitmaps are stored behind `Arc` so a caller can keep using a page after it
//! has been evicted.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use lru::LruCache;

/// Default number of pages kept per cache instance
pub const DEFAULT_PAGE_CACHE_CAPACITY: usize = 6;

/// Cache handle shared between the canvas and render workers
pub type SharedPageCache<T> = Arc<Mutex<PageCache<T>>>;

/// Create a shared cache with the given capacity
#[must_use]
pub fn shared_cache<T>(capacity: usize) -> SharedPageCache<T> {
    Arc::new(Mutex::new(PageCache::new(capacity)))
}

/// Lock a shared cache, recovering the guard if another thread panicked while holding it
pub fn lock_cache<T>(cache: &SharedPageCache<T>) -> MutexGuard<'_, PageCache<T>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-capacity page index → bitmap cache with least-recently-used eviction
pub struct PageCache<T> {
    cache: LruCache<usize, Arc<T>>,
}

impl<T> PageCache<T> {
    /// Create a new cache; a zero capacity is bumped to one
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get a cached page, promoting it to most recently used
    #[must_use]
    pub fn get(&mut self, page: usize) -> Option<Arc<T>> {
        self.cache.get(&page).cloned()
    }

    /// Get a cached page without changing its recency
    #[must_use]
    pub fn peek(&self, page: usize) -> Option<Arc<T>> {
        self.cache.peek(&page).cloned()
    }

    /// Insert a page, evicting the least recently used entry when full.
    ///
    /// Re-inserting an existing page overwrites it and promotes it.
    pub fn put(&mut self, page: usize, data: T) -> Arc<T> {
        self.put_arc(page, Arc::new(data))
    }

    /// Insert an already shared page
    pub fn put_arc(&mut self, page: usize, data: Arc<T>) -> Arc<T> {
        if let Some((evicted, _)) = self.cache.push(page, Arc::clone(&data)) {
            if evicted != page {
                debug!("Page cache evicted page {evicted} for page {page}");
            }
        }
        self.enforce_bound();
        data
    }

    /// Evict until the size bound holds again.
    ///
    /// `push` already evicts, so this only fires if the recency list and the
    /// map ever disagree.
    fn enforce_bound(&mut self) {
        while self.cache.len() > self.capacity() {
            match self.cache.pop_lru() {
                Some((victim, _)) => {
                    warn!(
                        "Page cache held {} entries over capacity {}, evicting page {victim}",
                        self.cache.len() + 1,
                        self.capacity()
                    );
                }
                None => {
                    warn!("Page cache recency list empty with {} entries, clearing", self.cache.len());
                    self.cache.clear();
                }
            }
        }
    }

    /// Remove a single page; returns whether it was present
    pub fn invalidate(&mut self, page: usize) -> bool {
        self.cache.pop(&page).is_some()
    }

    /// Drop every cached page
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Check if a page is cached without promoting it
    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        self.cache.contains(&page)
    }

    /// Check that every listed page is cached
    #[must_use]
    pub fn contains_all(&self, pages: &[usize]) -> bool {
        pages.iter().all(|page| self.cache.contains(page))
    }

    /// Number of cached pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cache capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Page indices from least to most recently used
    #[must_use]
    pub fn order(&self) -> Vec<usize> {
        self.cache.iter().rev().map(|(page, _)| *page).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_insert_and_get() {
        let mut cache = PageCache::new(6);
        cache.put(3, "three");

        assert!(cache.contains(3));
        assert_eq!(cache.get(3).as_deref(), Some(&"three"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(4).is_none());
    }

    #[test]
    fn cache_evicts_oldest_of_seven_sequential_pages() {
        let mut cache = PageCache::new(DEFAULT_PAGE_CACHE_CAPACITY);
        for page in 0..=6 {
            cache.put(page, page * 10);
        }

        assert_eq!(cache.len(), 6);
        assert!(!cache.contains(0));
        assert!(cache.contains_all(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(cache.order(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn get_promotes_entries_out_of_eviction() {
        let mut cache = PageCache::new(3);
        cache.put(1, ());
        cache.put(2, ());
        cache.put(3, ());

        let _ = cache.get(1);
        let _ = cache.get(2);
        cache.put(4, ());

        assert!(!cache.contains(3));
        assert!(cache.contains_all(&[1, 2, 4]));
        assert_eq!(cache.order(), vec![1, 2, 4]);
    }

    #[test]
    fn peek_does_not_promote() {
        let mut cache = PageCache::new(2);
        cache.put(1, ());
        cache.put(2, ());

        assert!(cache.peek(1).is_some());
        cache.put(3, ());

        assert!(!cache.contains(1));
    }

    #[test]
    fn overwrite_promotes_and_replaces() {
        let mut cache = PageCache::new(2);
        cache.put(1, "old");
        cache.put(2, "two");
        cache.put(1, "new");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.order(), vec![2, 1]);
        assert_eq!(cache.peek(1).as_deref(), Some(&"new"));

        cache.put(3, "three");
        assert!(!cache.contains(2));
    }

    #[test]
    fn evicted_arc_stays_usable() {
        let mut cache = PageCache::new(1);
        let held = cache.put(0, vec![1u8, 2, 3]);
        cache.put(1, vec![9u8]);

        assert!(!cache.contains(0));
        assert_eq!(*held, vec![1, 2, 3]);
    }

    #[test]
    fn invalidate_and_clear() {
        let mut cache = PageCache::new(6);
        for page in 0..5 {
            cache.put(page, ());
        }

        assert!(cache.invalidate(2));
        assert!(!cache.invalidate(2));
        assert_eq!(cache.order(), vec![0, 1, 3, 4]);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.order().is_empty());
    }

    #[test]
    fn contains_all_of_nothing_is_true() {
        let cache: PageCache<()> = PageCache::new(6);
        assert!(cache.contains_all(&[]));
        assert!(!cache.contains_all(&[0]));
    }

    #[test]
    fn zero_capacity_holds_one_page() {
        let mut cache = PageCache::new(0);
        cache.put(0, ());
        cache.put(1, ());
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(1));
    }

    #[test]
    fn full_cache_reinsert_does_not_evict() {
        let mut cache = PageCache::new(3);
        for page in 0..3 {
            cache.put(page, page);
        }

        cache.put(0, 100);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.order(), vec![1, 2, 0]);
        assert_eq!(cache.peek(0).as_deref(), Some(&100));
    }

    #[test]
    fn shared_cache_recovers_after_poison() {
        let cache = shared_cache::<u32>(2);
        let clone = Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        lock_cache(&cache).put(0, 7);
        assert_eq!(lock_cache(&cache).peek(0).as_deref(), Some(&7));
    }
}
