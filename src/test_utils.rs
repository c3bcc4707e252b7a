pub mod test_helpers {
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex, PoisonError};

    use image::Rgba;

    use crate::bitmap::{Bitmap, filled};
    use crate::geometry::{Rect, Size};
    use crate::pdf::{DocumentHandle, DocumentProvider, SourceError, TextBox};

    /// Latch that render calls wait on while closed
    #[derive(Clone, Debug, Default)]
    pub struct Gate {
        state: Arc<(Mutex<bool>, Condvar)>,
    }

    impl Gate {
        /// A gate that blocks renders until [`Gate::open`] is called
        #[must_use]
        pub fn closed() -> Self {
            Self {
                state: Arc::new((Mutex::new(true), Condvar::new())),
            }
        }

        pub fn open(&self) {
            let (lock, cvar) = &*self.state;
            *lock.lock().unwrap_or_else(PoisonError::into_inner) = false;
            cvar.notify_all();
        }

        fn wait(&self) {
            let (lock, cvar) = &*self.state;
            let mut closed = lock.lock().unwrap_or_else(PoisonError::into_inner);
            while *closed {
                closed = cvar.wait(closed).unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    /// Counters shared between a provider and the handles it opened
    #[derive(Debug, Default)]
    pub struct HandleStats {
        opened: AtomicUsize,
        live: AtomicUsize,
        renders: AtomicUsize,
    }

    impl HandleStats {
        #[must_use]
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn renders(&self) -> usize {
            self.renders.load(Ordering::SeqCst)
        }
    }

    /// In-memory document whose pages are solid colours
    #[derive(Clone, Debug)]
    pub struct SyntheticProvider {
        page_count: usize,
        page_size: Size,
        color: Option<Rgba<u8>>,
        failing: HashSet<usize>,
        text: HashMap<usize, Vec<(Rect, String)>>,
        gate: Gate,
        /// Renders at or below this DPI skip the gate
        ungated_dpi: f32,
        unopenable: bool,
        stats: Arc<HandleStats>,
    }

    impl SyntheticProvider {
        /// Document of `page_count` pages, 72x96 points each
        #[must_use]
        pub fn new(page_count: usize) -> Self {
            Self {
                page_count,
                page_size: Size::new(72.0, 96.0),
                color: None,
                failing: HashSet::new(),
                text: HashMap::new(),
                gate: Gate::default(),
                ungated_dpi: 0.0,
                unopenable: false,
                stats: Arc::new(HandleStats::default()),
            }
        }

        /// Render every page with the same colour
        #[must_use]
        pub fn with_color(mut self, color: Rgba<u8>) -> Self {
            self.color = Some(color);
            self
        }

        /// Make renders of `page` fail
        #[must_use]
        pub fn failing_page(mut self, page: usize) -> Self {
            self.failing.insert(page);
            self
        }

        /// Attach a text run to `page`, in page points
        #[must_use]
        pub fn with_text(mut self, page: usize, rect: Rect, text: &str) -> Self {
            self.text
                .entry(page)
                .or_default()
                .push((rect, text.to_string()));
            self
        }

        /// Block renders on `gate`
        #[must_use]
        pub fn with_gate(mut self, gate: Gate) -> Self {
            self.gate = gate;
            self
        }

        /// Let renders at or below `dpi` run while the gate is closed
        #[must_use]
        pub fn ungated_up_to(mut self, dpi: f32) -> Self {
            self.ungated_dpi = dpi;
            self
        }

        /// Make every `open` fail
        #[must_use]
        pub fn unopenable(mut self) -> Self {
            self.unopenable = true;
            self
        }

        #[must_use]
        pub fn stats(&self) -> Arc<HandleStats> {
            Arc::clone(&self.stats)
        }

        /// Colour page `page` renders with
        #[must_use]
        pub fn page_color(&self, page: usize) -> Rgba<u8> {
            self.color.unwrap_or_else(|| synthetic_page_color(page))
        }
    }

    /// Default per-page colour, distinct for neighbouring pages
    #[must_use]
    pub fn synthetic_page_color(page: usize) -> Rgba<u8> {
        Rgba([(20 + (page * 37) % 200) as u8, 90, 160, 255])
    }

    impl DocumentProvider for SyntheticProvider {
        fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, SourceError> {
            if self.unopenable {
                return Err(SourceError::Open {
                    path: path.to_path_buf(),
                    detail: "synthetic open failure".to_string(),
                });
            }
            self.stats.opened.fetch_add(1, Ordering::SeqCst);
            self.stats.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SyntheticHandle {
                doc: self.clone(),
            }))
        }
    }

    struct SyntheticHandle {
        doc: SyntheticProvider,
    }

    impl Drop for SyntheticHandle {
        fn drop(&mut self) {
            self.doc.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl SyntheticHandle {
        fn check(&self, page: usize) -> Result<(), SourceError> {
            if page >= self.doc.page_count {
                return Err(SourceError::PageOutOfRange {
                    page,
                    page_count: self.doc.page_count,
                });
            }
            Ok(())
        }
    }

    impl DocumentHandle for SyntheticHandle {
        fn page_count(&self) -> Option<usize> {
            Some(self.doc.page_count)
        }

        fn render_page(&self, page: usize, dpi: f32) -> Result<Bitmap, SourceError> {
            self.check(page)?;
            if dpi > self.doc.ungated_dpi {
                self.doc.gate.wait();
            }
            self.doc.stats.renders.fetch_add(1, Ordering::SeqCst);

            if self.doc.failing.contains(&page) {
                return Err(SourceError::render(page, "synthetic failure"));
            }

            let scale = f64::from(dpi) / 72.0;
            let width = (self.doc.page_size.width * scale).round() as u32;
            let height = (self.doc.page_size.height * scale).round() as u32;
            Ok(filled(width, height, self.doc.page_color(page)))
        }

        fn page_size(&self, page: usize) -> Result<Size, SourceError> {
            self.check(page)?;
            Ok(self.doc.page_size)
        }

        fn text_boxes(&self, page: usize) -> Result<Vec<TextBox>, SourceError> {
            self.check(page)?;
            Ok(self
                .doc
                .text
                .get(&page)
                .map(|runs| {
                    runs.iter()
                        .map(|(rect, text)| TextBox {
                            page,
                            rect: *rect,
                            text: text.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::test_helpers::*;
    use crate::pdf::DocumentProvider;

    #[test]
    fn synthetic_pages_render_at_requested_dpi() {
        let provider = SyntheticProvider::new(3).failing_page(2);
        let stats = provider.stats();
        let handle = provider.open(Path::new("x")).unwrap();

        let page = handle.render_page(1, 144.0).unwrap();
        assert_eq!(page.dimensions(), (144, 192));
        assert_eq!(*page.get_pixel(0, 0), synthetic_page_color(1));
        assert!(handle.render_page(2, 72.0).is_err());
        assert!(handle.render_page(3, 72.0).is_err());

        assert_eq!(stats.live(), 1);
        drop(handle);
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.opened(), 1);
    }
}
