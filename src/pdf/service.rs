//! Render service - manages worker pool and cache

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, info, warn};

use super::cache::{SharedPageCache, lock_cache};
use super::cancel::CancellationToken;
use super::provider::{DocumentProvider, SourceError};
use super::request::{RenderParams, RenderRequest, RenderResponse, RequestId};
use super::worker::render_worker;
use crate::bitmap::Bitmap;

/// Default number of render worker threads
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug)]
enum PendingRequest {
    Page(usize),
    Prefetch(usize),
    Preview(usize),
    TextRegions,
}

impl PendingRequest {
    /// Page of a full resolution render
    fn page(&self) -> Option<usize> {
        match self {
            Self::Page(p) | Self::Prefetch(p) => Some(*p),
            Self::Preview(_) | Self::TextRegions => None,
        }
    }
}

/// Manages page rendering with worker threads and a shared page cache.
///
/// Workers are spawned per generation. [`RenderService::cancel_all`] ends the
/// current generation and blocks until every worker has exited; the next
/// request spawns a fresh generation with a fresh cancellation token.
pub struct RenderService {
    provider: Arc<dyn DocumentProvider>,
    doc_path: PathBuf,
    params: RenderParams,
    cache: SharedPageCache<Bitmap>,
    num_workers: usize,
    request_tx: Sender<RenderRequest>,
    response_rx: Receiver<RenderResponse>,
    workers: Vec<JoinHandle<()>>,
    token: CancellationToken,
    next_request_id: u64,
    pending_requests: HashMap<RequestId, PendingRequest>,
    page_count: Option<usize>,
}

impl RenderService {
    /// Create a new render service and spawn its workers.
    ///
    /// The document is opened once up front to read its page count; an
    /// unreadable document is reported instead of spawning workers.
    pub fn new(
        provider: Arc<dyn DocumentProvider>,
        doc_path: PathBuf,
        params: RenderParams,
        cache: SharedPageCache<Bitmap>,
        num_workers: usize,
    ) -> Result<Self, SourceError> {
        let page_count = Self::load_page_count(provider.as_ref(), &doc_path)?;
        let (request_tx, _) = flume::unbounded();
        let (_, response_rx) = flume::unbounded();

        let mut service = Self {
            provider,
            doc_path,
            params,
            cache,
            num_workers: num_workers.max(1),
            request_tx,
            response_rx,
            workers: Vec::new(),
            token: CancellationToken::new(),
            next_request_id: 1,
            pending_requests: HashMap::new(),
            page_count,
        };
        service.spawn_workers();
        Ok(service)
    }

    fn load_page_count(
        provider: &dyn DocumentProvider,
        doc_path: &Path,
    ) -> Result<Option<usize>, SourceError> {
        let handle = provider.open(doc_path).inspect_err(|e| {
            warn!("Failed to open {doc_path:?}: {e}");
        })?;
        Ok(handle.page_count())
    }

    fn spawn_workers(&mut self) {
        // flume gives MPMC channels: every worker pulls from the same request queue.
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        self.token = CancellationToken::new();
        self.workers = (0..self.num_workers)
            .map(|_| {
                let provider = Arc::clone(&self.provider);
                let path = self.doc_path.clone();
                let rx = request_rx.clone();
                let tx = response_tx.clone();
                let cache = Arc::clone(&self.cache);

                std::thread::spawn(move || {
                    render_worker(provider, &path, rx, tx, cache);
                })
            })
            .collect();

        self.request_tx = request_tx;
        self.response_rx = response_rx;
        debug!(
            "Spawned {} render workers for {:?}",
            self.num_workers, self.doc_path
        );
    }

    fn ensure_workers(&mut self) {
        if self.workers.is_empty() {
            self.spawn_workers();
        }
    }

    /// Document page count; `None` for open-ended sources
    #[must_use]
    pub fn page_count(&self) -> Option<usize> {
        self.page_count
    }

    #[must_use]
    pub fn doc_path(&self) -> &Path {
        &self.doc_path
    }

    #[must_use]
    pub fn params(&self) -> RenderParams {
        self.params
    }

    #[must_use]
    pub fn cache(&self) -> &SharedPageCache<Bitmap> {
        &self.cache
    }

    /// Whether `page` exists in the current document
    #[must_use]
    pub fn is_valid_page(&self, page: usize) -> bool {
        self.page_count.is_none_or(|count| page < count)
    }

    /// Request a page to be rendered if it is neither cached nor in flight
    pub fn request_page(&mut self, page: usize) -> Option<RequestId> {
        self.submit(page, false)
    }

    /// Queue low priority renders for pages that are neither cached nor in flight
    pub fn prefetch(&mut self, pages: &[usize]) -> Vec<RequestId> {
        pages
            .iter()
            .filter_map(|&page| self.submit(page, true))
            .collect()
    }

    fn submit(&mut self, page: usize, prefetch: bool) -> Option<RequestId> {
        if !self.is_valid_page(page) || self.is_page_cached(page) || self.is_in_flight(page) {
            return None;
        }

        self.ensure_workers();
        let id = self.next_id();
        let params = self.params;
        let token = self.token.clone();
        let (request, pending) = if prefetch {
            (
                RenderRequest::Prefetch {
                    id,
                    page,
                    params,
                    token,
                },
                PendingRequest::Prefetch(page),
            )
        } else {
            (
                RenderRequest::Page {
                    id,
                    page,
                    params,
                    token,
                },
                PendingRequest::Page(page),
            )
        };

        if self.request_tx.send(request).is_err() {
            warn!("Render workers are gone, dropping request for page {page}");
            return None;
        }
        self.pending_requests.insert(id, pending);
        Some(id)
    }

    /// Queue a low resolution render of `page` for display until the full
    /// render lands.
    ///
    /// Skipped when the page is cached, already has a preview queued, or
    /// `preview_dpi` would not be cheaper than a full render.
    pub fn request_preview(&mut self, page: usize, preview_dpi: f32) -> Option<RequestId> {
        if !(preview_dpi > 0.0 && preview_dpi < self.params.dpi)
            || !self.is_valid_page(page)
            || self.is_page_cached(page)
            || self
                .pending_requests
                .values()
                .any(|request| matches!(request, PendingRequest::Preview(p) if *p == page))
        {
            return None;
        }

        self.ensure_workers();
        let id = self.next_id();
        let request = RenderRequest::Preview {
            id,
            page,
            params: self.params,
            preview_dpi,
            token: self.token.clone(),
        };
        if self.request_tx.send(request).is_err() {
            warn!("Render workers are gone, dropping preview of page {page}");
            return None;
        }
        self.pending_requests.insert(id, PendingRequest::Preview(page));
        Some(id)
    }

    /// Ask a worker for the text geometry of `pages`
    pub fn request_text_regions(&mut self, pages: Vec<usize>) -> Option<RequestId> {
        self.ensure_workers();
        let id = self.next_id();
        let request = RenderRequest::ExtractTextRegions {
            id,
            pages,
            token: self.token.clone(),
        };
        if self.request_tx.send(request).is_err() {
            warn!("Render workers are gone, dropping text request");
            return None;
        }
        self.pending_requests
            .insert(id, PendingRequest::TextRegions);
        Some(id)
    }

    /// Check if a page render is queued or running
    #[must_use]
    pub fn is_in_flight(&self, page: usize) -> bool {
        self.pending_requests
            .values()
            .any(|request| request.page() == Some(page))
    }

    /// Number of requests still awaiting a response
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Check if a page is cached
    #[must_use]
    pub fn is_page_cached(&self, page: usize) -> bool {
        lock_cache(&self.cache).contains(page)
    }

    /// Get a cached page if available, promoting it
    #[must_use]
    pub fn get_cached_page(&self, page: usize) -> Option<Arc<Bitmap>> {
        lock_cache(&self.cache).get(page)
    }

    /// Poll for completed render responses
    pub fn poll_responses(&mut self) -> Vec<RenderResponse> {
        let mut responses = vec![];
        while let Ok(response) = self.response_rx.try_recv() {
            self.pending_requests.remove(&response.id());
            responses.push(response);
        }
        responses
    }

    /// Block until every in-flight request has answered or `timeout` elapses
    pub fn wait_for_responses(&mut self, timeout: Duration) -> Vec<RenderResponse> {
        let deadline = Instant::now() + timeout;
        let mut responses = self.poll_responses();

        while !self.pending_requests.is_empty() {
            match self.response_rx.recv_deadline(deadline) {
                Ok(response) => {
                    self.pending_requests.remove(&response.id());
                    responses.push(response);
                }
                Err(_) => break,
            }
        }
        responses
    }

    /// Cancel every queued and running task and wait for the workers to exit.
    ///
    /// On return no worker holds a document handle and no cancelled task can
    /// still write to the cache.
    pub fn cancel_all(&mut self) {
        {
            // Workers check the token under this lock before inserting.
            let _cache = lock_cache(&self.cache);
            self.token.cancel();
        }

        for _ in 0..self.workers.len() {
            let _ = self.request_tx.send(RenderRequest::Shutdown);
        }

        let joined = self.workers.len();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Render worker panicked during shutdown");
            }
        }

        let dropped = self.response_rx.drain().count();
        let abandoned = self.pending_requests.len();
        self.pending_requests.clear();

        if joined > 0 {
            debug!(
                "Cancelled render generation: {joined} workers joined, {abandoned} requests abandoned, {dropped} responses dropped"
            );
        }
    }

    /// Cancel everything, drop cached pages and point the service at another document.
    ///
    /// If the new document cannot be opened the current one stays active.
    pub fn swap_document(
        &mut self,
        provider: Arc<dyn DocumentProvider>,
        doc_path: PathBuf,
    ) -> Result<(), SourceError> {
        let page_count = Self::load_page_count(provider.as_ref(), &doc_path)?;
        info!("Swapping render document {:?} -> {doc_path:?}", self.doc_path);
        self.cancel_all();
        lock_cache(&self.cache).clear();

        self.page_count = page_count;
        self.provider = provider;
        self.doc_path = doc_path;
        self.spawn_workers();
        Ok(())
    }

    /// Change render parameters; cached pages rendered with the old ones are dropped
    pub fn set_params(&mut self, params: RenderParams) {
        if self.params == params {
            return;
        }
        self.cancel_all();
        lock_cache(&self.cache).clear();
        self.params = params;
    }

    /// Shutdown all workers
    pub fn shutdown(&mut self) {
        self.cancel_all();
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl Drop for RenderService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
