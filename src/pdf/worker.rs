//! Render worker - runs in separate thread(s)
//!
//! Each worker opens its own document handle on first use and keeps it for
//! its lifetime, so no handle is ever shared between threads.

use std::path::Path;
use std::sync::Arc;

use flume::{Receiver, Sender};
use image::imageops::{self, FilterType};
use log::{debug, warn};

use super::cache::{SharedPageCache, lock_cache};
use super::cancel::CancellationToken;
use super::provider::{DocumentHandle, DocumentProvider, PageText};
use super::request::{RenderParams, RenderRequest, RenderResponse, RequestId, WorkerFault};
use crate::bitmap::{self, Bitmap};

/// Main worker function - runs in a dedicated thread
pub fn render_worker(
    provider: Arc<dyn DocumentProvider>,
    doc_path: &Path,
    requests: Receiver<RenderRequest>,
    responses: Sender<RenderResponse>,
    cache: SharedPageCache<Bitmap>,
) {
    let mut worker = Worker {
        provider,
        doc_path,
        handle: None,
        cache,
        responses,
    };

    for request in requests {
        match request {
            RenderRequest::Page {
                id,
                page,
                params,
                token,
            }
            | RenderRequest::Prefetch {
                id,
                page,
                params,
                token,
            } => worker.handle_page_request(id, page, params, &token),

            RenderRequest::Preview {
                id,
                page,
                params,
                preview_dpi,
                token,
            } => worker.handle_preview_request(id, page, params, preview_dpi, &token),

            RenderRequest::ExtractTextRegions { id, pages, token } => {
                worker.handle_text_request(id, &pages, &token);
            }

            RenderRequest::Shutdown => break,
        }
    }

    if worker.handle.take().is_some() {
        debug!("Render worker released document handle for {doc_path:?}");
    }
}

struct Worker<'a> {
    provider: Arc<dyn DocumentProvider>,
    doc_path: &'a Path,
    handle: Option<Box<dyn DocumentHandle>>,
    cache: SharedPageCache<Bitmap>,
    responses: Sender<RenderResponse>,
}

impl Worker<'_> {
    fn handle(&mut self) -> Result<&dyn DocumentHandle, WorkerFault> {
        if self.handle.is_none() {
            let opened = self.provider.open(self.doc_path)?;
            debug!("Render worker opened private handle for {:?}", self.doc_path);
            self.handle = Some(opened);
        }
        self.handle
            .as_deref()
            .ok_or_else(|| WorkerFault::generic("document handle unavailable"))
    }

    fn cancelled(&self, id: RequestId, page: Option<usize>) {
        debug!("Render request {id:?} for page {page:?} cancelled");
        let _ = self
            .responses
            .send(RenderResponse::Cancelled { id, page });
    }

    fn handle_page_request(
        &mut self,
        id: RequestId,
        page: usize,
        params: RenderParams,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            self.cancelled(id, Some(page));
            return;
        }

        let cached = lock_cache(&self.cache).peek(page);
        if let Some(data) = cached {
            let _ = self.responses.send(RenderResponse::Page { id, page, data });
            return;
        }

        let rendered = self
            .handle()
            .and_then(|handle| render_page(handle, page, params, token));

        match rendered {
            Ok(Some(bitmap)) => {
                // Cancellation is published under the cache lock, so checking
                // it here guarantees a cancelled task never inserts.
                let mut cache = lock_cache(&self.cache);
                if token.is_cancelled() {
                    drop(cache);
                    self.cancelled(id, Some(page));
                    return;
                }
                let data = cache.put(page, bitmap);
                drop(cache);
                let _ = self.responses.send(RenderResponse::Page { id, page, data });
            }
            Ok(None) => self.cancelled(id, Some(page)),
            Err(error) => {
                if error.is_missing() {
                    debug!("Page {page} has no content: {error}");
                } else {
                    warn!("Failed to render page {page}: {error}");
                }
                let _ = self.responses.send(RenderResponse::Error {
                    id,
                    page: Some(page),
                    error,
                });
            }
        }
    }

    fn handle_preview_request(
        &mut self,
        id: RequestId,
        page: usize,
        params: RenderParams,
        preview_dpi: f32,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            self.cancelled(id, Some(page));
            return;
        }

        // A full render finished first; hand that out instead.
        let cached = lock_cache(&self.cache).peek(page);
        if let Some(data) = cached {
            let _ = self.responses.send(RenderResponse::Page { id, page, data });
            return;
        }

        let preview_params = RenderParams {
            dpi: preview_dpi,
            ..params
        };
        let rendered = self
            .handle()
            .and_then(|handle| render_page(handle, page, preview_params, token));

        match rendered {
            Ok(Some(bitmap)) if !token.is_cancelled() => {
                let data = Arc::new(upscale(&bitmap, params.dpi / preview_dpi));
                let _ = self.responses.send(RenderResponse::Preview { id, page, data });
            }
            Ok(_) => self.cancelled(id, Some(page)),
            Err(error) => {
                debug!("Preview of page {page} failed: {error}");
                let _ = self.responses.send(RenderResponse::Error {
                    id,
                    page: Some(page),
                    error,
                });
            }
        }
    }

    fn handle_text_request(&mut self, id: RequestId, pages: &[usize], token: &CancellationToken) {
        if token.is_cancelled() {
            self.cancelled(id, None);
            return;
        }

        let result = self.handle().and_then(|handle| {
            pages
                .iter()
                .map(|&page| -> Result<PageText, WorkerFault> {
                    Ok(PageText {
                        page,
                        size: handle.page_size(page)?,
                        boxes: handle.text_boxes(page)?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        });

        if token.is_cancelled() {
            self.cancelled(id, None);
            return;
        }

        match result {
            Ok(pages) => {
                let _ = self.responses.send(RenderResponse::TextRegions { id, pages });
            }
            Err(error) => {
                warn!("Failed to extract text for pages {pages:?}: {error}");
                let _ = self.responses.send(RenderResponse::Error {
                    id,
                    page: pages.first().copied(),
                    error,
                });
            }
        }
    }
}

/// Render a single page, applying display transforms.
///
/// Returns `Ok(None)` if the token was cancelled before the render started.
pub fn render_page(
    handle: &dyn DocumentHandle,
    page: usize,
    params: RenderParams,
    token: &CancellationToken,
) -> Result<Option<Bitmap>, WorkerFault> {
    if token.is_cancelled() {
        return Ok(None);
    }

    let mut bitmap = handle.render_page(page, params.dpi)?;
    if bitmap.width() == 0 || bitmap.height() == 0 {
        return Err(WorkerFault::generic(format!(
            "page {page} rendered to an empty bitmap"
        )));
    }

    if params.invert {
        bitmap::invert_rgb(&mut bitmap);
    }

    Ok(Some(bitmap))
}

/// Scale a preview by `factor` so it lines up with full resolution pages
fn upscale(bitmap: &Bitmap, factor: f32) -> Bitmap {
    if !factor.is_finite() || factor <= 1.0 {
        return bitmap.clone();
    }
    let width = (bitmap.width() as f32 * factor).round().max(1.0) as u32;
    let height = (bitmap.height() as f32 * factor).round().max(1.0) as u32;
    imageops::resize(bitmap, width, height, FilterType::Triangle)
}
