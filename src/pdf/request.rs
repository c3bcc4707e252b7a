//! Render request and response types

use std::sync::Arc;

use super::cancel::CancellationToken;
use super::provider::{PageText, SourceError};
use crate::bitmap::Bitmap;

/// Default render resolution for document pages
pub const DEFAULT_RENDER_DPI: f32 = 192.0;

/// Resolution of the quick preview shown while a full render is pending
pub const DEFAULT_PREVIEW_DPI: f32 = 96.0;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Parameters for rendering a page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderParams {
    /// Output resolution
    pub dpi: f32,
    /// Invert RGB before caching (dark mode)
    pub invert: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_RENDER_DPI,
            invert: false,
        }
    }
}

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Render a page the canvas is about to show
    Page {
        id: RequestId,
        page: usize,
        params: RenderParams,
        token: CancellationToken,
    },

    /// Render a neighbouring page ahead of time
    Prefetch {
        id: RequestId,
        page: usize,
        params: RenderParams,
        token: CancellationToken,
    },

    /// Render a page at `preview_dpi` and scale it up to the size a render
    /// with `params` would have. The result is never cached.
    Preview {
        id: RequestId,
        page: usize,
        params: RenderParams,
        preview_dpi: f32,
        token: CancellationToken,
    },

    /// Extract text geometry for a set of pages
    ExtractTextRegions {
        id: RequestId,
        pages: Vec<usize>,
        token: CancellationToken,
    },

    /// Shutdown the worker
    Shutdown,
}

/// Errors from render workers
#[derive(Debug, thiserror::Error)]
pub enum WorkerFault {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("{detail}")]
    Generic { detail: String },
}

impl WorkerFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    /// The page simply has no content yet
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_missing())
    }
}

/// Response from render workers
#[derive(Debug)]
pub enum RenderResponse {
    /// Rendered page, already inserted into the cache
    Page {
        id: RequestId,
        page: usize,
        data: Arc<Bitmap>,
    },

    /// Low resolution stand-in for a page that is not cached yet
    Preview {
        id: RequestId,
        page: usize,
        data: Arc<Bitmap>,
    },

    /// Extracted text geometry
    TextRegions { id: RequestId, pages: Vec<PageText> },

    /// Request was cancelled before it touched the cache
    Cancelled { id: RequestId, page: Option<usize> },

    /// Error during rendering
    Error {
        id: RequestId,
        page: Option<usize>,
        error: WorkerFault,
    },
}

impl RenderResponse {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Page { id, .. }
            | Self::Preview { id, .. }
            | Self::TextRegions { id, .. }
            | Self::Cancelled { id, .. }
            | Self::Error { id, .. } => *id,
        }
    }
}
