//! Page rendering infrastructure: caches, providers and the worker pool

pub mod cache;
pub mod cancel;
#[cfg(feature = "pdf")]
mod mupdf_provider;
pub mod provider;
pub mod request;
pub mod service;
mod worker;

pub use cache::{DEFAULT_PAGE_CACHE_CAPACITY, PageCache, SharedPageCache, lock_cache, shared_cache};
pub use cancel::CancellationToken;
#[cfg(feature = "pdf")]
pub use mupdf_provider::MupdfProvider;
pub use provider::{DocumentHandle, DocumentProvider, NoteStore, PageText, SourceError, TextBox};
pub use request::{
    DEFAULT_PREVIEW_DPI, DEFAULT_RENDER_DPI, RenderParams, RenderRequest, RenderResponse, RequestId, WorkerFault,
};
pub use service::{DEFAULT_WORKERS, RenderService};
pub use worker::render_page;
