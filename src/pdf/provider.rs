//! Page sources: the document provider abstraction and disk-backed note pages
//!
//! A provider only knows how to open a path. Each render worker opens its own
//! handle through it, so handles never cross threads.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::bitmap::Bitmap;
use crate::geometry::{Rect, Size};

/// Errors raised by page sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot open {path}: {detail}")]
    Open { path: PathBuf, detail: String },

    #[error("page {page} is out of range ({page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("page {0} has no stored content")]
    Missing(usize),

    #[error("render of page {page} failed: {detail}")]
    Render { page: usize, detail: String },

    #[error("I/O: {0}")]
    Io(#[from] io::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl SourceError {
    pub fn render(page: usize, detail: impl Into<String>) -> Self {
        Self::Render {
            page,
            detail: detail.into(),
        }
    }

    /// Expected absence rather than a broken source
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }
}

/// A run of text on a page, in page points
#[derive(Clone, Debug, PartialEq)]
pub struct TextBox {
    pub page: usize,
    pub rect: Rect,
    pub text: String,
}

/// Text geometry of one page as extracted by a worker
#[derive(Clone, Debug, PartialEq)]
pub struct PageText {
    pub page: usize,
    /// Page size in points
    pub size: Size,
    pub boxes: Vec<TextBox>,
}

/// Opens private document handles
pub trait DocumentProvider: Send + Sync + 'static {
    /// Open a new handle; called once per worker thread
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, SourceError>;
}

/// A document opened by one thread and used only there
pub trait DocumentHandle {
    /// Number of pages, `None` for open-ended sources such as notebooks
    fn page_count(&self) -> Option<usize>;

    /// Render one page at the given DPI
    fn render_page(&self, page: usize, dpi: f32) -> Result<Bitmap, SourceError>;

    /// Page size in points
    fn page_size(&self, page: usize) -> Result<Size, SourceError>;

    /// Text runs of a page in reading order
    fn text_boxes(&self, page: usize) -> Result<Vec<TextBox>, SourceError> {
        let _ = page;
        Ok(Vec::new())
    }
}

/// Note pages stored as `{folder}/{notebook_id}_{page:05}.png`
#[derive(Clone, Debug)]
pub struct NoteStore {
    folder: PathBuf,
    notebook_id: String,
}

impl NoteStore {
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>, notebook_id: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            notebook_id: notebook_id.into(),
        }
    }

    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    #[must_use]
    pub fn notebook_id(&self) -> &str {
        &self.notebook_id
    }

    #[must_use]
    pub fn page_path(&self, page: usize) -> PathBuf {
        note_page_path(&self.folder, &self.notebook_id, page)
    }

    #[must_use]
    pub fn exists(&self, page: usize) -> bool {
        self.page_path(page).is_file()
    }

    /// Load a stored note page
    pub fn load_bitmap(&self, page: usize) -> Result<Bitmap, SourceError> {
        load_note_page(&self.folder, &self.notebook_id, page)
    }

    /// Write a note page, creating the folder if needed
    pub fn save_bitmap(&self, page: usize, bitmap: &Bitmap) -> Result<(), SourceError> {
        fs::create_dir_all(&self.folder)?;
        let path = self.page_path(page);
        bitmap.save_with_format(&path, image::ImageFormat::Png)?;
        debug!("Saved note page {page} to {path:?}");
        Ok(())
    }
}

fn note_page_path(folder: &Path, notebook_id: &str, page: usize) -> PathBuf {
    folder.join(format!("{notebook_id}_{page:05}.png"))
}

fn load_note_page(folder: &Path, notebook_id: &str, page: usize) -> Result<Bitmap, SourceError> {
    let path = note_page_path(folder, notebook_id, page);
    if !path.is_file() {
        return Err(SourceError::Missing(page));
    }
    Ok(image::open(&path)?.into_rgba8())
}

/// The note store opens the folder passed as path, under its notebook id.
///
/// A folder that does not exist yet is a notebook with no stored pages.
impl DocumentProvider for NoteStore {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, SourceError> {
        if path.exists() && !path.is_dir() {
            return Err(SourceError::Open {
                path: path.to_path_buf(),
                detail: "not a directory".to_string(),
            });
        }
        Ok(Box::new(NoteHandle {
            folder: path.to_path_buf(),
            notebook_id: self.notebook_id.clone(),
        }))
    }
}

struct NoteHandle {
    folder: PathBuf,
    notebook_id: String,
}

impl DocumentHandle for NoteHandle {
    fn page_count(&self) -> Option<usize> {
        None
    }

    fn render_page(&self, page: usize, _dpi: f32) -> Result<Bitmap, SourceError> {
        load_note_page(&self.folder, &self.notebook_id, page)
    }

    fn page_size(&self, page: usize) -> Result<Size, SourceError> {
        let path = note_page_path(&self.folder, &self.notebook_id, page);
        if !path.is_file() {
            return Err(SourceError::Missing(page));
        }
        let (width, height) = image::image_dimensions(&path)?;
        Ok(Size::new(f64::from(width), f64::from(height)))
    }
}
