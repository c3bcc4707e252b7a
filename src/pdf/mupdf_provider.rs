//! MuPDF-backed document provider

use std::path::Path;

use mupdf::text_page::TextBlockType;
use mupdf::{Colorspace, Document, Matrix, Pixmap, TextPageFlags};

use super::provider::{DocumentHandle, DocumentProvider, SourceError, TextBox};
use crate::bitmap::Bitmap;
use crate::geometry::{Rect, Size};

/// PDF user space is 72 points per inch
const POINTS_PER_INCH: f32 = 72.0;

/// Opens PDF documents with MuPDF, one `Document` per calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfProvider;

impl DocumentProvider for MupdfProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, SourceError> {
        let doc = Document::open(path.to_string_lossy().as_ref()).map_err(|e| SourceError::Open {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let page_count = doc.page_count().map_err(|e| SourceError::Open {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(Box::new(MupdfHandle {
            doc,
            page_count: page_count.max(0) as usize,
        }))
    }
}

struct MupdfHandle {
    doc: Document,
    page_count: usize,
}

impl MupdfHandle {
    fn load(&self, page: usize) -> Result<mupdf::Page, SourceError> {
        if page >= self.page_count {
            return Err(SourceError::PageOutOfRange {
                page,
                page_count: self.page_count,
            });
        }
        self.doc
            .load_page(page as i32)
            .map_err(|e| SourceError::render(page, e.to_string()))
    }
}

impl DocumentHandle for MupdfHandle {
    fn page_count(&self) -> Option<usize> {
        Some(self.page_count)
    }

    fn render_page(&self, page: usize, dpi: f32) -> Result<Bitmap, SourceError> {
        let loaded = self.load(page)?;
        let scale = dpi / POINTS_PER_INCH;
        let pixmap = loaded
            .to_pixmap(
                &Matrix::new_scale(scale, scale),
                &Colorspace::device_rgb(),
                false,
                false,
            )
            .map_err(|e| SourceError::render(page, e.to_string()))?;
        pixmap_to_rgba(&pixmap, page)
    }

    fn page_size(&self, page: usize) -> Result<Size, SourceError> {
        let bounds = self
            .load(page)?
            .bounds()
            .map_err(|e| SourceError::render(page, e.to_string()))?;
        Ok(Size::new(
            f64::from(bounds.x1 - bounds.x0),
            f64::from(bounds.y1 - bounds.y0),
        ))
    }

    fn text_boxes(&self, page: usize) -> Result<Vec<TextBox>, SourceError> {
        let text_page = self
            .load(page)?
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| SourceError::render(page, e.to_string()))?;

        let mut boxes = Vec::new();
        for block in text_page.blocks() {
            if block.r#type() != TextBlockType::Text {
                continue;
            }
            for line in block.lines() {
                let text: String = line.chars().filter_map(|ch| ch.char()).collect();
                if text.trim().is_empty() {
                    continue;
                }
                let bbox = line.bounds();
                boxes.push(TextBox {
                    page,
                    rect: Rect::new(
                        f64::from(bbox.x0),
                        f64::from(bbox.y0),
                        f64::from(bbox.x1 - bbox.x0),
                        f64::from(bbox.y1 - bbox.y0),
                    ),
                    text,
                });
            }
        }
        Ok(boxes)
    }
}

fn pixmap_to_rgba(pixmap: &Pixmap, page: usize) -> Result<Bitmap, SourceError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(SourceError::render(
            page,
            format!("unsupported pixmap format: {n} channels"),
        ));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(SourceError::render(page, "pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        for px in row.chunks_exact(n) {
            out.extend_from_slice(&px[..3]);
            out.push(if n >= 4 { px[3] } else { 0xFF });
        }
    }

    Bitmap::from_raw(pixmap.width(), pixmap.height(), out)
        .ok_or_else(|| SourceError::render(page, "pixmap dimensions do not match samples"))
}
