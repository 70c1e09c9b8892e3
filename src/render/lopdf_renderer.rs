//! Geometry-level renderer backed by `lopdf`
//!
//! Resolves page boxes (including values inherited through the page tree)
//! and hands each page's content stream to the host as its display list.

use std::sync::Arc;

use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object, ObjectId};
use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::{PageSize, ParsedPdf, PdfPage, PdfRenderer, Raster, Viewport};
use crate::error::RenderError;

/// US Letter, used when a page carries no usable MediaBox
const DEFAULT_PAGE: PageSize = PageSize {
    width: 612.0,
    height: 792.0,
};

/// Guards against cyclic Parent chains
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfRenderer;

impl LopdfRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PdfRenderer for LopdfRenderer {
    #[instrument(skip_all, fields(len = bytes.len()))]
    async fn parse(&self, bytes: &[u8]) -> Result<Arc<dyn ParsedPdf>, RenderError> {
        let document =
            Document::load_mem(bytes).map_err(|e| RenderError::Malformed(e.to_string()))?;
        if document.is_encrypted() {
            return Err(RenderError::Unsupported("encrypted document".into()));
        }

        let pages: Vec<PageEntry> = document
            .get_pages()
            .into_iter()
            .map(|(number, id)| PageEntry {
                number,
                id,
                size: page_size(&document, id),
            })
            .collect();

        debug!("Parsed document with {} pages", pages.len());
        Ok(Arc::new(LopdfDocument {
            inner: Arc::new(Mutex::new(document)),
            pages,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct PageEntry {
    number: u32,
    id: ObjectId,
    size: PageSize,
}

struct LopdfDocument {
    inner: Arc<Mutex<Document>>,
    pages: Vec<PageEntry>,
}

#[async_trait]
impl ParsedPdf for LopdfDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    async fn page(&self, number: u32) -> Result<Box<dyn PdfPage>, RenderError> {
        let entry = self
            .pages
            .iter()
            .find(|p| p.number == number)
            .copied()
            .ok_or(RenderError::PageOutOfRange(number))?;
        Ok(Box::new(LopdfPage {
            document: self.inner.clone(),
            entry,
        }))
    }
}

struct LopdfPage {
    document: Arc<Mutex<Document>>,
    entry: PageEntry,
}

#[async_trait]
impl PdfPage for LopdfPage {
    fn intrinsic_size(&self) -> PageSize {
        self.entry.size
    }

    async fn render(&self, viewport: &Viewport) -> Result<Raster, RenderError> {
        let content = self
            .document
            .lock()
            .get_page_content(self.entry.id)
            .map_err(|e| RenderError::Malformed(format!("page {}: {}", self.entry.number, e)))?;

        let (w, h) = if viewport.rotation.is_sideways() {
            (self.entry.size.height, self.entry.size.width)
        } else {
            (self.entry.size.width, self.entry.size.height)
        };

        Ok(Raster {
            page: self.entry.number,
            width: (w * viewport.zoom).round().max(1.0) as u32,
            height: (h * viewport.zoom).round().max(1.0) as u32,
            zoom: viewport.zoom,
            rotation: viewport.rotation,
            data: content.into(),
        })
    }
}

/// MediaBox size, swapped for pages with an intrinsic quarter-turn `/Rotate`
fn page_size(document: &Document, page: ObjectId) -> PageSize {
    let size = inherited(document, page, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .and_then(|rect| {
            let coords: Vec<f64> = rect.iter().filter_map(|o| number(document, o)).collect();
            match coords.as_slice() {
                [x0, y0, x1, y1] => Some(PageSize {
                    width: (x1 - x0).abs(),
                    height: (y1 - y0).abs(),
                }),
                _ => None,
            }
        })
        .filter(|s| s.width > 0.0 && s.height > 0.0)
        .unwrap_or(DEFAULT_PAGE);

    let rotate = inherited(document, page, b"Rotate")
        .and_then(|obj| number(document, obj))
        .map(|deg| (deg as i64).rem_euclid(360))
        .unwrap_or(0);

    if rotate == 90 || rotate == 270 {
        PageSize {
            width: size.height,
            height: size.width,
        }
    } else {
        size
    }
}

/// Looks `key` up on the page, then on its ancestors
fn inherited<'a>(document: &'a Document, page: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node: &Dictionary = document.get_dictionary(page).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(resolve(document, value));
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = document.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        other => other,
    }
}

fn number(document: &Document, object: &Object) -> Option<f64> {
    match resolve(document, object) {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}
