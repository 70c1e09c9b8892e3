//! Render pipeline
//!
//! Turns document bytes into rasters through an opaque [`PdfRenderer`] and
//! keeps the view state (page, zoom, rotation). A state change is committed
//! only after its frame rendered successfully; frames reach the display
//! through a [`FrameSink`].

pub mod lopdf_renderer;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, RenderError, Result};

pub use lopdf_renderer::LopdfRenderer;

/// Zoom bounds
pub const MIN_ZOOM: f64 = 0.5;
pub const MAX_ZOOM: f64 = 3.0;

/// Page size in points at zoom 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// Clockwise page rotation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Next quarter turn, wrapping at 360
    pub fn clockwise(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    /// True when width and height trade places
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Parameters of a single page render
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub zoom: f64,
    pub rotation: Rotation,
}

/// A rendered page
#[derive(Clone, PartialEq)]
pub struct Raster {
    /// 1-based page number
    pub page: u32,
    pub width: u32,
    pub height: u32,
    pub zoom: f64,
    pub rotation: Rotation,
    pub data: Arc<[u8]>,
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("page", &self.page)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("zoom", &self.zoom)
            .field("rotation", &self.rotation)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Current position in a loaded document
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// 1-based
    pub page: u32,
    pub page_count: u32,
    pub zoom: f64,
    pub rotation: Rotation,
}

impl ViewState {
    fn first_page(page_count: u32) -> Self {
        Self {
            page: 1,
            page_count,
            zoom: 1.0,
            rotation: Rotation::Deg0,
        }
    }

    fn viewport(&self) -> Viewport {
        Viewport {
            zoom: self.zoom,
            rotation: self.rotation,
        }
    }
}

/// Opaque PDF parser
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn parse(&self, bytes: &[u8]) -> std::result::Result<Arc<dyn ParsedPdf>, RenderError>;
}

/// A parsed document
#[async_trait]
pub trait ParsedPdf: Send + Sync {
    fn page_count(&self) -> u32;

    /// Page `number`, 1-based
    async fn page(&self, number: u32) -> std::result::Result<Box<dyn PdfPage>, RenderError>;
}

#[async_trait]
pub trait PdfPage: Send + Sync {
    /// Size at zoom 1 and no rotation
    fn intrinsic_size(&self) -> PageSize;

    async fn render(&self, viewport: &Viewport) -> std::result::Result<Raster, RenderError>;
}

/// Receiver of rendered frames
pub trait FrameSink: Send + Sync {
    /// Replaces the displayed frame
    fn present(&self, raster: Raster);
}

/// Clamps to the zoom bounds and quantizes to hundredths
pub fn normalize_zoom(zoom: f64) -> f64 {
    if !zoom.is_finite() {
        return 1.0;
    }
    ((zoom * 100.0).round() / 100.0).clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Page loading, navigation, zoom and rotation over one document
pub struct RenderPipeline {
    renderer: Arc<dyn PdfRenderer>,
    sink: Arc<dyn FrameSink>,
    document: Option<Arc<dyn ParsedPdf>>,
    state: Option<ViewState>,
    container_width: f64,
    padding: f64,
    zoom_step: f64,
}

impl fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("state", &self.state)
            .field("container_width", &self.container_width)
            .finish()
    }
}

impl RenderPipeline {
    pub fn new(renderer: Arc<dyn PdfRenderer>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            renderer,
            sink,
            document: None,
            state: None,
            container_width: 0.0,
            padding: 40.0,
            zoom_step: 0.1,
        }
    }

    /// Horizontal padding subtracted from the container in [`fit_to_width`](Self::fit_to_width)
    pub fn with_padding(mut self, padding: f64) -> Self {
        self.padding = padding.max(0.0);
        self
    }

    pub fn with_zoom_step(mut self, step: f64) -> Self {
        self.zoom_step = step;
        self
    }

    /// None until a document loaded successfully
    pub fn state(&self) -> Option<ViewState> {
        self.state
    }

    pub fn zoom_step(&self) -> f64 {
        self.zoom_step
    }

    pub fn set_container_width(&mut self, width: f64) {
        self.container_width = width.max(0.0);
    }

    /// Parses `bytes` and renders page 1
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn load(&mut self, bytes: &[u8]) -> Result<ViewState> {
        let document = self.renderer.parse(bytes).await.map_err(|e| {
            warn!("❌ Document failed to parse: {}", e);
            Error::CorruptDocument(e.to_string())
        })?;

        let page_count = document.page_count();
        if page_count == 0 {
            warn!("❌ Document has no pages");
            return Err(Error::CorruptDocument("document has no pages".into()));
        }

        let candidate = ViewState::first_page(page_count);
        Self::draw(document.as_ref(), self.sink.as_ref(), &candidate)
            .await
            .map_err(|e| Error::CorruptDocument(e.to_string()))?;

        self.document = Some(document);
        self.state = Some(candidate);
        info!("📄 Document loaded ({} pages)", page_count);
        Ok(candidate)
    }

    /// Renders page `n`, redrawing it when it is already current.
    /// Out-of-range pages leave the state unchanged.
    pub async fn go_to(&mut self, n: u32) -> Result<ViewState> {
        let state = self.current()?;
        if n < 1 || n > state.page_count {
            return Ok(state);
        }
        self.commit(ViewState { page: n, ..state }).await
    }

    pub async fn next_page(&mut self) -> Result<ViewState> {
        let state = self.current()?;
        self.go_to(state.page.saturating_add(1)).await
    }

    pub async fn previous_page(&mut self) -> Result<ViewState> {
        let state = self.current()?;
        self.go_to(state.page.saturating_sub(1)).await
    }

    pub async fn first_page(&mut self) -> Result<ViewState> {
        self.go_to(1).await
    }

    pub async fn last_page(&mut self) -> Result<ViewState> {
        let state = self.current()?;
        self.go_to(state.page_count).await
    }

    /// Adjusts zoom by `delta`, clamped to [`MIN_ZOOM`, `MAX_ZOOM`]
    pub async fn zoom(&mut self, delta: f64) -> Result<ViewState> {
        let state = self.current()?;
        self.set_zoom(state, state.zoom + delta).await
    }

    pub async fn reset_zoom(&mut self) -> Result<ViewState> {
        let state = self.current()?;
        self.set_zoom(state, 1.0).await
    }

    /// Zoom so the current page fills the container width minus padding
    pub async fn fit_to_width(&mut self) -> Result<ViewState> {
        let state = self.current()?;
        let document = self.document()?;
        let size = document.page(state.page).await?.intrinsic_size();

        let page_width = if state.rotation.is_sideways() {
            size.height
        } else {
            size.width
        };
        let available = self.container_width - self.padding;
        if page_width <= 0.0 || available <= 0.0 {
            debug!("Skipping fit-to-width: container {} page {}", available, page_width);
            return Ok(state);
        }

        self.set_zoom(state, available / page_width).await
    }

    /// Quarter turn clockwise
    pub async fn rotate(&mut self) -> Result<ViewState> {
        let state = self.current()?;
        self.commit(ViewState {
            rotation: state.rotation.clockwise(),
            ..state
        })
        .await
    }

    async fn set_zoom(&mut self, state: ViewState, zoom: f64) -> Result<ViewState> {
        let zoom = normalize_zoom(zoom);
        if zoom == state.zoom {
            return Ok(state);
        }
        self.commit(ViewState { zoom, ..state }).await
    }

    async fn commit(&mut self, candidate: ViewState) -> Result<ViewState> {
        let document = self.document()?;
        Self::draw(document.as_ref(), self.sink.as_ref(), &candidate).await?;
        self.state = Some(candidate);
        debug!(
            "Rendered page {}/{} at {:.2}x, {}°",
            candidate.page,
            candidate.page_count,
            candidate.zoom,
            candidate.rotation.degrees()
        );
        Ok(candidate)
    }

    async fn draw(document: &dyn ParsedPdf, sink: &dyn FrameSink, state: &ViewState) -> Result<()> {
        let page = document.page(state.page).await?;
        let mut raster = page.render(&state.viewport()).await?;
        raster.page = state.page;
        sink.present(raster);
        Ok(())
    }

    fn current(&self) -> Result<ViewState> {
        self.state.ok_or(Error::RenderError(RenderError::NotLoaded))
    }

    fn document(&self) -> Result<Arc<dyn ParsedPdf>> {
        self.document
            .clone()
            .ok_or(Error::RenderError(RenderError::NotLoaded))
    }
}
