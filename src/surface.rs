//! Display surface boundary
//!
//! The windowing layer that hosts a surface implements [`DisplaySurface`] and
//! [`SurfaceHost`]; the core issues commands to it and consumes its
//! [`SurfaceEvent`] stream.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::policy::{PolicyReport, WindowPolicy};
use crate::render::Raster;
use crate::watermark::WatermarkSpec;

/// Surface role, fixing which policy applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceRole {
    Primary,
    Viewer,
}

impl fmt::Display for SurfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceRole::Primary => write!(f, "primary"),
            SurfaceRole::Viewer => write!(f, "viewer"),
        }
    }
}

/// Key transition direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Down,
    Up,
}

/// Keyboard event as delivered by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub state: KeyState,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl KeyEvent {
    /// Key press without modifiers
    pub fn down(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: KeyState::Down,
            ctrl: false,
            alt: false,
            shift: false,
            meta: false,
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

/// Signals emitted by a surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// The surface finished its own load lifecycle and can receive content
    LoadFinished,
    Focus,
    Blur,
    VisibilityChanged { visible: bool },
    Key(KeyEvent),
    Resized { width: f64, height: f64 },
    /// Scroll wheel; with ctrl or meta held it zooms instead of scrolling
    Wheel { delta_y: f64, ctrl: bool, meta: bool },
    /// Navigation the host already vetoed through the applied policy
    NavigationRequested { url: String },
    CloseRequested,
}

/// Notices drawn over the whole surface
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Capture software confirmed; the surface will be closed
    ThreatBlocked {
        processes: Vec<String>,
        identity: String,
        timestamp: DateTime<Utc>,
    },
    /// Terminal viewer error with a "go back" affordance
    ViewerError { code: &'static str, message: String },
}

/// Commands accepted by a hosted surface
pub trait DisplaySurface: Send + Sync {
    fn role(&self) -> SurfaceRole;

    /// Applies the restriction set before first paint, reporting what the host could not honor
    fn apply_policy(&self, policy: &WindowPolicy) -> PolicyReport;

    fn set_visible(&self, visible: bool);

    /// Replaces the displayed frame
    fn render_frame(&self, raster: &Raster);

    fn show_overlay(&self, spec: &WatermarkSpec);

    fn show_notice(&self, notice: &Notice);

    fn focus(&self);

    fn close(&self);
}

/// A created surface together with its event stream
pub struct SurfaceHandle {
    pub surface: Arc<dyn DisplaySurface>,
    pub events: mpsc::Receiver<SurfaceEvent>,
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("role", &self.surface.role())
            .finish()
    }
}

/// Windowing layer able to create surfaces
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    async fn create(&self, role: SurfaceRole) -> Result<SurfaceHandle>;
}
