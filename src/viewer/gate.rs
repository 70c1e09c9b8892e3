//! Visibility gate
//!
//! Content is shown only while a frame exists and the threat state is clear.
//! Frame delivery and threat transitions both go through one lock, so a frame
//! finishing during a transition can never re-show hidden content.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::ViewerStatus;
use crate::render::{FrameSink, Raster};
use crate::surface::DisplaySurface;

#[derive(Debug, Default)]
struct GateState {
    has_frame: bool,
    clear: bool,
    visible: bool,
}

pub struct VisibilityGate {
    surface: Arc<dyn DisplaySurface>,
    status: Arc<watch::Sender<ViewerStatus>>,
    state: Mutex<GateState>,
}

impl std::fmt::Debug for VisibilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityGate")
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl VisibilityGate {
    /// Starts hidden with no frame and a clear threat state
    pub fn new(surface: Arc<dyn DisplaySurface>, status: Arc<watch::Sender<ViewerStatus>>) -> Self {
        surface.set_visible(false);
        Self {
            surface,
            status,
            state: Mutex::new(GateState {
                has_frame: false,
                clear: true,
                visible: false,
            }),
        }
    }

    pub fn set_clear(&self, clear: bool) {
        let mut state = self.state.lock();
        state.clear = clear;
        self.apply(&mut state);
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    fn apply(&self, state: &mut GateState) {
        let visible = state.has_frame && state.clear;
        if visible != state.visible {
            state.visible = visible;
            self.surface.set_visible(visible);
            self.status.send_modify(|s| s.visible = visible);
            debug!("Content {}", if visible { "shown" } else { "hidden" });
        }
    }
}

impl FrameSink for VisibilityGate {
    fn present(&self, raster: Raster) {
        let mut state = self.state.lock();
        self.surface.render_frame(&raster);
        state.has_frame = true;
        self.apply(&mut state);
    }
}
