//! Protected viewer surface
//!
//! A viewer runs three tasks: the event loop (surface events, threat deadlines,
//! watermark refresh, probe outcomes, forced close), the render actor that owns
//! the document and its [`RenderPipeline`](crate::render::RenderPipeline), and
//! an optional probe poller. [`ViewerHandle`] is the cloneable front to all of
//! them.

pub mod gate;
pub mod session;

use std::{fmt, sync::Arc};

use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::render::{PdfRenderer, ViewState};
use crate::threat::{CaptureProbe, ThreatState};
use crate::watermark::WatermarkBinder;

pub use gate::VisibilityGate;
pub use session::ViewerSession;

/// Why a viewer closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Closed through [`ViewerHandle::close`]
    Requested,
    /// The host closed the surface or its event stream ended
    SurfaceClosed,
    /// Forced closure after confirmed capture software
    ThreatConfirmed,
}

/// Observable viewer state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewerStatus {
    pub threat: ThreatState,
    pub visible: bool,
    pub view: Option<ViewState>,
    /// Taxonomy code of a terminal viewer error, if one is displayed
    pub error: Option<&'static str>,
    pub closed: Option<CloseReason>,
}

impl Default for ViewerStatus {
    fn default() -> Self {
        Self {
            threat: ThreatState::Clear,
            visible: false,
            view: None,
            error: None,
            closed: None,
        }
    }
}

/// Render pipeline operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewerCommand {
    GoTo(u32),
    NextPage,
    PreviousPage,
    FirstPage,
    LastPage,
    Zoom(f64),
    ResetZoom,
    FitToWidth,
    Rotate,
    SetContainerWidth(f64),
}

/// Collaborators shared by every viewer
#[derive(Clone)]
pub struct ViewerDeps {
    pub config: Arc<Config>,
    pub audit: Arc<AuditLog>,
    pub binder: Arc<WatermarkBinder>,
    pub renderer: Arc<dyn PdfRenderer>,
    pub probe: Option<Arc<dyn CaptureProbe>>,
}

impl fmt::Debug for ViewerDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerDeps")
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

pub(crate) enum RenderRequest {
    Load {
        reply: oneshot::Sender<Result<ViewState>>,
    },
    Command {
        command: ViewerCommand,
        reply: Option<oneshot::Sender<Result<ViewState>>>,
    },
}

pub(crate) enum Control {
    Focus,
    Close,
}

/// Cloneable handle to a running viewer
#[derive(Clone)]
pub struct ViewerHandle {
    id: Uuid,
    filename: String,
    render: mpsc::Sender<RenderRequest>,
    control: mpsc::Sender<Control>,
    status: watch::Receiver<ViewerStatus>,
}

impl fmt::Debug for ViewerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerHandle")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl ViewerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn status(&self) -> ViewerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerStatus> {
        self.status.clone()
    }

    pub fn threat_state(&self) -> ThreatState {
        self.status.borrow().threat
    }

    pub fn view(&self) -> Option<ViewState> {
        self.status.borrow().view
    }

    pub fn is_closed(&self) -> bool {
        self.status.borrow().closed.is_some() || self.control.is_closed()
    }

    /// Resolves once the viewer has closed
    pub async fn closed(&self) -> Option<CloseReason> {
        let mut status = self.status.clone();
        let result = status.wait_for(|s| s.closed.is_some()).await;
        match result {
            Ok(s) => s.closed,
            Err(_) => Some(CloseReason::SurfaceClosed),
        }
    }

    pub fn focus(&self) {
        if let Err(e) = self.control.try_send(Control::Focus) {
            debug!("Dropping focus request for viewer {}: {}", self.id, e);
        }
    }

    pub async fn close(&self) {
        let _ = self.control.send(Control::Close).await;
        self.closed().await;
    }

    /// Runs a render command and waits for its frame
    pub async fn execute(&self, command: ViewerCommand) -> Result<ViewState> {
        let (reply, rx) = oneshot::channel();
        self.render
            .send(RenderRequest::Command {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| Error::SurfaceClosed)?;
        rx.await.map_err(|_| Error::SurfaceClosed)?
    }

    pub async fn go_to(&self, page: u32) -> Result<ViewState> {
        self.execute(ViewerCommand::GoTo(page)).await
    }

    pub async fn next_page(&self) -> Result<ViewState> {
        self.execute(ViewerCommand::NextPage).await
    }

    pub async fn previous_page(&self) -> Result<ViewState> {
        self.execute(ViewerCommand::PreviousPage).await
    }

    pub async fn zoom(&self, delta: f64) -> Result<ViewState> {
        self.execute(ViewerCommand::Zoom(delta)).await
    }

    pub async fn fit_to_width(&self) -> Result<ViewState> {
        self.execute(ViewerCommand::FitToWidth).await
    }

    pub async fn rotate(&self) -> Result<ViewState> {
        self.execute(ViewerCommand::Rotate).await
    }
}

/// Owns a viewer's background tasks and aborts them when dropped
#[derive(Debug, Default)]
pub(crate) struct SurfaceTasks {
    tasks: Vec<JoinHandle<()>>,
}

impl SurfaceTasks {
    pub(crate) fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }
}

impl Drop for SurfaceTasks {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
