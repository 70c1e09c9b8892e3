//! Document channel
//!
//! Owns the single viewer slot of a session. `open` is idempotent while a
//! viewer is pending or open, and document bytes only reach the viewer after
//! its surface reported that it finished loading.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, watch},
    time::timeout,
};
use tracing::{debug, info, instrument, warn};

use crate::audit::EventOrigin;
use crate::error::{Error, Result};
use crate::fetch::AuthenticatedFetch;
use crate::policy::WindowPolicy;
use crate::surface::{DisplaySurface, SurfaceEvent, SurfaceHost, SurfaceRole};
use crate::viewer::{ViewerDeps, ViewerHandle, ViewerSession};

/// Decoded document bytes on their way to a viewer
pub struct DocumentHandle {
    filename: String,
    payload: Vec<u8>,
    opened_at: DateTime<Utc>,
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("filename", &self.filename)
            .field("len", &self.payload.len())
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

impl DocumentHandle {
    pub fn new(filename: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            payload,
            opened_at: Utc::now(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

/// Result of [`DocumentChannel::open`]
#[derive(Debug)]
pub enum OpenOutcome {
    Opened(ViewerHandle),
    /// A viewer was already pending or open; it was focused instead
    FocusedExisting,
}

enum Slot {
    Empty,
    Pending {
        surface: Option<Arc<dyn DisplaySurface>>,
        /// Set by [`DocumentChannel::close`] before the viewer launched
        cancel: watch::Sender<bool>,
    },
    Open(ViewerHandle),
}

/// Resets a pending slot unless the open completed
struct PendingGuard {
    slot: Arc<Mutex<Slot>>,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.slot.lock();
            if matches!(*slot, Slot::Pending { .. }) {
                *slot = Slot::Empty;
            }
        }
    }
}

pub struct DocumentChannel {
    fetch: Arc<AuthenticatedFetch>,
    host: Arc<dyn SurfaceHost>,
    deps: ViewerDeps,
    slot: Arc<Mutex<Slot>>,
}

impl fmt::Debug for DocumentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.lock() {
            Slot::Empty => "empty",
            Slot::Pending { .. } => "pending",
            Slot::Open(_) => "open",
        };
        f.debug_struct("DocumentChannel").field("slot", &state).finish()
    }
}

impl DocumentChannel {
    pub fn new(fetch: Arc<AuthenticatedFetch>, host: Arc<dyn SurfaceHost>, deps: ViewerDeps) -> Self {
        Self {
            fetch,
            host,
            deps,
            slot: Arc::new(Mutex::new(Slot::Empty)),
        }
    }

    /// The open viewer, if any
    pub fn current(&self) -> Option<ViewerHandle> {
        match &*self.slot.lock() {
            Slot::Open(handle) if !handle.is_closed() => Some(handle.clone()),
            _ => None,
        }
    }

    /// Opens `filename` in a new protected viewer.
    ///
    /// Fails with the fetch error (auth or transport), a surface error, or
    /// `CORRUPT_DOCUMENT`. In the last case the viewer stays open showing the
    /// error until closed.
    #[instrument(skip(self))]
    pub async fn open(&self, filename: &str) -> Result<OpenOutcome> {
        let (cancel, mut cancelled) = watch::channel(false);
        if let Some(existing) = self.claim(cancel) {
            return Ok(existing);
        }
        let guard = PendingGuard {
            slot: self.slot.clone(),
            armed: true,
        };

        let payload = self.fetch.fetch_document(filename).await?;
        if *cancelled.borrow() {
            debug!("Open of {} cancelled before surface creation", filename);
            return Err(Error::SurfaceClosed);
        }
        let identity = self
            .fetch
            .session()
            .identity()
            .ok_or(Error::NotAuthenticated)?;

        let handle = self.host.create(SurfaceRole::Viewer).await?;
        let surface = handle.surface;
        let mut events = handle.events;
        let cancelled_early = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Pending { surface: pending, cancel } if !*cancel.borrow() => {
                    *pending = Some(surface.clone());
                    false
                }
                _ => true,
            }
        };
        if cancelled_early {
            debug!("Open of {} cancelled during surface creation", filename);
            surface.close();
            return Err(Error::SurfaceClosed);
        }

        let origin = EventOrigin::new(Some(identity.clone()), Some(filename.to_string()));
        WindowPolicy::for_role(SurfaceRole::Viewer).apply(surface.as_ref(), &self.deps.audit, &origin);

        let backlog = match self.await_load(&mut events, &mut cancelled).await {
            Ok(backlog) => backlog,
            Err(e) => {
                warn!("Viewer surface did not finish loading: {}", e);
                // a cancelling close() already closed the surface
                if !*cancelled.borrow() {
                    surface.close();
                }
                return Err(e);
            }
        };

        let document = DocumentHandle::new(filename, payload);
        let (viewer, loaded) = ViewerSession::launch(
            self.deps.clone(),
            identity,
            surface,
            events,
            backlog,
            document,
        )
        .await;

        let cancelled_late = {
            let mut slot = self.slot.lock();
            if *cancelled.borrow() {
                true
            } else {
                *slot = Slot::Open(viewer.clone());
                false
            }
        };
        if cancelled_late {
            debug!("Open of {} cancelled during launch", filename);
            viewer.close().await;
            return Err(Error::SurfaceClosed);
        }
        guard.disarm();
        self.release_on_close(&viewer);

        let view = loaded?;
        info!("📖 Opened {} ({} pages)", filename, view.page_count);
        Ok(OpenOutcome::Opened(viewer))
    }

    /// Closes the open viewer, or cancels one that is still opening
    pub async fn close(&self) {
        let (handle, pending_surface) = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Open(handle) => (Some(handle.clone()), None),
                Slot::Pending { surface, cancel } => {
                    debug!("Cancelling pending viewer");
                    cancel.send_replace(true);
                    (None, surface.take())
                }
                Slot::Empty => (None, None),
            }
        };
        if let Some(surface) = pending_surface {
            surface.close();
        }
        if let Some(handle) = handle {
            handle.close().await;
            *self.slot.lock() = Slot::Empty;
        }
    }

    /// Marks the slot pending, or focuses what already occupies it
    fn claim(&self, cancel: watch::Sender<bool>) -> Option<OpenOutcome> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Pending { surface, .. } => {
                debug!("Viewer already pending");
                if let Some(surface) = surface {
                    surface.focus();
                }
                return Some(OpenOutcome::FocusedExisting);
            }
            Slot::Open(handle) if !handle.is_closed() => {
                debug!("Viewer already open, focusing");
                handle.focus();
                return Some(OpenOutcome::FocusedExisting);
            }
            _ => {}
        }
        *slot = Slot::Pending {
            surface: None,
            cancel,
        };
        None
    }

    /// Collects events until `LoadFinished`, bounded by the configured timeout
    /// and ended early by a cancelling [`close`](Self::close)
    async fn await_load(
        &self,
        events: &mut mpsc::Receiver<SurfaceEvent>,
        cancelled: &mut watch::Receiver<bool>,
    ) -> Result<Vec<SurfaceEvent>> {
        let limit = self.deps.config.surface_load_timeout();
        let mut backlog = Vec::new();

        let load = async {
            while let Some(event) = events.recv().await {
                match event {
                    SurfaceEvent::LoadFinished => return Ok(()),
                    SurfaceEvent::CloseRequested => return Err(Error::SurfaceClosed),
                    other => backlog.push(other),
                }
            }
            Err(Error::SurfaceClosed)
        };
        let cancel = async {
            let _ = cancelled.wait_for(|c| *c).await;
        };

        let waited = timeout(limit, async {
            tokio::select! {
                loaded = load => loaded,
                _ = cancel => Err(Error::SurfaceClosed),
            }
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(backlog),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::TimeoutError(format!(
                "surface did not load within {:?}",
                limit
            ))),
        }
    }

    fn release_on_close(&self, viewer: &ViewerHandle) {
        let slot = self.slot.clone();
        let id = viewer.id();
        let mut status = viewer.subscribe();
        tokio::spawn(async move {
            let _ = status.wait_for(|s| s.closed.is_some()).await;
            let mut slot = slot.lock();
            if matches!(&*slot, Slot::Open(h) if h.id() == id) {
                *slot = Slot::Empty;
            }
        });
    }
}
