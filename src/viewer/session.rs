//! Viewer tasks: event loop, render actor and probe poller

use std::{future::pending, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{interval, sleep_until, timeout, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    CloseReason, Control, RenderRequest, SurfaceTasks, ViewerCommand, ViewerDeps, ViewerHandle,
    ViewerStatus, VisibilityGate,
};
use crate::audit::{AuditLog, EventOrigin, SecurityEventType};
use crate::channel::DocumentHandle;
use crate::config::Config;
use crate::error::{Error, RenderError, Result};
use crate::policy::WindowPolicy;
use crate::render::{RenderPipeline, ViewState};
use crate::surface::{DisplaySurface, Notice, SurfaceEvent, SurfaceRole};
use crate::threat::{classify, CaptureProbe, KeyAction, NavigationKey, ProbeReport, ThreatMonitor, ThreatState};
use crate::watermark::WatermarkBinder;

const RENDER_QUEUE: usize = 32;
const CONTROL_QUEUE: usize = 8;

enum ProbeOutcome {
    Report(ProbeReport),
    Failed(String),
}

/// Entry point for starting a viewer on a loaded surface
#[derive(Debug)]
pub struct ViewerSession;

impl ViewerSession {
    /// Starts the viewer tasks and loads `document`.
    ///
    /// `backlog` holds surface events that arrived before the surface finished
    /// loading; they reach the threat monitor before anything is rendered. The
    /// returned result is the outcome of the initial load. On a corrupt
    /// document the viewer stays open showing an error notice.
    #[instrument(skip_all, fields(file = %document.filename()))]
    pub async fn launch(
        deps: ViewerDeps,
        identity: String,
        surface: Arc<dyn DisplaySurface>,
        events: mpsc::Receiver<SurfaceEvent>,
        backlog: Vec<SurfaceEvent>,
        document: DocumentHandle,
    ) -> (ViewerHandle, Result<ViewState>) {
        let filename = document.filename().to_string();
        let origin = EventOrigin::new(Some(identity.clone()), Some(filename.clone()));

        let (status_tx, status_rx) = watch::channel(ViewerStatus::default());
        let status = Arc::new(status_tx);
        let gate = Arc::new(VisibilityGate::new(surface.clone(), status.clone()));

        let pipeline = RenderPipeline::new(deps.renderer.clone(), gate.clone())
            .with_padding(deps.config.viewer.container_padding)
            .with_zoom_step(deps.config.viewer.zoom_step);

        let (render_tx, render_rx) = mpsc::channel(RENDER_QUEUE);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);

        let mut tasks = SurfaceTasks::default();
        tasks.push(tokio::spawn(render_actor(
            pipeline,
            document,
            render_rx,
            status.clone(),
        )));

        let probe_rx = deps.probe.clone().map(|probe| {
            let (tx, rx) = mpsc::channel(4);
            tasks.push(tokio::spawn(poll_probe(
                probe,
                deps.config.threat.probe_interval(),
                deps.config.threat.probe_timeout(),
                tx,
            )));
            rx
        });

        let monitor = ThreatMonitor::new(
            deps.config.threat.clone(),
            deps.audit.clone(),
            origin.clone(),
        );

        let mut event_loop = EventLoop {
            surface: surface.clone(),
            events,
            control: control_rx,
            probe: probe_rx,
            render: render_tx.clone(),
            monitor,
            gate,
            binder: deps.binder.clone(),
            audit: deps.audit.clone(),
            policy: WindowPolicy::for_role(SurfaceRole::Viewer),
            config: deps.config.clone(),
            identity,
            origin,
            status: status.clone(),
            close_at: None,
        };

        for event in backlog {
            event_loop.on_surface_event(event, Instant::now());
        }
        tokio::spawn(event_loop.run(tasks));

        let handle = ViewerHandle {
            id: Uuid::new_v4(),
            filename,
            render: render_tx,
            control: control_tx,
            status: status_rx,
        };

        let (reply, rx) = oneshot::channel();
        let loaded = match handle.render.send(RenderRequest::Load { reply }).await {
            Ok(()) => rx.await.unwrap_or(Err(Error::SurfaceClosed)),
            Err(_) => Err(Error::SurfaceClosed),
        };

        if let Err(ref e) = loaded {
            error!("❌ Failed to load document: {}", e);
            status.send_modify(|s| s.error = Some(e.code()));
            surface.show_notice(&Notice::ViewerError {
                code: e.code(),
                message: e.to_string(),
            });
        }

        (handle, loaded)
    }
}

/// Owns the pipeline and the document bytes. Bytes are dropped once parsed.
async fn render_actor(
    mut pipeline: RenderPipeline,
    document: DocumentHandle,
    mut requests: mpsc::Receiver<RenderRequest>,
    status: Arc<watch::Sender<ViewerStatus>>,
) {
    let mut document = Some(document);

    while let Some(request) = requests.recv().await {
        match request {
            RenderRequest::Load { reply } => {
                let result = match document.take() {
                    Some(doc) => pipeline.load(doc.payload()).await,
                    None => Err(Error::CorruptDocument("document already consumed".into())),
                };
                publish(&status, &result);
                let _ = reply.send(result);
            }
            RenderRequest::Command { command, reply } => {
                let result = apply(&mut pipeline, command).await;
                match result {
                    Err(Error::RenderError(RenderError::NotLoaded)) => {
                        debug!("{:?} before load", command)
                    }
                    Err(ref e) => warn!("Render command {:?} failed: {}", command, e),
                    Ok(_) => {}
                }
                publish(&status, &result);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }
}

fn publish(status: &watch::Sender<ViewerStatus>, result: &Result<ViewState>) {
    if let Ok(view) = result {
        let view = *view;
        status.send_modify(|s| s.view = Some(view));
    }
}

async fn apply(pipeline: &mut RenderPipeline, command: ViewerCommand) -> Result<ViewState> {
    match command {
        ViewerCommand::GoTo(page) => pipeline.go_to(page).await,
        ViewerCommand::NextPage => pipeline.next_page().await,
        ViewerCommand::PreviousPage => pipeline.previous_page().await,
        ViewerCommand::FirstPage => pipeline.first_page().await,
        ViewerCommand::LastPage => pipeline.last_page().await,
        ViewerCommand::Zoom(delta) => pipeline.zoom(delta).await,
        ViewerCommand::ResetZoom => pipeline.reset_zoom().await,
        ViewerCommand::FitToWidth => pipeline.fit_to_width().await,
        ViewerCommand::Rotate => pipeline.rotate().await,
        ViewerCommand::SetContainerWidth(width) => {
            pipeline.set_container_width(width);
            pipeline
                .state()
                .ok_or(Error::RenderError(RenderError::NotLoaded))
        }
    }
}

async fn poll_probe(
    probe: Arc<dyn CaptureProbe>,
    every: Duration,
    limit: Duration,
    outcomes: mpsc::Sender<ProbeOutcome>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let outcome = match timeout(limit, probe.check()).await {
            Ok(Ok(report)) => ProbeOutcome::Report(report),
            Ok(Err(e)) => ProbeOutcome::Failed(e.to_string()),
            Err(_) => ProbeOutcome::Failed(format!("no answer within {:?}", limit)),
        };
        if outcomes.send(outcome).await.is_err() {
            break;
        }
    }
}

async fn recv_probe(probe: &mut Option<mpsc::Receiver<ProbeOutcome>>) -> Option<ProbeOutcome> {
    match probe {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

struct EventLoop {
    surface: Arc<dyn DisplaySurface>,
    events: mpsc::Receiver<SurfaceEvent>,
    control: mpsc::Receiver<Control>,
    probe: Option<mpsc::Receiver<ProbeOutcome>>,
    render: mpsc::Sender<RenderRequest>,
    monitor: ThreatMonitor,
    gate: Arc<VisibilityGate>,
    binder: Arc<WatermarkBinder>,
    audit: Arc<AuditLog>,
    policy: WindowPolicy,
    config: Arc<Config>,
    identity: String,
    origin: EventOrigin,
    status: Arc<watch::Sender<ViewerStatus>>,
    close_at: Option<Instant>,
}

impl EventLoop {
    async fn run(mut self, tasks: SurfaceTasks) {
        let mut watermark = interval(self.config.watermark_refresh());
        watermark.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            let restore_at = self.monitor.next_deadline();
            let close_at = self.close_at;

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if event == SurfaceEvent::CloseRequested {
                            break CloseReason::SurfaceClosed;
                        }
                        self.on_surface_event(event, Instant::now());
                    }
                    None => break CloseReason::SurfaceClosed,
                },
                control = self.control.recv() => match control {
                    Some(Control::Focus) => self.surface.focus(),
                    Some(Control::Close) | None => break CloseReason::Requested,
                },
                outcome = recv_probe(&mut self.probe), if self.probe.is_some() => match outcome {
                    Some(outcome) => self.on_probe(outcome),
                    None => self.probe = None,
                },
                _ = watermark.tick() => self.refresh_overlay(),
                _ = sleep_until(restore_at.unwrap_or_else(Instant::now)), if restore_at.is_some() => {
                    let before = self.monitor.state();
                    self.monitor.tick(Instant::now());
                    self.sync(before);
                }
                _ = sleep_until(close_at.unwrap_or_else(Instant::now)), if close_at.is_some() => {
                    break CloseReason::ThreatConfirmed;
                }
            }
        };

        info!("🚪 Closing viewer ({:?})", reason);
        self.surface.close();
        self.status.send_modify(|s| s.closed = Some(reason));
        drop(tasks);
    }

    fn on_surface_event(&mut self, event: SurfaceEvent, now: Instant) {
        let before = self.monitor.state();
        match event {
            SurfaceEvent::Blur => {
                self.monitor.focus_lost(now);
            }
            SurfaceEvent::Focus => {
                self.monitor.focus_returned(now);
            }
            SurfaceEvent::VisibilityChanged { visible } => {
                self.monitor.visibility_changed(visible, now);
            }
            SurfaceEvent::Key(key) => match classify(&key) {
                KeyAction::Capture(precursor) => {
                    self.monitor.capture_key(&precursor, now);
                }
                KeyAction::Blocked(kind) => {
                    self.audit.record(
                        kind,
                        format!("Blocked shortcut: {}", describe_key(&key)),
                        &self.origin,
                    );
                }
                KeyAction::Navigate(nav) => self.navigate(nav),
                KeyAction::Ignore => {}
            },
            SurfaceEvent::Resized { width, .. } => {
                self.send_render(ViewerCommand::SetContainerWidth(width));
            }
            SurfaceEvent::Wheel { delta_y, ctrl, meta } if ctrl || meta => {
                // scrolling down zooms out
                let step = self.config.viewer.zoom_step;
                let delta = if delta_y > 0.0 { -step } else { step };
                self.send_render(ViewerCommand::Zoom(delta));
            }
            SurfaceEvent::Wheel { .. } => {}
            SurfaceEvent::NavigationRequested { url } => {
                if !self.policy.permits_navigation(&url) {
                    self.audit.record(
                        SecurityEventType::NavigationBlocked,
                        format!("Blocked navigation to {}", url),
                        &self.origin,
                    );
                }
            }
            SurfaceEvent::LoadFinished | SurfaceEvent::CloseRequested => {
                debug!("Ignoring {:?} on a running viewer", event);
            }
        }
        self.sync(before);
    }

    fn navigate(&self, nav: NavigationKey) {
        let step = self.config.viewer.zoom_step;
        let command = match nav {
            NavigationKey::PreviousPage => ViewerCommand::PreviousPage,
            NavigationKey::NextPage => ViewerCommand::NextPage,
            NavigationKey::FirstPage => ViewerCommand::FirstPage,
            NavigationKey::LastPage => ViewerCommand::LastPage,
            NavigationKey::ZoomIn => ViewerCommand::Zoom(step),
            NavigationKey::ZoomOut => ViewerCommand::Zoom(-step),
            NavigationKey::ResetZoom => ViewerCommand::ResetZoom,
        };
        self.send_render(command);
    }

    fn send_render(&self, command: ViewerCommand) {
        let request = RenderRequest::Command {
            command,
            reply: None,
        };
        if self.render.try_send(request).is_err() {
            debug!("Render queue full, dropping {:?}", command);
        }
    }

    fn on_probe(&mut self, outcome: ProbeOutcome) {
        let before = self.monitor.state();
        match outcome {
            ProbeOutcome::Report(report) => {
                self.monitor.probe_report(&report);
            }
            ProbeOutcome::Failed(reason) => {
                warn!("Capture probe failed: {}", reason);
                self.monitor.probe_failed(&reason, Instant::now());
            }
        }
        self.sync(before);
    }

    /// Pushes a monitor transition to the gate, the status and the surface
    fn sync(&mut self, before: ThreatState) {
        let after = self.monitor.state();
        self.gate.set_clear(after == ThreatState::Clear);
        if after == before {
            return;
        }

        self.status.send_modify(|s| s.threat = after);
        if after == ThreatState::Confirmed {
            let processes = self
                .monitor
                .detection()
                .map(|d| d.processes.clone())
                .unwrap_or_default();
            self.surface.show_notice(&Notice::ThreatBlocked {
                processes,
                identity: self.identity.clone(),
                timestamp: self.monitor.detection().map(|d| d.at).unwrap_or_else(Utc::now),
            });
            self.close_at = Some(Instant::now() + self.config.threat.forced_close_delay());
        }
    }

    fn refresh_overlay(&self) {
        match self
            .binder
            .describe(&self.identity, self.origin.filename.as_deref())
        {
            Ok(spec) => self.surface.show_overlay(&spec),
            Err(e) => error!("Failed to build watermark: {}", e),
        }
    }
}

fn describe_key(key: &crate::surface::KeyEvent) -> String {
    let mut parts = Vec::new();
    if key.ctrl {
        parts.push("Ctrl");
    }
    if key.meta {
        parts.push("Meta");
    }
    if key.alt {
        parts.push("Alt");
    }
    if key.shift {
        parts.push("Shift");
    }
    parts.push(key.key.as_str());
    parts.join("+")
}
