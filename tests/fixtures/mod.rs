#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pdfshield::render::{PageSize, ParsedPdf, PdfPage, PdfRenderer, Raster, Viewport};
use pdfshield::{
    AuditLog, CaptureProbe, Config, DisplaySurface, LoginGrant, Notice, PolicyReport,
    ProbeReport, RenderError, Result, ServiceError, SurfaceEvent, SurfaceHandle, SurfaceHost,
    SurfaceRole, ViewerDeps, WatermarkBinder, WatermarkSpec, WindowPolicy,
};

/// In-process auth and document backend
pub struct FakeBackend {
    users: HashMap<String, String>,
    documents: HashMap<String, Vec<u8>>,
    fetch_delay: Duration,
    issued: AtomicUsize,
    refreshes: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "correct horse".to_string());

        let mut documents = HashMap::new();
        documents.insert("a.pdf".to_string(), b"%PDF-1.7 a".to_vec());
        documents.insert("b.pdf".to_string(), b"%PDF-1.7 b".to_vec());

        Self {
            users,
            documents,
            fetch_delay: Duration::from_millis(50),
            issued: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn authorize(&self, token: &str) -> std::result::Result<(), ServiceError> {
        if token.starts_with("access-") {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized)
        }
    }
}

#[async_trait]
impl pdfshield::AuthService for FakeBackend {
    async fn login(&self, username: &str, password: &str) -> std::result::Result<LoginGrant, ServiceError> {
        match self.users.get(username) {
            Some(expected) if expected == password => {
                let n = self.issued.fetch_add(1, Ordering::SeqCst);
                Ok(LoginGrant {
                    token: format!("access-{}", n),
                    refresh_token: format!("refresh-{}", n),
                })
            }
            _ => Err(ServiceError::Rejected {
                status: 401,
                message: "invalid credentials".into(),
            }),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> std::result::Result<String, ServiceError> {
        if !refresh_token.starts_with("refresh-") {
            return Err(ServiceError::Unauthorized);
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(format!("access-r{}", n))
    }

    async fn logout(&self, _token: &str) -> std::result::Result<(), ServiceError> {
        Ok(())
    }
}

#[async_trait]
impl pdfshield::DocumentService for FakeBackend {
    async fn list(&self, token: &str) -> std::result::Result<Vec<String>, ServiceError> {
        self.authorize(token)?;
        let mut names: Vec<String> = self.documents.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn fetch(&self, token: &str, filename: &str) -> std::result::Result<Vec<u8>, ServiceError> {
        self.authorize(token)?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.fetch_delay).await;
        self.documents
            .get(filename)
            .cloned()
            .ok_or_else(|| ServiceError::Rejected {
                status: 404,
                message: "not found".into(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ApplyPolicy,
    SetVisible(bool),
    RenderFrame(u32),
    ShowOverlay,
    ShowNotice(Notice),
    Focus,
    Close,
}

/// Surface that records every command it receives
pub struct FakeSurface {
    role: SurfaceRole,
    calls: Mutex<Vec<Call>>,
}

impl FakeSurface {
    pub fn new(role: SurfaceRole) -> Self {
        Self {
            role,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn frames(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::RenderFrame(_)))
            .count()
    }

    pub fn overlays(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::ShowOverlay))
            .count()
    }

    pub fn focus_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Focus))
            .count()
    }

    pub fn visibility_changes(&self) -> Vec<bool> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::SetVisible(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::ShowNotice(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.calls.lock().contains(&Call::Close)
    }

    pub fn close_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Close))
            .count()
    }
}

impl DisplaySurface for FakeSurface {
    fn role(&self) -> SurfaceRole {
        self.role
    }

    fn apply_policy(&self, _policy: &WindowPolicy) -> PolicyReport {
        self.calls.lock().push(Call::ApplyPolicy);
        PolicyReport::honored()
    }

    fn set_visible(&self, visible: bool) {
        self.calls.lock().push(Call::SetVisible(visible));
    }

    fn render_frame(&self, raster: &Raster) {
        self.calls.lock().push(Call::RenderFrame(raster.page));
    }

    fn show_overlay(&self, _spec: &WatermarkSpec) {
        self.calls.lock().push(Call::ShowOverlay);
    }

    fn show_notice(&self, notice: &Notice) {
        self.calls.lock().push(Call::ShowNotice(notice.clone()));
    }

    fn focus(&self) {
        self.calls.lock().push(Call::Focus);
    }

    fn close(&self) {
        self.calls.lock().push(Call::Close);
    }
}

/// Host whose surfaces report `LoadFinished` right away unless built with
/// [`FakeSurfaceHost::without_load`]
pub struct FakeSurfaceHost {
    created: Mutex<Vec<(Arc<FakeSurface>, mpsc::Sender<SurfaceEvent>)>>,
    auto_load: bool,
}

impl FakeSurfaceHost {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            auto_load: true,
        }
    }

    /// Surfaces stay loading until the test emits `LoadFinished`
    pub fn without_load() -> Self {
        Self {
            auto_load: false,
            ..Self::new()
        }
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn surface(&self, index: usize) -> Arc<FakeSurface> {
        self.created.lock()[index].0.clone()
    }

    pub async fn emit(&self, index: usize, event: SurfaceEvent) {
        let tx = self.created.lock()[index].1.clone();
        tx.send(event).await.unwrap();
    }
}

#[async_trait]
impl SurfaceHost for FakeSurfaceHost {
    async fn create(&self, role: SurfaceRole) -> Result<SurfaceHandle> {
        let surface = Arc::new(FakeSurface::new(role));
        let (tx, rx) = mpsc::channel(64);
        if self.auto_load {
            tx.send(SurfaceEvent::LoadFinished).await.unwrap();
        }
        self.created.lock().push((surface.clone(), tx));
        Ok(SurfaceHandle {
            surface,
            events: rx,
        })
    }
}

/// Renderer producing `pages` Letter-sized pages regardless of input
#[derive(Clone)]
pub struct FakeRenderer {
    pages: u32,
}

impl FakeRenderer {
    pub fn with_pages(pages: u32) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl PdfRenderer for FakeRenderer {
    async fn parse(&self, bytes: &[u8]) -> std::result::Result<Arc<dyn ParsedPdf>, RenderError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(RenderError::Malformed("missing header".into()));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl ParsedPdf for FakeRenderer {
    fn page_count(&self) -> u32 {
        self.pages
    }

    async fn page(&self, number: u32) -> std::result::Result<Box<dyn PdfPage>, RenderError> {
        if number < 1 || number > self.pages {
            return Err(RenderError::PageOutOfRange(number));
        }
        Ok(Box::new(FakePage { number }))
    }
}

struct FakePage {
    number: u32,
}

#[async_trait]
impl PdfPage for FakePage {
    fn intrinsic_size(&self) -> PageSize {
        PageSize {
            width: 612.0,
            height: 792.0,
        }
    }

    async fn render(&self, viewport: &Viewport) -> std::result::Result<Raster, RenderError> {
        Ok(Raster {
            page: self.number,
            width: (612.0 * viewport.zoom) as u32,
            height: (792.0 * viewport.zoom) as u32,
            zoom: viewport.zoom,
            rotation: viewport.rotation,
            data: Arc::from(&b"raster"[..]),
        })
    }
}

/// Probe answering with whatever report was last set
pub struct StaticProbe {
    report: Mutex<ProbeReport>,
}

impl StaticProbe {
    pub fn clean() -> Self {
        Self {
            report: Mutex::new(ProbeReport::default()),
        }
    }

    pub fn set(&self, report: ProbeReport) {
        *self.report.lock() = report;
    }
}

#[async_trait]
impl CaptureProbe for StaticProbe {
    async fn check(&self) -> Result<ProbeReport> {
        Ok(self.report.lock().clone())
    }
}

pub fn viewer_deps(pages: u32, probe: Option<Arc<dyn CaptureProbe>>) -> ViewerDeps {
    let config = Config::default();
    ViewerDeps {
        binder: Arc::new(WatermarkBinder::new(&config.watermark)),
        config: Arc::new(config),
        audit: Arc::new(AuditLog::new(200)),
        renderer: Arc::new(FakeRenderer::with_pages(pages)),
        probe,
    }
}
