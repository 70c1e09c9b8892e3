//! Application context
//!
//! Everything a process shares between viewers is created here once and torn
//! down explicitly; there is no global state.

use std::{sync::Arc, time::Duration};

use tracing::{info, instrument};

use crate::audit::AuditLog;
use crate::channel::DocumentChannel;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::AuthenticatedFetch;
use crate::render::PdfRenderer;
use crate::services::{AuthService, DocumentService, HttpApi};
use crate::session::{KeyValueStore, SessionStore};
use crate::surface::SurfaceHost;
use crate::threat::CaptureProbe;
use crate::viewer::ViewerDeps;
use crate::watermark::WatermarkBinder;

pub struct AppContext {
    config: Arc<Config>,
    session: Arc<SessionStore>,
    audit: Arc<AuditLog>,
    binder: Arc<WatermarkBinder>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("session", &self.session)
            .field("audit", &self.audit)
            .finish()
    }
}

impl AppContext {
    /// Validates `config`, restores any persisted session and security log
    #[instrument(skip_all)]
    pub fn init(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;

        let session = SessionStore::restore(
            store.clone(),
            Duration::from_secs(config.session.access_token_ttl_secs),
        )?;
        let audit = AuditLog::persistent(config.audit.capacity, store)?;
        let binder = WatermarkBinder::new(&config.watermark);

        info!("🛡️ Context ready (api={})", config.api.base_url);
        Ok(Self {
            config: Arc::new(config),
            session: Arc::new(session),
            audit: Arc::new(audit),
            binder: Arc::new(binder),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn binder(&self) -> &Arc<WatermarkBinder> {
        &self.binder
    }

    /// HTTP client for the configured backend
    pub fn http_api(&self) -> Result<HttpApi> {
        HttpApi::new(self.config.api.base_url.clone(), self.config.request_timeout())
    }

    pub fn fetch(
        &self,
        auth: Arc<dyn AuthService>,
        documents: Arc<dyn DocumentService>,
    ) -> AuthenticatedFetch {
        AuthenticatedFetch::new(self.session.clone(), auth, documents)
    }

    pub fn viewer_deps(
        &self,
        renderer: Arc<dyn PdfRenderer>,
        probe: Option<Arc<dyn CaptureProbe>>,
    ) -> ViewerDeps {
        ViewerDeps {
            config: self.config.clone(),
            audit: self.audit.clone(),
            binder: self.binder.clone(),
            renderer,
            probe,
        }
    }

    pub fn channel(
        &self,
        fetch: Arc<AuthenticatedFetch>,
        host: Arc<dyn SurfaceHost>,
        renderer: Arc<dyn PdfRenderer>,
        probe: Option<Arc<dyn CaptureProbe>>,
    ) -> DocumentChannel {
        DocumentChannel::new(fetch, host, self.viewer_deps(renderer, probe))
    }

    /// Flushes the security log
    pub fn teardown(self) -> Result<()> {
        self.audit.flush()?;
        info!("Context torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{EventOrigin, SecurityEventType};
    use crate::session::MemoryStore;

    #[test]
    fn test_init_restores_and_teardown_flushes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ctx = AppContext::init(Config::default(), store.clone()).unwrap();
        ctx.session().establish("t1".into(), "r1".into(), "alice".into());
        ctx.audit().record(SecurityEventType::CopyAttempt, "copy", &EventOrigin::default());
        ctx.teardown().unwrap();

        let ctx = AppContext::init(Config::default(), store).unwrap();
        assert_eq!(ctx.session().identity().as_deref(), Some("alice"));
        assert_eq!(ctx.audit().count_of(SecurityEventType::CopyAttempt), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.watermark.refresh_interval_ms = 5_000;
        assert!(AppContext::init(config, Arc::new(MemoryStore::new())).is_err());
    }
}
