//! Authenticated fetch
//!
//! Wraps every backend call with the current access token. A 401 triggers one
//! single-flight token refresh and one retry; a failed refresh ends the session.

use std::{future::Future, result::Result as StdResult, sync::Arc};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result, ServiceError};
use crate::services::{AuthService, DocumentService};
use crate::session::SessionStore;

/// Token-aware gateway to the auth and document services
pub struct AuthenticatedFetch {
    session: Arc<SessionStore>,
    auth: Arc<dyn AuthService>,
    documents: Arc<dyn DocumentService>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for AuthenticatedFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedFetch")
            .field("session", &self.session)
            .finish()
    }
}

impl AuthenticatedFetch {
    pub fn new(
        session: Arc<SessionStore>,
        auth: Arc<dyn AuthService>,
        documents: Arc<dyn DocumentService>,
    ) -> Self {
        Self {
            session,
            auth,
            documents,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Authenticates and stores the new session
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let grant = self.auth.login(username, password).await.map_err(|e| match e {
            ServiceError::Rejected { message, .. } => Error::LoginRejected(message),
            other => Error::from(other),
        })?;

        self.session
            .establish(grant.token, grant.refresh_token, username.to_string());
        info!("🔑 Logged in as {}", username);
        Ok(())
    }

    /// Best-effort remote logout, then local teardown of the session
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        if let Some(token) = self.session.access_token() {
            if let Err(e) = self.auth.logout(&token).await {
                warn!("Remote logout failed, clearing local session anyway: {}", e);
            }
        }
        self.session.clear();
        info!("👋 Logged out");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_documents(&self) -> Result<Vec<String>> {
        let documents = &self.documents;
        self.call(|token| async move { documents.list(&token).await })
            .await
    }

    /// Fetches and decodes a document. The bytes are handed to the caller and
    /// never written anywhere.
    #[instrument(skip(self))]
    pub async fn fetch_document(&self, filename: &str) -> Result<Vec<u8>> {
        let documents = &self.documents;
        self.call(|token| async move { documents.fetch(&token, filename).await })
            .await
    }

    /// Runs `op` with the current access token.
    ///
    /// On 401 the token is refreshed once and `op` retried once; a 401 right
    /// after a proactive refresh ends the session instead. Transport failures
    /// are returned as-is.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = StdResult<T, ServiceError>>,
    {
        let mut token = self.session.access_token().ok_or(Error::NotAuthenticated)?;
        let mut refreshed = false;

        if self.session.is_expired_at(Utc::now()) {
            debug!("Access token expired, refreshing before request");
            token = self.refresh(&token).await?;
            refreshed = true;
        }

        match op(token.clone()).await {
            Ok(value) => Ok(value),
            // the token was just issued; another refresh would not help
            Err(ServiceError::Unauthorized) if refreshed => Err(self.rejected_after_refresh()),
            Err(ServiceError::Unauthorized) => {
                let fresh = self.refresh(&token).await?;
                match op(fresh).await {
                    Ok(value) => Ok(value),
                    Err(ServiceError::Unauthorized) => Err(self.rejected_after_refresh()),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn rejected_after_refresh(&self) -> Error {
        warn!("❌ Request rejected again after token refresh");
        self.force_logout();
        Error::SessionExpired("request rejected after token refresh".into())
    }

    /// Single-flight refresh. `stale` is the token the caller saw rejected; if
    /// another caller already replaced it, the current token is returned as-is.
    async fn refresh(&self, stale: &str) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        let current = self
            .session
            .access_token()
            .ok_or_else(|| Error::SessionExpired("session ended during refresh".into()))?;
        if current != stale {
            debug!("Token already refreshed by a concurrent caller");
            return Ok(current);
        }

        let refresh_token = self
            .session
            .refresh_token()
            .ok_or_else(|| Error::SessionExpired("no refresh token".into()))?;

        match self.auth.refresh(&refresh_token).await {
            Ok(token) => {
                if !self.session.replace_access_token(token.clone()) {
                    return Err(Error::SessionExpired("session ended during refresh".into()));
                }
                info!("🔄 Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!("❌ Token refresh failed: {}", e);
                self.force_logout();
                Err(Error::SessionExpired(format!("token refresh failed: {}", e)))
            }
        }
    }

    fn force_logout(&self) {
        warn!("🚪 Forcing logout");
        self.session.clear();
    }
}
