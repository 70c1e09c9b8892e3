//! Process-wide authenticated session state with expiry-aware accessors

use std::{fmt, sync::Arc, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::persist::{
    KeyValueStore, KEY_ACCESS_TOKEN, KEY_IDENTITY, KEY_ISSUED_AT, KEY_REFRESH_TOKEN,
};
use crate::error::Result;

/// Authenticated session
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub identity: String,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("issued_at", &self.issued_at)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl Session {
    /// Expiry from the token's `exp` claim, else `issued_at + ttl`
    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        if let Some(exp) = jwt_expiry(&self.access_token) {
            return exp;
        }
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.issued_at + ttl
    }
}

/// Reads the `exp` claim of a JWT without verifying it
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Owner of the current [`Session`]
pub struct SessionStore {
    current: RwLock<Option<Session>>,
    store: Arc<dyn KeyValueStore>,
    access_ttl: Duration,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("current", &*self.current.read())
            .field("access_ttl", &self.access_ttl)
            .finish()
    }
}

impl SessionStore {
    /// Creates an empty store backed by `store`
    pub fn new(store: Arc<dyn KeyValueStore>, access_ttl: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            store,
            access_ttl,
        }
    }

    /// Creates a store and restores any session persisted by a previous run
    pub fn restore(store: Arc<dyn KeyValueStore>, access_ttl: Duration) -> Result<Self> {
        let session = match (
            store.get(KEY_ACCESS_TOKEN)?,
            store.get(KEY_REFRESH_TOKEN)?,
            store.get(KEY_IDENTITY)?,
        ) {
            (Some(access_token), Some(refresh_token), Some(identity)) => {
                let issued_at = store
                    .get(KEY_ISSUED_AT)?
                    .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                Some(Session {
                    access_token,
                    refresh_token,
                    identity,
                    issued_at,
                })
            }
            _ => None,
        };

        if let Some(ref s) = session {
            info!("🔑 Restored session for {}", s.identity);
        }

        Ok(Self {
            current: RwLock::new(session),
            store,
            access_ttl,
        })
    }

    /// Login success: replaces any existing session
    pub fn establish(&self, access_token: String, refresh_token: String, identity: String) {
        let session = Session {
            access_token,
            refresh_token,
            identity,
            issued_at: Utc::now(),
        };
        self.persist(&session);
        *self.current.write() = Some(session);
    }

    /// Refresh success: swaps the access token, keeps identity and refresh token.
    /// Returns false when there is no session to update.
    pub fn replace_access_token(&self, access_token: String) -> bool {
        let mut guard = self.current.write();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        session.access_token = access_token;
        session.issued_at = Utc::now();
        let snapshot = session.clone();
        drop(guard);

        self.persist(&snapshot);
        true
    }

    /// Logout or irrecoverable refresh failure
    pub fn clear(&self) {
        if let Some(session) = self.current.write().take() {
            debug!("Clearing session for {}", session.identity);
        }
        for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_IDENTITY, KEY_ISSUED_AT] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove persisted {}: {}", key, e);
            }
        }
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.refresh_token.clone())
    }

    pub fn identity(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.identity.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    /// Expiry instant of the current access token
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current
            .read()
            .as_ref()
            .map(|s| s.expires_at(self.access_ttl))
    }

    /// True when the access token is known to be expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|exp| exp <= now).unwrap_or(false)
    }

    fn persist(&self, session: &Session) {
        let writes = [
            (KEY_ACCESS_TOKEN, session.access_token.clone()),
            (KEY_REFRESH_TOKEN, session.refresh_token.clone()),
            (KEY_IDENTITY, session.identity.clone()),
            (KEY_ISSUED_AT, session.issued_at.to_rfc3339()),
        ];
        for (key, value) in writes {
            if let Err(e) = self.store.set(key, &value) {
                warn!("Failed to persist {}: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::persist::MemoryStore;

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"alice","exp":{}}}"#, exp));
        format!("{}.{}.signature", header, claims)
    }

    #[test]
    fn test_establish_and_restore() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = SessionStore::new(kv.clone(), Duration::from_secs(60));
        store.establish("t1".into(), "r1".into(), "alice".into());

        let restored = SessionStore::restore(kv, Duration::from_secs(60)).unwrap();
        assert_eq!(restored.access_token().as_deref(), Some("t1"));
        assert_eq!(restored.refresh_token().as_deref(), Some("r1"));
        assert_eq!(restored.identity().as_deref(), Some("alice"));
    }

    #[test]
    fn test_clear_removes_persisted_fields() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = SessionStore::new(kv.clone(), Duration::from_secs(60));
        store.establish("t1".into(), "r1".into(), "alice".into());
        store.clear();

        assert!(!store.is_authenticated());
        assert_eq!(kv.get(KEY_ACCESS_TOKEN).unwrap(), None);
        assert!(!SessionStore::restore(kv, Duration::from_secs(60)).unwrap().is_authenticated());
    }

    #[test]
    fn test_replace_access_token_requires_session() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        assert!(!store.replace_access_token("t2".into()));

        store.establish("t1".into(), "r1".into(), "alice".into());
        assert!(store.replace_access_token("t2".into()));
        assert_eq!(store.access_token().as_deref(), Some("t2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_expiry_from_jwt_claim() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        let past = Utc::now().timestamp() - 10;
        store.establish(jwt_with_exp(past), "r1".into(), "alice".into());
        assert!(store.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_expiry_from_ttl() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        store.establish("opaque".into(), "r1".into(), "alice".into());
        assert!(!store.is_expired_at(Utc::now()));
        assert!(store.is_expired_at(Utc::now() + chrono::Duration::seconds(120)));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        store.establish("secret-token".into(), "secret-refresh".into(), "alice".into());
        let rendered = format!("{:?}", store);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("alice"));
    }
}
