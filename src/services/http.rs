//! HTTP backend for [`AuthService`] and [`DocumentService`]
//!
//! Endpoints:
//! - `POST /login` `{username, password}` → `{success, token, refreshToken}`
//! - `POST /refresh` `{refreshToken}` → `{success, token}`
//! - `POST /logout` (bearer)
//! - `GET /api/files` (bearer) → `{success, files}`
//! - `GET /api/pdf/{filename}` (bearer) → `{success, base64}`

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{AuthService, DocumentService, LoginGrant};
use crate::error::{Error, Result, ServiceError};

/// Response envelope shared by every endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Envelope {
    success: bool,
    token: Option<String>,
    refresh_token: Option<String>,
    files: Option<Vec<String>>,
    base64: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

/// reqwest-backed client for the document API
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::TransportError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned + Default>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<T, ServiceError> {
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ServiceError::Unauthorized);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Envelope>(&body)
                .ok()
                .and_then(|env| env.error)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        if body.is_empty() {
            return Ok(T::default());
        }
        serde_json::from_slice(&body).map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    fn check(envelope: &Envelope, what: &str) -> std::result::Result<(), ServiceError> {
        if envelope.success {
            Ok(())
        } else {
            Err(ServiceError::Rejected {
                status: 200,
                message: envelope
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", what)),
            })
        }
    }
}

#[async_trait]
impl AuthService for HttpApi {
    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> std::result::Result<LoginGrant, ServiceError> {
        let request = self
            .client
            .post(self.url("/login"))
            .json(&LoginBody { username, password });

        let envelope: Envelope = match self.send(request).await {
            // a 401 from the login endpoint means bad credentials, not an expired session
            Err(ServiceError::Unauthorized) => {
                return Err(ServiceError::Rejected {
                    status: 401,
                    message: "invalid credentials".into(),
                })
            }
            other => other?,
        };
        Self::check(&envelope, "login")?;

        match (envelope.token, envelope.refresh_token) {
            (Some(token), Some(refresh_token)) => Ok(LoginGrant { token, refresh_token }),
            _ => Err(ServiceError::Malformed("login response without tokens".into())),
        }
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<String, ServiceError> {
        let request = self
            .client
            .post(self.url("/refresh"))
            .json(&RefreshBody { refresh_token });

        let envelope: Envelope = self.send(request).await?;
        Self::check(&envelope, "refresh")?;
        envelope
            .token
            .ok_or_else(|| ServiceError::Malformed("refresh response without token".into()))
    }

    #[instrument(skip_all)]
    async fn logout(&self, token: &str) -> std::result::Result<(), ServiceError> {
        let request = self.client.post(self.url("/logout")).bearer_auth(token);
        let _: Envelope = self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentService for HttpApi {
    #[instrument(skip_all)]
    async fn list(&self, token: &str) -> std::result::Result<Vec<String>, ServiceError> {
        let request = self.client.get(self.url("/api/files")).bearer_auth(token);
        let envelope: Envelope = self.send(request).await?;
        Self::check(&envelope, "document list")?;
        envelope
            .files
            .ok_or_else(|| ServiceError::Malformed("list response without files".into()))
    }

    #[instrument(skip(self, token))]
    async fn fetch(&self, token: &str, filename: &str) -> std::result::Result<Vec<u8>, ServiceError> {
        let path = format!("/api/pdf/{}", urlencoding::encode(filename));
        let request = self.client.get(self.url(&path)).bearer_auth(token);

        let envelope: Envelope = self.send(request).await?;
        Self::check(&envelope, "document fetch")?;
        let encoded = envelope
            .base64
            .ok_or_else(|| ServiceError::Malformed("document response without payload".into()))?;

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ServiceError::Malformed(format!("invalid base64 payload: {}", e)))?;
        debug!("Fetched {} ({} bytes)", filename, bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    async fn api(server: &mockito::ServerGuard) -> HttpApi {
        HttpApi::new(server.url(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_login_returns_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/login")
            .match_body(Matcher::Json(json!({"username": "admin", "password": "admin123"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"token":"t1","refreshToken":"r1"}"#)
            .create_async()
            .await;

        let grant = api(&server).await.login("admin", "admin123").await.unwrap();
        assert_eq!(grant, LoginGrant { token: "t1".into(), refresh_token: "r1".into() });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_failure_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"success":false,"error":"Invalid credentials"}"#)
            .create_async()
            .await;

        let err = api(&server).await.login("admin", "nope").await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::Rejected { status: 200, message: "Invalid credentials".into() }
        );
    }

    #[tokio::test]
    async fn test_list_maps_401() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/files")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .create_async()
            .await;

        let err = api(&server).await.list("stale").await.unwrap_err();
        assert_eq!(err, ServiceError::Unauthorized);
    }

    #[tokio::test]
    async fn test_fetch_decodes_payload() {
        let mut server = mockito::Server::new_async().await;
        let payload = STANDARD.encode(b"%PDF-1.4 body");
        server
            .mock("GET", "/api/pdf/quarterly%20report.pdf")
            .match_header("authorization", "Bearer t1")
            .with_status(200)
            .with_body(json!({"success": true, "base64": payload}).to_string())
            .create_async()
            .await;

        let bytes = api(&server).await.fetch("t1", "quarterly report.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn test_refresh_and_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .match_body(Matcher::Json(json!({"refreshToken": "r1"})))
            .with_status(200)
            .with_body(r#"{"success":true,"token":"t2"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/files")
            .with_status(503)
            .with_body(r#"{"success":false,"error":"maintenance"}"#)
            .create_async()
            .await;

        let api = api(&server).await;
        assert_eq!(api.refresh("r1").await.unwrap(), "t2");
        assert_eq!(
            api.list("t2").await.unwrap_err(),
            ServiceError::Rejected { status: 503, message: "maintenance".into() }
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let api = HttpApi::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(matches!(api.list("t1").await, Err(ServiceError::Transport(_))));
    }
}
