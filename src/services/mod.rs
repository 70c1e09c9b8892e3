//! Boundary contracts for the auth and document backends

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub use http::HttpApi;

/// Tokens granted by a successful login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginGrant {
    pub token: String,
    pub refresh_token: String,
}

/// Authentication backend
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginGrant, ServiceError>;

    /// Exchanges a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<String, ServiceError>;

    async fn logout(&self, token: &str) -> Result<(), ServiceError>;
}

/// Document backend; both calls require bearer authorization
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn list(&self, token: &str) -> Result<Vec<String>, ServiceError>;

    /// Returns the decoded document bytes
    async fn fetch(&self, token: &str, filename: &str) -> Result<Vec<u8>, ServiceError>;
}
