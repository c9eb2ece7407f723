use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::security::audit_log::AuditLogger;
use crate::security::credentials::Credentials;
use crate::security::token_cache::TokenCache;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("token response has no access_token")]
    MissingAccessToken,
    #[error("token response is not valid JSON: {0}")]
    Malformed(String),
    #[error("token request failed: {0}")]
    Transport(String),
}

impl AuthError {
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    expires_in: Option<i64>,
}

/// Result of [`TokenManager::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub token_obtained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// OAuth2 client-credentials flow in front of the durable [`TokenCache`].
///
/// Failures are returned as-is; retrying is the caller's business.
#[derive(Debug, Clone)]
pub struct TokenManager {
    http: Client,
    token_url: String,
    credentials: Arc<Credentials>,
    cache: TokenCache,
    audit: AuditLogger,
}

impl TokenManager {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        credentials: Arc<Credentials>,
        cache: TokenCache,
        audit: AuditLogger,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            credentials,
            cache,
            audit,
        }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// A usable token, from the cache when possible.
    pub async fn obtain(&self) -> Result<String, AuthError> {
        if let Some(token) = self.cache.get().await {
            self.audit.token_cache_hit();
            return Ok(token);
        }
        self.request_token().await
    }

    /// Drop the cached token and fetch a new one.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.cache.invalidate().await;
        self.request_token().await
    }

    /// POST `grant_type=client_credentials` with Basic client credentials.
    async fn request_token(&self) -> Result<String, AuthError> {
        info!(token_url = %self.token_url, "requesting OAuth2 token");

        let response = self
            .http
            .post(&self.token_url)
            .header(AUTHORIZATION, self.basic_authorization())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(|e| {
                let err = AuthError::Transport(e.to_string());
                self.audit.token_request_failed(None, &err.to_string());
                err
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status != 200 {
            self.audit.token_request_failed(Some(status), &body);
            return Err(AuthError::Rejected { status, body });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            self.audit.token_request_failed(Some(status), "malformed token response");
            AuthError::Malformed(e.to_string())
        })?;
        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                self.audit.token_request_failed(Some(status), "access_token missing");
                AuthError::MissingAccessToken
            })?;
        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);

        // The cache is advisory: a failed write only costs a later refetch.
        if let Err(e) = self.cache.store(&token, expires_in).await {
            warn!(error = %e, "could not persist access token");
        }
        self.audit.token_obtained(expires_in);
        Ok(token)
    }

    fn basic_authorization(&self) -> String {
        let pair = format!(
            "{}:{}",
            self.credentials.consumer_key, self.credentials.consumer_secret
        );
        format!("Basic {}", general_purpose::STANDARD.encode(pair))
    }

    /// Whether a token can be obtained right now.
    pub async fn health_check(&self) -> HealthStatus {
        match self.obtain().await {
            Ok(_) => {
                debug!("health check: token available");
                HealthStatus {
                    status: "connected".to_string(),
                    token_obtained: true,
                    error: None,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => HealthStatus {
                status: "error".to_string(),
                token_obtained: false,
                error: Some(e.to_string()),
                timestamp: Utc::now(),
            },
        }
    }
}
