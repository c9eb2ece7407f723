use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::security::audit_log::AuditLogger;
use crate::security::token_manager::{AuthError, TokenManager};
use crate::transport::retry::{with_retry, Disposition, RetryError, RetryPolicy};
use crate::transport::{DomainErrorCode, EndpointOutcome};

/// Header carrying the procurator's tax id on every resource request.
pub const PROCURATOR_HEADER: &str = "X-CPF-Procurador";

/// Why a single attempt did not produce a payload.
#[derive(Debug)]
enum AttemptError {
    Auth(AuthError),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Status { status: u16, body: String },
    Timeout,
    Network(String),
    InvalidBody(String),
}

impl AttemptError {
    fn disposition(&self) -> Disposition {
        match self {
            AttemptError::Forbidden(_) | AttemptError::NotFound(_) => Disposition::Terminal,
            AttemptError::Unauthorized(_) => Disposition::Unauthorized,
            AttemptError::Auth(_)
            | AttemptError::Status { .. }
            | AttemptError::Timeout
            | AttemptError::Network(_)
            | AttemptError::InvalidBody(_) => Disposition::Transient,
        }
    }

    fn reason(&self) -> String {
        match self {
            AttemptError::Auth(e) => format!("token acquisition failed: {}", e),
            AttemptError::Unauthorized(_) => "auth retry exhausted".to_string(),
            AttemptError::Forbidden(body) => format!("forbidden: {}", body),
            AttemptError::NotFound(body) => format!("not found: {}", body),
            AttemptError::Status { status, body } => format!("HTTP {}: {}", status, body),
            AttemptError::Timeout => "timeout".to_string(),
            AttemptError::Network(e) => format!("network error: {}", e),
            AttemptError::InvalidBody(e) => format!("invalid JSON body: {}", e),
        }
    }
}

fn from_reqwest(err: reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Timeout
    } else {
        AttemptError::Network(err.to_string())
    }
}

/// Issues authenticated GETs against the resource API and turns every result
/// into an [`EndpointOutcome`].
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    http: Client,
    base_url: String,
    tokens: TokenManager,
    policy: RetryPolicy,
    timeout: Duration,
    audit: AuditLogger,
}

impl RequestExecutor {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        tokens: TokenManager,
        policy: RetryPolicy,
        timeout: Duration,
        audit: AuditLogger,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            policy,
            timeout,
            audit,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `base_url + path` on behalf of `procurator_id`.
    ///
    /// 200 is a success, 403/404 are terminal domain errors, 401 refreshes
    /// the token and retries once, anything else is retried with backoff.
    /// Never fails: every ending is an outcome.
    pub async fn execute(&self, name: &str, path: &str, procurator_id: &str) -> EndpointOutcome {
        let url = format!("{}{}", self.base_url, path);
        let sent = AtomicU32::new(0);
        let sent_ref = &sent;
        let url_ref = url.as_str();

        let result = with_retry(
            &self.policy,
            move |attempt| async move {
                let token = if attempt.reauthenticate {
                    self.audit.token_invalidated(name, "HTTP 401");
                    self.tokens.refresh().await
                } else {
                    self.tokens.obtain().await
                };
                let token = token.map_err(AttemptError::Auth)?;

                sent_ref.fetch_add(1, Ordering::SeqCst);
                self.send(url_ref, &token, procurator_id).await
            },
            AttemptError::disposition,
            |err, attempt, delay| {
                self.audit
                    .retry_scheduled(name, attempt, delay.as_millis() as u64, &err.reason())
            },
        )
        .await;

        let attempts = sent.load(Ordering::SeqCst);
        let outcome = match result {
            Ok(payload) => EndpointOutcome::Success { payload },
            Err(RetryError::Terminal(AttemptError::Forbidden(body))) => EndpointOutcome::DomainError {
                code: DomainErrorCode::Forbidden,
                message: format!("authorization may be revoked or expired: {}", body),
            },
            Err(RetryError::Terminal(AttemptError::NotFound(body))) => EndpointOutcome::DomainError {
                code: DomainErrorCode::NotFound,
                message: format!("resource not found: {}", body),
            },
            Err(RetryError::Terminal(other)) | Err(RetryError::Exhausted { last: other, .. }) => {
                EndpointOutcome::TransientFailure {
                    reason: other.reason(),
                    attempts,
                }
            }
            Err(RetryError::AuthExhausted(_)) => EndpointOutcome::TransientFailure {
                reason: "auth retry exhausted".to_string(),
                attempts,
            },
        };

        let detail = match &outcome {
            EndpointOutcome::Success { .. } => None,
            EndpointOutcome::DomainError { message, .. } => Some(message.as_str()),
            EndpointOutcome::TransientFailure { reason, .. } => Some(reason.as_str()),
        };
        self.audit.endpoint_outcome(name, outcome.label(), attempts, detail);
        outcome
    }

    async fn send(&self, url: &str, token: &str, procurator_id: &str) -> Result<Value, AttemptError> {
        trace!(url = %url, "sending GET request");

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(PROCURATOR_HEADER, procurator_id)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(from_reqwest)?;
        debug!(url = %url, status, "response received");

        match status {
            200 => {
                if body.trim().is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_str(&body).map_err(|e| AttemptError::InvalidBody(e.to_string()))
            }
            401 => Err(AttemptError::Unauthorized(body)),
            403 => Err(AttemptError::Forbidden(body)),
            404 => Err(AttemptError::NotFound(body)),
            status => Err(AttemptError::Status { status, body }),
        }
    }
}
