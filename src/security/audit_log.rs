use tracing::{error, info, warn};

/// Structured events on the `audit` target: token lifecycle, retries and
/// per-endpoint outcomes.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn token_obtained(&self, expires_in: i64) {
        info!(target: "audit", event = "token_obtained", expires_in);
    }

    pub fn token_cache_hit(&self) {
        info!(target: "audit", event = "token_cache_hit");
    }

    pub fn token_invalidated(&self, endpoint: &str, reason: &str) {
        warn!(target: "audit", event = "token_invalidated", endpoint, reason);
    }

    pub fn token_request_failed(&self, status: Option<u16>, reason: &str) {
        error!(target: "audit", event = "token_request_failed", status = status.unwrap_or(0), reason);
    }

    pub fn retry_scheduled(&self, endpoint: &str, attempt: u32, delay_ms: u64, reason: &str) {
        warn!(target: "audit", event = "retry_scheduled", endpoint, attempt, delay_ms, reason);
    }

    pub fn endpoint_outcome(&self, endpoint: &str, outcome: &str, attempts: u32, detail: Option<&str>) {
        info!(target: "audit", event = "endpoint_outcome", endpoint, outcome, attempts, detail = detail.unwrap_or(""));
    }

    pub fn certificate_missing(&self, path: &str, reason: &str) {
        warn!(target: "audit", event = "certificate_missing", path, reason);
    }
}
