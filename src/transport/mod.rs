pub mod executor;
pub mod retry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use executor::RequestExecutor;
pub use retry::{with_retry, Attempt, Disposition, RetryError, RetryPolicy};

/// Business-level rejections that are reported, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainErrorCode {
    /// The power of attorney behind the procurator header may be revoked or expired.
    Forbidden,
    NotFound,
}

impl DomainErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainErrorCode::Forbidden => "FORBIDDEN",
            DomainErrorCode::NotFound => "NOT_FOUND",
        }
    }
}

/// What happened to one (taxpayer, endpoint) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EndpointOutcome {
    Success {
        payload: Value,
    },
    DomainError {
        code: DomainErrorCode,
        message: String,
    },
    TransientFailure {
        reason: String,
        /// Requests actually sent to the endpoint.
        attempts: u32,
    },
}

impl EndpointOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EndpointOutcome::Success { .. })
    }

    pub fn is_transient_failure(&self) -> bool {
        matches!(self, EndpointOutcome::TransientFailure { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            EndpointOutcome::Success { .. } => "success",
            EndpointOutcome::DomainError { .. } => "domain_error",
            EndpointOutcome::TransientFailure { .. } => "transient_failure",
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            EndpointOutcome::Success { payload } => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_serialises_with_tag() {
        let outcome = EndpointOutcome::DomainError {
            code: DomainErrorCode::Forbidden,
            message: "revoked".into(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            value,
            json!({"outcome": "domain_error", "code": "FORBIDDEN", "message": "revoked"})
        );
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = EndpointOutcome::Success { payload: json!({}) };
        let failed = EndpointOutcome::TransientFailure {
            reason: "timeout".into(),
            attempts: 3,
        };
        assert!(ok.is_success());
        assert!(ok.payload().is_some());
        assert!(failed.is_transient_failure());
        assert_eq!(failed.label(), "transient_failure");
    }
}
