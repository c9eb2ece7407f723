use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use crate::agent::config::Settings;
use crate::aggregation::AggregatedResult;
use crate::connectors::{parse_payload, Endpoint, EndpointPayload};
use crate::transport::{DomainErrorCode, EndpointOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Ok,
    Pending,
    Critical,
    Error,
}

/// Thresholds and endpoint classification used by [`consolidate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationPolicy {
    pub high_debt_threshold: Decimal,
    pub high_pending_years_threshold: usize,
    /// Failures of these endpoints are reported but do not force ERROR.
    pub optional_endpoints: BTreeSet<Endpoint>,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            high_debt_threshold: Decimal::new(500_000, 2),
            high_pending_years_threshold: 3,
            optional_endpoints: BTreeSet::new(),
        }
    }
}

impl ConsolidationPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            high_debt_threshold: settings.high_debt_threshold,
            high_pending_years_threshold: settings.high_pending_years_threshold,
            optional_endpoints: settings.optional_endpoints.iter().copied().collect(),
        }
    }

    pub fn is_mandatory(&self, endpoint: Endpoint) -> bool {
        !self.optional_endpoints.contains(&endpoint)
    }
}

/// Projection of an [`AggregatedResult`]. Recomputed on demand, never stored
/// as the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedSummary {
    pub overall_status: OverallStatus,
    pub has_open_debt: bool,
    pub debt_amount: Decimal,
    pub pending_declaration_years: BTreeSet<String>,
    pub unread_mailbox_count: u32,
    pub active_power_of_attorney_count: u32,
    pub open_installment_count: u32,
    /// Outstanding balance of open installment plans, kept out of `debt_amount`.
    pub installment_balance: Decimal,
    pub is_mei: Option<bool>,
    pub registration_status: Option<String>,
    pub company_name: Option<String>,
    pub forbidden_endpoints: Vec<Endpoint>,
    pub not_found_endpoints: Vec<Endpoint>,
    pub failed_endpoints: Vec<Endpoint>,
    pub malformed_endpoints: Vec<Endpoint>,
    pub required_actions: Vec<String>,
}

/// Derive the summary of one aggregation. Pure and deterministic: the same
/// input always yields the same summary.
pub fn consolidate(result: &AggregatedResult, policy: &ConsolidationPolicy) -> ConsolidatedSummary {
    let mut debt = Decimal::ZERO;
    let mut installment_balance = Decimal::ZERO;
    let mut pending_years = BTreeSet::new();
    let mut unread = 0u32;
    let mut active_grants = 0u32;
    let mut open_installments = 0u32;
    let mut is_mei = None;
    let mut registration_status = None;
    let mut company_name = None;
    let mut forbidden = Vec::new();
    let mut not_found = Vec::new();
    let mut failed = Vec::new();
    let mut malformed = Vec::new();
    let mut mandatory_failure = false;

    for (&endpoint, outcome) in &result.outcomes {
        match outcome {
            EndpointOutcome::Success { payload } => match parse_payload(endpoint, payload) {
                Ok(parsed) => {
                    debt += parsed.debt_amount();
                    installment_balance += parsed.installment_balance();
                    match parsed {
                        EndpointPayload::Declarations(list) => pending_years.extend(list.pending_years()),
                        EndpointPayload::Mailbox(mailbox) => unread += mailbox.unread(),
                        EndpointPayload::PowersOfAttorney(list) => active_grants += list.active(),
                        EndpointPayload::Installments(list) => open_installments += list.open_count(),
                        EndpointPayload::RegistrationStatus(status) => {
                            is_mei = Some(status.is_mei());
                            if status.status.is_some() {
                                registration_status = status.status;
                            }
                        }
                        EndpointPayload::Registration(data) => {
                            company_name = data.company_name;
                            if registration_status.is_none() {
                                registration_status = data.status;
                            }
                        }
                        EndpointPayload::ActiveDebt(_) => {}
                    }
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "malformed payload");
                    malformed.push(endpoint);
                    mandatory_failure |= policy.is_mandatory(endpoint);
                }
            },
            EndpointOutcome::DomainError { code, .. } => match code {
                DomainErrorCode::Forbidden => forbidden.push(endpoint),
                DomainErrorCode::NotFound => not_found.push(endpoint),
            },
            EndpointOutcome::TransientFailure { .. } => {
                failed.push(endpoint);
                mandatory_failure |= policy.is_mandatory(endpoint);
            }
        }
    }

    debt.rescale(2);
    installment_balance.rescale(2);
    let has_open_debt = debt > Decimal::ZERO;

    let overall_status = if mandatory_failure {
        OverallStatus::Error
    } else if has_open_debt || !pending_years.is_empty() || unread > 0 {
        if debt > policy.high_debt_threshold
            || pending_years.len() > policy.high_pending_years_threshold
        {
            OverallStatus::Critical
        } else {
            OverallStatus::Pending
        }
    } else {
        OverallStatus::Ok
    };

    let mut required_actions = Vec::new();
    if !pending_years.is_empty() {
        let years: Vec<&str> = pending_years.iter().map(String::as_str).collect();
        required_actions.push(format!("file pending declarations for {}", years.join(", ")));
    }
    if has_open_debt {
        required_actions.push(format!("settle open debts totalling {}", debt));
    }
    if unread > 0 {
        required_actions.push(format!("read {} unread mailbox message(s)", unread));
    }
    if !forbidden.is_empty() {
        required_actions.push("review powers of attorney: authorization may be revoked or expired".to_string());
    }

    ConsolidatedSummary {
        overall_status,
        has_open_debt,
        debt_amount: debt,
        pending_declaration_years: pending_years,
        unread_mailbox_count: unread,
        active_power_of_attorney_count: active_grants,
        open_installment_count: open_installments,
        installment_balance,
        is_mei,
        registration_status,
        company_name,
        forbidden_endpoints: forbidden,
        not_found_endpoints: not_found,
        failed_endpoints: failed,
        malformed_endpoints: malformed,
        required_actions,
    }
}
