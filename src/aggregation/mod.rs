//! Fan-out of one taxpayer query over several endpoints.
//!
//! Every requested endpoint ends up with exactly one [`EndpointOutcome`];
//! a failing endpoint never stops its siblings.

pub mod report;
pub mod summary;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::connectors::Endpoint;
use crate::transport::{EndpointOutcome, RequestExecutor};
use crate::utils::TaxId;

pub use report::QueryReport;
pub use summary::{consolidate, ConsolidatedSummary, ConsolidationPolicy, OverallStatus};

/// Outcomes of one query, keyed by endpoint. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub taxpayer_id: TaxId,
    pub queried_at: DateTime<Utc>,
    pub outcomes: BTreeMap<Endpoint, EndpointOutcome>,
}

impl AggregatedResult {
    pub fn outcome(&self, endpoint: Endpoint) -> Option<&EndpointOutcome> {
        self.outcomes.get(&endpoint)
    }

    pub fn successes(&self) -> impl Iterator<Item = (Endpoint, &EndpointOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(e, o)| (*e, o))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationOptions {
    /// Concurrent endpoint calls; `None` runs them all at once.
    pub parallelism: Option<usize>,
    /// Pause between calls. A non-zero delay makes the fan-out sequential.
    pub inter_call_delay: Duration,
    /// `ano` filter for PGDAS-D.
    pub declaration_year: Option<u16>,
}

pub struct Aggregator<'a> {
    executor: &'a RequestExecutor,
    procurator_id: &'a str,
    options: AggregationOptions,
}

impl<'a> Aggregator<'a> {
    pub fn new(executor: &'a RequestExecutor, procurator_id: &'a str, options: AggregationOptions) -> Self {
        Self {
            executor,
            procurator_id,
            options,
        }
    }

    pub fn options(&self) -> &AggregationOptions {
        &self.options
    }

    /// Query `endpoints` for `taxpayer` and wait for every call to finish.
    /// Duplicate endpoints are queried once.
    pub async fn aggregate(&self, taxpayer: &TaxId, endpoints: &[Endpoint]) -> AggregatedResult {
        let queried_at = Utc::now();
        let unique: BTreeSet<Endpoint> = endpoints.iter().copied().collect();
        info!(
            taxpayer = %taxpayer.formatted(),
            endpoints = unique.len(),
            "aggregating endpoints"
        );

        let outcomes = if self.options.inter_call_delay.is_zero() {
            self.run_concurrent(taxpayer, &unique).await
        } else {
            self.run_sequential(taxpayer, &unique).await
        };

        AggregatedResult {
            taxpayer_id: taxpayer.clone(),
            queried_at,
            outcomes,
        }
    }

    async fn query_one(&self, taxpayer: &TaxId, endpoint: Endpoint) -> (Endpoint, EndpointOutcome) {
        let path = endpoint.path(taxpayer, self.options.declaration_year);
        debug!(endpoint = %endpoint, path = %path, "dispatching");
        let outcome = self
            .executor
            .execute(endpoint.name(), &path, self.procurator_id)
            .await;
        (endpoint, outcome)
    }

    async fn run_concurrent(
        &self,
        taxpayer: &TaxId,
        endpoints: &BTreeSet<Endpoint>,
    ) -> BTreeMap<Endpoint, EndpointOutcome> {
        let limit = self
            .options
            .parallelism
            .unwrap_or(endpoints.len())
            .max(1);

        stream::iter(endpoints.iter().copied())
            .map(|endpoint| self.query_one(taxpayer, endpoint))
            .buffer_unordered(limit)
            .collect()
            .await
    }

    async fn run_sequential(
        &self,
        taxpayer: &TaxId,
        endpoints: &BTreeSet<Endpoint>,
    ) -> BTreeMap<Endpoint, EndpointOutcome> {
        let mut outcomes = BTreeMap::new();
        for (i, endpoint) in endpoints.iter().copied().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.options.inter_call_delay).await;
            }
            let (endpoint, outcome) = self.query_one(taxpayer, endpoint).await;
            outcomes.insert(endpoint, outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::Settings;
    use crate::security::{AuditLogger, Credentials, TokenCache, TokenManager};
    use crate::transport::RetryPolicy;
    use mockito::{Server, ServerGuard};
    use reqwest::Client;
    use std::sync::Arc;
    use tempfile::TempDir;

    const TAXPAYER: &str = "49189181000135";

    fn executor(server: &ServerGuard, dir: &TempDir) -> RequestExecutor {
        let settings = Settings {
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            ..Settings::default()
        };
        let http = Client::new();
        let cache = TokenCache::new(dir.path().join("token.json"), chrono::Duration::seconds(60));
        let tokens = TokenManager::new(
            http.clone(),
            format!("{}/token", server.url()),
            Arc::new(Credentials::from_settings(&settings)),
            cache,
            AuditLogger::new(),
        );
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base: 2,
            backoff_unit: Duration::from_millis(1),
        };
        RequestExecutor::new(http, server.url(), tokens, policy, Duration::from_secs(5), AuditLogger::new())
    }

    async fn mock_ok(server: &mut ServerGuard, endpoint: Endpoint, body: &str) -> mockito::Mock {
        let taxpayer = TaxId::parse(TAXPAYER).unwrap();
        server
            .mock("GET", endpoint.path(&taxpayer, None).as_str())
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn failing_endpoint_does_not_hide_siblings() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let exec = executor(&server, &dir);
        exec.tokens().cache().store("cached", 3600).await.unwrap();

        let _a = mock_ok(&mut server, Endpoint::Pgmei, r#"{"data":{"valor_total_dividas":0}}"#).await;
        let _b = server
            .mock("GET", "/pgdasd/declaracoes/49189181000135")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;
        let _c = mock_ok(&mut server, Endpoint::Ccmei, r#"{"data":{"situacao":"ATIVA"}}"#).await;

        let taxpayer = TaxId::parse(TAXPAYER).unwrap();
        let aggregator = Aggregator::new(&exec, "12264304650", AggregationOptions::default());
        let result = aggregator
            .aggregate(&taxpayer, &[Endpoint::Pgmei, Endpoint::Pgdasd, Endpoint::Ccmei])
            .await;

        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcome(Endpoint::Pgmei).unwrap().is_success());
        assert!(result.outcome(Endpoint::Ccmei).unwrap().is_success());
        assert_eq!(
            result.outcome(Endpoint::Pgdasd),
            Some(&EndpointOutcome::TransientFailure {
                reason: "HTTP 500: ".to_string(),
                attempts: 2,
            })
        );
        assert_eq!(result.successes().count(), 2);

        let summary = consolidate(&result, &ConsolidationPolicy::default());
        assert_eq!(summary.overall_status, OverallStatus::Error);
        assert_eq!(summary.failed_endpoints, vec![Endpoint::Pgdasd]);
    }

    #[tokio::test]
    async fn sequential_mode_with_delay_and_duplicates() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let exec = executor(&server, &dir);
        exec.tokens().cache().store("cached", 3600).await.unwrap();

        let pgmei = server
            .mock("GET", "/pgmei/divida-ativa/49189181000135")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let _status = mock_ok(&mut server, Endpoint::CcmeiSituacao, r#"{"situacao":"MEI"}"#).await;

        let options = AggregationOptions {
            inter_call_delay: Duration::from_millis(5),
            ..AggregationOptions::default()
        };
        let taxpayer = TaxId::parse(TAXPAYER).unwrap();
        let aggregator = Aggregator::new(&exec, "12264304650", options);
        let result = aggregator
            .aggregate(&taxpayer, &[Endpoint::Pgmei, Endpoint::CcmeiSituacao, Endpoint::Pgmei])
            .await;

        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcomes.values().all(EndpointOutcome::is_success));
        pgmei.assert_async().await;
    }

    #[tokio::test]
    async fn bounded_parallelism_still_collects_everything() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let exec = executor(&server, &dir);
        exec.tokens().cache().store("cached", 3600).await.unwrap();

        let mut mocks = Vec::new();
        for endpoint in Endpoint::ALL {
            mocks.push(mock_ok(&mut server, endpoint, "{}").await);
        }

        let options = AggregationOptions {
            parallelism: Some(2),
            ..AggregationOptions::default()
        };
        let taxpayer = TaxId::parse(TAXPAYER).unwrap();
        let result = Aggregator::new(&exec, "12264304650", options)
            .aggregate(&taxpayer, &Endpoint::ALL)
            .await;

        let keys: Vec<Endpoint> = result.outcomes.keys().copied().collect();
        let mut expected = Endpoint::ALL.to_vec();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn aggregated_result_serialises_endpoint_keys_by_name() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            Endpoint::CaixaPostal,
            EndpointOutcome::Success {
                payload: serde_json::json!({}),
            },
        );
        let result = AggregatedResult {
            taxpayer_id: TaxId::parse(TAXPAYER).unwrap(),
            queried_at: Utc::now(),
            outcomes,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["taxpayer_id"], "49189181000135");
        assert_eq!(value["outcomes"]["caixa_postal"]["outcome"], "success");
    }
}
