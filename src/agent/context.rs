use anyhow::{bail, Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::agent::config::Settings;
use crate::aggregation::{consolidate, AggregationOptions, Aggregator, ConsolidationPolicy, QueryReport};
use crate::connectors::Endpoint;
use crate::security::{build_http_client, AuditLogger, Credentials, TlsMode, TokenCache, TokenManager};
use crate::transport::RequestExecutor;
use crate::utils::TaxId;

/// The process-wide client: one HTTP connection pool, one token cache, one
/// executor. Built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct ClientContext {
    settings: Arc<Settings>,
    credentials: Arc<Credentials>,
    executor: RequestExecutor,
    tls_mode: TlsMode,
}

impl ClientContext {
    /// Validate the settings, load the client certificate and wire the
    /// token manager and executor together.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let credentials = Credentials::from_settings(&settings);
        if credentials.consumer_key.is_empty() || credentials.consumer_secret.is_empty() {
            bail!("consumer key and secret are required (SERPRO_CONSUMER_KEY / SERPRO_CONSUMER_SECRET)");
        }
        if credentials.procurator_tax_id.is_empty() {
            bail!("procurator tax id is required (CPF_PROCURADOR)");
        }

        let audit = AuditLogger::new();
        let (http, tls_mode) =
            build_http_client(&settings, &credentials, &audit).context("initialising TLS client")?;
        Ok(Self::assemble(settings, credentials, http, tls_mode))
    }

    /// Same as [`from_settings`](Self::from_settings) but with a ready-made
    /// client and no credential checks.
    pub fn with_http_client(settings: Settings, http: Client, tls_mode: TlsMode) -> Self {
        let credentials = Credentials::from_settings(&settings);
        Self::assemble(settings, credentials, http, tls_mode)
    }

    fn assemble(settings: Settings, credentials: Credentials, http: Client, tls_mode: TlsMode) -> Self {
        let audit = AuditLogger::new();
        let credentials = Arc::new(credentials);
        let cache = TokenCache::new(settings.token_cache_path.clone(), settings.token_safety_margin());
        let tokens = TokenManager::new(
            http.clone(),
            settings.token_url.clone(),
            credentials.clone(),
            cache,
            audit.clone(),
        );
        let executor = RequestExecutor::new(
            http,
            settings.base_url.clone(),
            tokens,
            settings.retry_policy(),
            settings.request_timeout(),
            audit,
        );
        info!(base_url = %settings.base_url, tls = ?tls_mode, "client context ready");

        Self {
            settings: Arc::new(settings),
            credentials,
            executor,
            tls_mode,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn tokens(&self) -> &TokenManager {
        self.executor.tokens()
    }

    pub fn aggregator(&self, declaration_year: Option<u16>) -> Aggregator<'_> {
        let options = AggregationOptions {
            parallelism: self.settings.parallelism,
            inter_call_delay: self.settings.inter_call_delay(),
            declaration_year,
        };
        Aggregator::new(&self.executor, &self.credentials.procurator_tax_id, options)
    }

    pub fn consolidation_policy(&self) -> ConsolidationPolicy {
        ConsolidationPolicy::from_settings(&self.settings)
    }

    /// Aggregate and consolidate one taxpayer. An empty endpoint list means
    /// every known endpoint.
    pub async fn query(
        &self,
        taxpayer: &TaxId,
        endpoints: &[Endpoint],
        declaration_year: Option<u16>,
    ) -> QueryReport {
        let started = Instant::now();
        let endpoints: &[Endpoint] = if endpoints.is_empty() {
            &Endpoint::ALL
        } else {
            endpoints
        };

        let result = self.aggregator(declaration_year).aggregate(taxpayer, endpoints).await;
        let summary = consolidate(&result, &self.consolidation_policy());
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            taxpayer = %taxpayer.formatted(),
            status = ?summary.overall_status,
            elapsed_ms,
            "query finished"
        );
        QueryReport::new(result, summary, elapsed_ms)
    }
}
