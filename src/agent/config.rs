use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connectors::Endpoint;
use crate::transport::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://gateway.apiserpro.serpro.gov.br/integra-contador/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://gateway.apiserpro.serpro.gov.br/token";

/// Origin of the loaded settings. Environment overrides apply to both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The file was not found; built-in defaults were used.
    Defaults(PathBuf),
}

/// Process configuration. Every field has a default so a partial JSON file
/// (or none at all, plus environment variables) is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    /// PKCS#12 (`.pfx`/`.p12`) or PEM bundle with certificate and private key.
    #[serde(default)]
    pub certificate_path: String,
    #[serde(default)]
    pub certificate_passphrase: String,
    /// Procurator tax id, formatting allowed (`122.643.046-50`).
    #[serde(default)]
    pub procurator_tax_id: String,
    /// Continue without a client certificate when it cannot be loaded.
    #[serde(default)]
    pub allow_missing_certificate: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
    /// Length of one backoff "second"; only tests shrink it.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    #[serde(default = "default_token_safety_margin")]
    pub token_safety_margin_secs: i64,
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,

    #[serde(default = "default_high_debt_threshold")]
    pub high_debt_threshold: Decimal,
    #[serde(default = "default_high_pending_years")]
    pub high_pending_years_threshold: usize,
    /// Endpoints whose failure does not turn the status into ERROR.
    #[serde(default)]
    pub optional_endpoints: Vec<Endpoint>,

    /// Maximum endpoints in flight per query; `None` means all at once.
    #[serde(default)]
    pub parallelism: Option<usize>,
    /// Pause between endpoint calls. Non-zero forces sequential dispatch.
    #[serde(default)]
    pub inter_call_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base() -> u32 {
    2
}
fn default_backoff_unit_ms() -> u64 {
    1000
}
fn default_token_safety_margin() -> i64 {
    60
}
fn default_token_cache_path() -> PathBuf {
    PathBuf::from("token_cache.json")
}
fn default_high_debt_threshold() -> Decimal {
    Decimal::new(500_000, 2)
}
fn default_high_pending_years() -> usize {
    3
}
fn default_user_agent() -> String {
    "BotECAC/1.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            certificate_path: String::new(),
            certificate_passphrase: String::new(),
            procurator_tax_id: String::new(),
            allow_missing_certificate: false,
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_unit_ms: default_backoff_unit_ms(),
            token_safety_margin_secs: default_token_safety_margin(),
            token_cache_path: default_token_cache_path(),
            high_debt_threshold: default_high_debt_threshold(),
            high_pending_years_threshold: default_high_pending_years(),
            optional_endpoints: Vec::new(),
            parallelism: None,
            inter_call_delay_ms: 0,
            user_agent: default_user_agent(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).context("reading config file")?;
        serde_json::from_str(&raw).context("parsing config JSON")
    }

    /// Load `path` when it exists, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_source(path).map(|(settings, _)| settings)
    }

    /// Same as [`load`](Self::load), also telling where the values came from
    /// so the caller can report it once logging is up.
    pub fn load_with_source(path: impl AsRef<Path>) -> Result<(Self, ConfigSource)> {
        let path = path.as_ref();
        let (settings, source) = if path.exists() {
            (Self::from_file(path)?, ConfigSource::File(path.to_path_buf()))
        } else {
            (Self::default(), ConfigSource::Defaults(path.to_path_buf()))
        };
        Ok((settings.apply_env(), source))
    }

    /// Overlay the environment variables the deployment scripts export.
    pub fn apply_env(mut self) -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            var(name).and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = var("SERPRO_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = var("SERPRO_TOKEN_URL") {
            self.token_url = v;
        }
        if let Some(v) = var("SERPRO_CONSUMER_KEY") {
            self.consumer_key = v;
        }
        if let Some(v) = var("SERPRO_CONSUMER_SECRET") {
            self.consumer_secret = v;
        }
        if let Some(v) = var("CERTIFICADO_PATH") {
            self.certificate_path = v;
        }
        if let Some(v) = var("CERTIFICADO_SENHA") {
            self.certificate_passphrase = v;
        }
        if let Some(v) = var("CPF_PROCURADOR") {
            self.procurator_tax_id = v;
        }
        if let Some(v) = parsed("REQUEST_TIMEOUT_SECONDS") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = parsed("MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = parsed("BACKOFF_BASE") {
            self.backoff_base = v;
        }
        if let Some(v) = parsed("TOKEN_SAFETY_MARGIN_SECONDS") {
            self.token_safety_margin_secs = v;
        }
        if let Some(v) = var("TOKEN_CACHE_PATH") {
            self.token_cache_path = PathBuf::from(v);
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.log_format = v;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    /// The safety margin is never allowed below 60 seconds.
    pub fn token_safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_safety_margin_secs.max(60))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }
}
