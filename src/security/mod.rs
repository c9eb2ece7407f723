pub mod audit_log;
pub mod credentials;
pub mod tls;
pub mod token_cache;
pub mod token_manager;

pub use audit_log::AuditLogger;
pub use credentials::Credentials;
pub use tls::{build_http_client, TlsMode};
pub use token_cache::{CachedToken, TokenCache, TokenCacheError};
pub use token_manager::{AuthError, HealthStatus, TokenManager};
