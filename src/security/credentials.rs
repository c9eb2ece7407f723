use std::fmt;
use std::path::PathBuf;

use crate::agent::config::Settings;
use crate::utils::digits_only;

/// Secrets used to talk to the API. Built once at startup and only read
/// afterwards.
#[derive(Clone)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub certificate_path: PathBuf,
    pub certificate_passphrase: String,
    /// Digits only; sent verbatim in `X-CPF-Procurador`.
    pub procurator_tax_id: String,
}

impl Credentials {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            consumer_key: settings.consumer_key.clone(),
            consumer_secret: settings.consumer_secret.clone(),
            certificate_path: PathBuf::from(&settings.certificate_path),
            certificate_passphrase: settings.certificate_passphrase.clone(),
            procurator_tax_id: digits_only(&settings.procurator_tax_id),
        }
    }

    pub fn has_certificate(&self) -> bool {
        !self.certificate_path.as_os_str().is_empty()
    }
}

// Secrets never reach the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("certificate_path", &self.certificate_path)
            .field("certificate_passphrase", &"<redacted>")
            .field("procurator_tax_id", &self.procurator_tax_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_normalises_procurator() {
        let settings = Settings {
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            procurator_tax_id: "122.643.046-50".into(),
            ..Settings::default()
        };
        let creds = Credentials::from_settings(&settings);
        assert_eq!(creds.procurator_tax_id, "12264304650");
        assert!(!creds.has_certificate());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = Settings {
            consumer_secret: "top-secret".into(),
            certificate_passphrase: "300@pass".into(),
            ..Settings::default()
        };
        let printed = format!("{:?}", Credentials::from_settings(&settings));
        assert!(!printed.contains("top-secret"));
        assert!(!printed.contains("300@pass"));
    }
}
