use crate::{Credentials, DbError, advanced_keys};
use serde::{Deserialize, Serialize};

/// SSL/TLS mode parsed from the `"SSL Mode"` advanced option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SslMode {
    /// No TLS (unencrypted connection).
    #[default]
    Disable,

    /// TLS required, server certificate not verified.
    Require,

    /// TLS required, certificate chain verified against a CA.
    VerifyCa,

    /// TLS required, chain and hostname verified.
    VerifyFull,
}

impl SslMode {
    pub fn parse(raw: &str) -> Result<Self, DbError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "disable" | "disabled" => Ok(SslMode::Disable),
            "require" | "required" | "enable" | "enabled" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(DbError::invalid_argument(format!(
                "unknown SSL mode '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Whether the server certificate must chain to a trusted CA.
    pub fn verifies_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }

    /// Whether the hostname must match the certificate.
    pub fn verifies_hostname(&self) -> bool {
        matches!(self, SslMode::VerifyFull)
    }
}

/// Effective SSL state surfaced to callers. Never carries key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslStatus {
    pub enabled: bool,
    pub mode: SslMode,
}

impl SslStatus {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            mode: SslMode::Disable,
        }
    }

    pub fn from_mode(mode: SslMode) -> Self {
        Self {
            enabled: mode.is_enabled(),
            mode,
        }
    }
}

/// TLS material collected from a profile's advanced options.
///
/// Paths only; the engine never reads or logs the file contents itself,
/// drivers consume them directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub mode: SslMode,
    pub ca_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

impl TlsSettings {
    pub fn from_credentials(credentials: &Credentials) -> Result<Self, DbError> {
        let mode = match credentials.advanced_option(advanced_keys::SSL_MODE) {
            Some(raw) => SslMode::parse(raw)?,
            None => SslMode::Disable,
        };

        let mut settings = TlsSettings {
            mode,
            ..Default::default()
        };

        if mode.verifies_certificate() {
            settings.ca_cert_path = credentials
                .advanced_option(advanced_keys::CA_CERT)
                .map(str::to_string);
            settings.client_cert_path = credentials
                .advanced_option(advanced_keys::CLIENT_CERT)
                .map(str::to_string);
            settings.client_key_path = credentials
                .advanced_option(advanced_keys::CLIENT_KEY)
                .map(str::to_string);
        }

        Ok(settings)
    }

    pub fn status(&self) -> SslStatus {
        SslStatus::from_mode(self.mode)
    }
}
