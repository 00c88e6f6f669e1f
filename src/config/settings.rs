//! # Configuration Settings
//!
//! Defines the configuration structure for certificate issuance and storage.
//! Every value can be supplied through a `CLUSTER_CERTS_*` environment variable.

use crate::errors::{CertError, Result};
use crate::secrets::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// Environment variable prefix shared by all settings
pub const ENV_PREFIX: &str = "CLUSTER_CERTS_";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Certificate manager selection and storage
    #[validate(nested)]
    pub certificates: CertificatesConfig,

    /// X.509 issuance parameters
    #[validate(nested)]
    pub x509: X509Config,

    /// Barbican secret store connection
    #[validate(nested)]
    pub barbican: BarbicanConfig,

    /// Logging configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Keys are full variable names, e.g. `CLUSTER_CERTS_RSA_KEY_SIZE`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|value| !value.trim().is_empty())
        };

        let mut config = Self::default();

        if let Some(value) = get("CERT_MANAGER_TYPE") {
            config.certificates.cert_manager_type = value.parse()?;
        }
        if let Some(value) = get("STORAGE_PATH") {
            config.certificates.storage_path = PathBuf::from(value);
        }
        if let Some(value) = get("SERVICE_NAME") {
            config.certificates.service_name = value;
        }

        if let Some(value) = get("RSA_KEY_SIZE") {
            config.x509.rsa_key_size = parse_value("RSA_KEY_SIZE", &value)?;
        }
        if let Some(value) = get("TERM_OF_VALIDITY_DAYS") {
            config.x509.term_of_validity_days = parse_value("TERM_OF_VALIDITY_DAYS", &value)?;
        }

        if let Some(value) = get("BARBICAN_ENDPOINT") {
            config.barbican.endpoint = value;
        }
        config.barbican.auth_token = get("BARBICAN_TOKEN").map(SecretString::new);
        config.barbican.project_id = get("BARBICAN_PROJECT_ID");
        config.barbican.region_name = get("BARBICAN_REGION");
        if let Some(value) = get("BARBICAN_TIMEOUT_SECONDS") {
            config.barbican.timeout_seconds = parse_value("BARBICAN_TIMEOUT_SECONDS", &value)?;
        }
        if let Some(value) = get("SECRET_TTL_HOURS") {
            config.barbican.secret_ttl_hours = Some(parse_value("SECRET_TTL_HOURS", &value)?);
        }

        if let Some(value) = get("LOG_LEVEL") {
            config.observability.log_level = value;
        }
        if let Some(value) = get("JSON_LOGGING") {
            config.observability.json_logging = parse_value("JSON_LOGGING", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(CertError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.certificates.cert_manager_type == CertManagerType::Barbican {
            url::Url::parse(&self.barbican.endpoint).map_err(|e| {
                CertError::config(format!(
                    "Barbican endpoint '{}' is not a valid URL: {}",
                    self.barbican.endpoint, e
                ))
            })?;
        }

        Ok(())
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| {
        CertError::config(format!("Invalid value for {}{}: {}", ENV_PREFIX, name, e))
    })
}

/// Certificate manager backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CertManagerType {
    /// Barbican-style key manager with secrets, containers and consumers
    #[default]
    Barbican,
    /// Files on the local filesystem
    Local,
}

impl CertManagerType {
    /// Returns the string representation of the backend type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Barbican => "barbican",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for CertManagerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertManagerType {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "barbican" => Ok(Self::Barbican),
            "local" => Ok(Self::Local),
            other => Err(CertError::config(format!(
                "Unknown certificate manager type '{}' (expected 'barbican' or 'local')",
                other
            ))),
        }
    }
}

/// Certificate manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CertificatesConfig {
    /// Which backend stores certificate bundles
    pub cert_manager_type: CertManagerType,

    /// Directory used by the local backend
    pub storage_path: PathBuf,

    /// Consumer name registered against stored references
    #[validate(length(min = 1, max = 255, message = "Service name must be 1-255 characters"))]
    pub service_name: String,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            cert_manager_type: CertManagerType::Barbican,
            storage_path: PathBuf::from("/var/lib/cluster-certs/certificates"),
            service_name: "cluster-certs".to_string(),
        }
    }
}

/// X.509 issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct X509Config {
    /// RSA modulus size in bits
    #[validate(range(min = 2048, max = 8192, message = "RSA key size must be 2048-8192 bits"))]
    pub rsa_key_size: usize,

    /// Default certificate lifetime in days
    #[validate(range(min = 1, max = 36500, message = "Term of validity must be 1-36500 days"))]
    pub term_of_validity_days: u32,
}

impl Default for X509Config {
    fn default() -> Self {
        Self { rsa_key_size: 2048, term_of_validity_days: 365 * 5 }
    }
}

impl X509Config {
    /// Default certificate lifetime
    pub fn term_of_validity(&self) -> time::Duration {
        time::Duration::days(i64::from(self.term_of_validity_days))
    }
}

/// Barbican secret store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BarbicanConfig {
    /// Base URL of the key manager, without the `/v1` suffix
    #[validate(length(min = 1, message = "Barbican endpoint cannot be empty"))]
    pub endpoint: String,

    /// Keystone token sent as `X-Auth-Token`
    pub auth_token: Option<SecretString>,

    /// Project scope sent as `X-Project-Id`
    pub project_id: Option<String>,

    /// Region the endpoint belongs to
    pub region_name: Option<String>,

    /// Per-request timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub timeout_seconds: u64,

    /// Lifetime of created secrets; `None` means they never expire
    #[validate(range(min = 1, max = 876000, message = "Secret TTL must be 1-876000 hours"))]
    pub secret_ttl_hours: Option<u64>,
}

impl Default for BarbicanConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9311".to_string(),
            auth_token: None,
            project_id: None,
            region_name: None,
            timeout_seconds: 30,
            secret_ttl_hours: None,
        }
    }
}

impl BarbicanConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Lifetime applied to created secrets
    pub fn secret_ttl(&self) -> Option<chrono::Duration> {
        self.secret_ttl_hours.map(|hours| chrono::Duration::hours(hours.min(876000) as i64))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false }
    }
}
