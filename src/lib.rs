//! # cluster-certs
//!
//! Certificate management for cluster control-plane TLS: issues a CA and
//! client certificates per cluster and keeps the key material in a
//! reference-counted secret store.
//!
//! ## Architecture
//!
//! ```text
//! provisioning ──► x509 (X509Engine)          pure RSA / X.509 issuance
//!       │
//!       └────────► cert_manager (CertManager) ──► secrets (SecretStore)
//!                   ├─ BarbicanCertManager          ├─ BarbicanClient
//!                   └─ LocalCertManager             └─ InMemorySecretStore
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cluster_certs::{cert_manager, config::AppConfig, x509::X509Engine, Result};
//! use cluster_certs::provisioning::{ClusterCertificates, ClusterIdentity};
//!
//! # async fn run() -> Result<()> {
//! let config = AppConfig::from_env()?;
//! let handle = cert_manager::from_config(&config)?;
//! let certificates = ClusterCertificates::new(
//!     X509Engine::new(config.x509.clone()),
//!     handle,
//!     config.certificates.service_name.clone(),
//! );
//!
//! let cluster = ClusterIdentity::new(uuid::Uuid::new_v4(), Some("k8s-prod".into()));
//! let refs = certificates.generate_certificates_for_cluster(&cluster).await?;
//! let ca_pem = certificates.get_cluster_ca_certificate(&cluster, &refs).await?;
//! # Ok(())
//! # }
//! ```

pub mod cert_manager;
pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod provisioning;
pub mod secrets;
pub mod x509;

// Re-export commonly used types and traits
pub use cert_manager::{CertBundle, CertManager, CertPurge, CertRef, Consumer};
pub use config::AppConfig;
pub use errors::{CertError, Result};
pub use x509::X509Engine;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
