//! # Configuration Management
//!
//! Settings for certificate issuance, backend selection and the secret store
//! connection. The backend is chosen by an explicit value handed to
//! [`crate::cert_manager::from_config`]; nothing here is global.

pub mod settings;

pub use settings::{
    AppConfig, BarbicanConfig, CertManagerType, CertificatesConfig, ObservabilityConfig,
    X509Config, ENV_PREFIX,
};
