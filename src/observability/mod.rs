//! # Observability
//!
//! Structured logging for certificate issuance and storage. Key material is
//! carried as [`SecretString`](crate::secrets::SecretString) and never reaches
//! a log line.

pub mod logging;

pub use logging::{init_logging, log_config_info};
