//! # Structured Logging
//!
//! Installs a `tracing-subscriber` fmt subscriber. `RUST_LOG` overrides the
//! configured level; JSON output is selected by configuration.

use crate::config::ObservabilityConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (for example by a
/// test harness); the existing one is kept.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logging {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    installed.is_ok()
}

/// Create a tracing span for one certificate operation.
///
/// ```rust,ignore
/// let span = cert_span!("store_cert", name = "bay-1");
/// ```
#[macro_export]
macro_rules! cert_span {
    ($operation:expr) => {
        tracing::info_span!(
            "cert_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "cert_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        cert_manager = %config.certificates.cert_manager_type,
        storage_path = %config.certificates.storage_path.display(),
        barbican_endpoint = %config.barbican.endpoint,
        barbican_token_set = config.barbican.auth_token.is_some(),
        rsa_key_size = config.x509.rsa_key_size,
        term_of_validity_days = config.x509.term_of_validity_days,
        "Certificate manager configuration"
    );
}
