//! # Certificate Managers
//!
//! Backend-independent storage of certificate bundles behind opaque
//! references, with consumer registration deferring deletion.
//!
//! ## Backends
//!
//! - [`BarbicanCertManager`]: four secrets aggregated by a certificate
//!   container in a [`SecretStore`](crate::secrets::SecretStore)
//! - [`LocalCertManager`]: files under a storage directory
//!
//! The backend is chosen by [`from_config`] from an explicit
//! [`AppConfig`](crate::config::AppConfig).
//!
//! ## Lifecycle
//!
//! ```text
//! store_cert ──► Created ──get_cert(consumer)──► Active ◄──► Active
//!                                                  │
//!                                  delete_cert (last consumer)
//!                                                  ▼
//!                                Orphaned ──hard_delete──► Deleted
//! ```
//!
//! `hard_delete` lives on [`CertPurge`], which ordinary callers holding an
//! `Arc<dyn CertManager>` cannot reach.

pub mod barbican;
pub mod bundle;
pub mod local;
pub mod reference;

pub use barbican::BarbicanCertManager;
pub use bundle::CertBundle;
pub use local::LocalCertManager;
pub use reference::{CertRef, MAX_CERT_REF_LEN};

use crate::config::{AppConfig, CertManagerType};
use crate::errors::Result;
use crate::secrets::{BarbicanClient, SecretString};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

/// A caller claiming a stored reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Consumer {
    /// URL or identifier of the resource holding the reference
    pub resource_ref: String,
    /// Name of the service registering the claim
    pub service_name: String,
}

impl Consumer {
    pub fn new(resource_ref: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self { resource_ref: resource_ref.into(), service_name: service_name.into() }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service_name, self.resource_ref)
    }
}

/// Storage of certificate bundles behind opaque references.
#[async_trait]
pub trait CertManager: Send + Sync + fmt::Debug {
    /// Persist a bundle as one logical unit and return its reference.
    ///
    /// Either every part is stored and addressable by the returned reference,
    /// or nothing created by this call remains and the triggering error is
    /// returned unchanged.
    async fn store_cert(
        &self,
        certificate: &str,
        private_key: &SecretString,
        intermediates: Option<&str>,
        private_key_passphrase: Option<&SecretString>,
        name: &str,
    ) -> Result<CertRef>;

    /// Fetch a bundle.
    ///
    /// Unless `check_only` is set, `consumer` is first registered against the
    /// reference; repeating an identical registration is a no-op.
    async fn get_cert(
        &self,
        reference: &CertRef,
        consumer: Option<&Consumer>,
        check_only: bool,
    ) -> Result<CertBundle>;

    /// Deregister `consumer` from the reference. Whether the bundle is then
    /// destroyed is up to the backing store.
    async fn delete_cert(&self, reference: &CertRef, consumer: Option<&Consumer>) -> Result<()>;

    fn backend_type(&self) -> CertManagerType;
}

/// Administrative removal of stored bundles.
#[async_trait]
pub trait CertPurge: CertManager {
    /// Delete every part of the bundle, then the reference itself.
    ///
    /// Best-effort: a part that is already absent is reported as `NotFound`
    /// after the remaining parts have been deleted.
    async fn hard_delete(&self, reference: &CertRef) -> Result<()>;
}

/// A configured backend, usable as `dyn CertManager` with administrative
/// access kept separate.
#[derive(Debug, Clone)]
pub struct CertManagerHandle {
    manager: Arc<dyn CertManager>,
    purge: Arc<dyn CertPurge>,
}

impl CertManagerHandle {
    pub fn new<M: CertPurge + 'static>(backend: Arc<M>) -> Self {
        Self { manager: backend.clone(), purge: backend }
    }

    /// The public surface handed to ordinary callers.
    pub fn manager(&self) -> Arc<dyn CertManager> {
        Arc::clone(&self.manager)
    }

    /// Administrative access, including `hard_delete`.
    pub fn purge(&self) -> Arc<dyn CertPurge> {
        Arc::clone(&self.purge)
    }
}

impl Deref for CertManagerHandle {
    type Target = dyn CertManager;

    fn deref(&self) -> &Self::Target {
        self.manager.as_ref()
    }
}

/// Build the backend selected by `config.certificates.cert_manager_type`.
pub fn from_config(config: &AppConfig) -> Result<CertManagerHandle> {
    let backend_type = config.certificates.cert_manager_type;
    info!(backend = %backend_type, "Initializing certificate manager");

    let handle = match backend_type {
        CertManagerType::Barbican => {
            let client = BarbicanClient::new(&config.barbican)?;
            let ttl = config.barbican.secret_ttl();
            CertManagerHandle::new(Arc::new(BarbicanCertManager::new(Arc::new(client), ttl)))
        }
        CertManagerType::Local => CertManagerHandle::new(Arc::new(LocalCertManager::new(
            config.certificates.storage_path.clone(),
        ))),
    };

    Ok(handle)
}
