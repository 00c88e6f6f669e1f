//! Certificate manager backed by a Barbican-style secret store.
//!
//! A bundle is stored as up to four secrets (certificate, private key,
//! intermediates, key passphrase) aggregated by one certificate container.
//! The container reference is the bundle reference. Consumer counts live in
//! the store only.

use super::{CertBundle, CertManager, CertPurge, CertRef, Consumer};
use crate::config::CertManagerType;
use crate::errors::{CertError, Result};
use crate::secrets::{
    CertificateContainer, CertificateSecretRefs, ContainerSlot, SecretStore, SecretString,
    MAX_NAME_LEN,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Stores certificate bundles as secret containers.
#[derive(Debug, Clone)]
pub struct BarbicanCertManager {
    store: Arc<dyn SecretStore>,
    secret_ttl: Option<chrono::Duration>,
}

impl BarbicanCertManager {
    /// `secret_ttl` of `None` creates secrets that never expire.
    pub fn new(store: Arc<dyn SecretStore>, secret_ttl: Option<chrono::Duration>) -> Self {
        Self { store, secret_ttl }
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    fn validate_name(name: &str) -> Result<()> {
        let longest = ContainerSlot::ALL
            .iter()
            .map(|slot| slot.secret_name(name).len())
            .max()
            .unwrap_or(name.len());
        if longest > MAX_NAME_LEN {
            return Err(CertError::validation_field(
                format!("Certificate name too long for secret names ({} bytes)", name.len()),
                "name",
            ));
        }
        Ok(())
    }

    /// Delete every secret created so far in a failed `store_cert`.
    ///
    /// Cleanup failures are logged and never replace `cause`.
    async fn roll_back(&self, name: &str, created: &CertificateSecretRefs, cause: &CertError) {
        error!(
            name = %name,
            created_secrets = created.len(),
            error = %cause,
            "Failed to store certificate, deleting created secrets"
        );

        for (slot, secret_ref) in created.iter() {
            if let Err(cleanup) = self.store.delete_secret(secret_ref).await {
                warn!(
                    secret_ref = %secret_ref,
                    slot = %slot,
                    error = %cleanup,
                    "Failed to delete secret during rollback"
                );
            }
        }
    }

    async fn create_secrets(
        &self,
        name: &str,
        payloads: &[(ContainerSlot, Option<&str>)],
        created: &mut CertificateSecretRefs,
    ) -> Result<()> {
        let expiration = self.secret_ttl.map(|ttl| Utc::now() + ttl);

        for (slot, payload) in payloads {
            let Some(payload) = payload else { continue };
            let secret_ref =
                self.store.create_secret(payload, &slot.secret_name(name), expiration).await?;
            debug!(slot = %slot, secret_ref = %secret_ref, "Created certificate secret");
            created.set(*slot, secret_ref);
        }
        Ok(())
    }

    async fn persist_container(
        &self,
        name: &str,
        secret_refs: CertificateSecretRefs,
    ) -> Result<CertRef> {
        let container = self.store.create_certificate_container(name, secret_refs).await?;
        let container_ref = self.store.store_container(&container).await?;

        match CertRef::new(container_ref.clone()) {
            Ok(reference) => Ok(reference),
            Err(e) => {
                if let Err(cleanup) = self.store.delete_container(&container_ref).await {
                    warn!(cert_ref = %container_ref, error = %cleanup, "Failed to delete unusable container");
                }
                Err(e)
            }
        }
    }

    /// Read the payload of every populated slot.
    async fn load_bundle(&self, container: &CertificateContainer) -> Result<CertBundle> {
        let refs = &container.secret_refs;
        let mut payloads: [Option<String>; 4] = Default::default();

        for (index, slot) in ContainerSlot::ALL.into_iter().enumerate() {
            if let Some(secret_ref) = refs.get(slot) {
                payloads[index] = Some(self.store.get_secret_payload(secret_ref).await?);
            }
        }

        let [certificate, private_key, intermediates, passphrase] = payloads;
        Ok(CertBundle::new(
            certificate,
            private_key.map(SecretString::new),
            intermediates,
            passphrase.map(SecretString::new),
        ))
    }
}

#[async_trait]
impl CertManager for BarbicanCertManager {
    #[instrument(skip(self, certificate, private_key, intermediates, private_key_passphrase), fields(name = %name))]
    async fn store_cert(
        &self,
        certificate: &str,
        private_key: &SecretString,
        intermediates: Option<&str>,
        private_key_passphrase: Option<&SecretString>,
        name: &str,
    ) -> Result<CertRef> {
        Self::validate_name(name)?;

        let payloads = [
            (ContainerSlot::Certificate, Some(certificate)),
            (ContainerSlot::PrivateKey, Some(private_key.expose_secret())),
            (ContainerSlot::Intermediates, intermediates),
            (ContainerSlot::PrivateKeyPassphrase, private_key_passphrase.map(|p| p.expose_secret())),
        ];

        let mut created = CertificateSecretRefs::default();
        if let Err(e) = self.create_secrets(name, &payloads, &mut created).await {
            self.roll_back(name, &created, &e).await;
            return Err(e);
        }

        match self.persist_container(name, created.clone()).await {
            Ok(reference) => {
                info!(cert_ref = %reference, secrets = created.len(), "Stored certificate");
                Ok(reference)
            }
            Err(e) => {
                self.roll_back(name, &created, &e).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(cert_ref = %reference))]
    async fn get_cert(
        &self,
        reference: &CertRef,
        consumer: Option<&Consumer>,
        check_only: bool,
    ) -> Result<CertBundle> {
        let container = match consumer {
            Some(consumer) if !check_only => {
                self.store
                    .register_consumer(
                        reference.as_str(),
                        &consumer.resource_ref,
                        &consumer.service_name,
                    )
                    .await?
            }
            _ => self.store.get_container(reference.as_str()).await?,
        };

        self.load_bundle(&container).await
    }

    #[instrument(skip(self), fields(cert_ref = %reference))]
    async fn delete_cert(&self, reference: &CertRef, consumer: Option<&Consumer>) -> Result<()> {
        let consumer = consumer.ok_or_else(|| {
            CertError::validation_field(
                "A consumer is required to release a stored certificate",
                "consumer",
            )
        })?;

        self.store
            .remove_consumer(reference.as_str(), &consumer.resource_ref, &consumer.service_name)
            .await?;
        info!(consumer = %consumer, "Released certificate");
        Ok(())
    }

    fn backend_type(&self) -> CertManagerType {
        CertManagerType::Barbican
    }
}

#[async_trait]
impl CertPurge for BarbicanCertManager {
    #[instrument(skip(self), fields(cert_ref = %reference))]
    async fn hard_delete(&self, reference: &CertRef) -> Result<()> {
        let container = self.store.get_container(reference.as_str()).await?;

        let mut first_error: Option<CertError> = None;
        for (slot, secret_ref) in container.secret_refs.iter() {
            if let Err(e) = self.store.delete_secret(secret_ref).await {
                warn!(slot = %slot, secret_ref = %secret_ref, error = %e, "Failed to delete secret");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.store.delete_container(reference.as_str()).await {
            warn!(error = %e, "Failed to delete container");
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Deleted certificate");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreOperation;
    use crate::secrets::{InMemorySecretStore, InjectedFailure, StoreCall};
    use tracing_test::traced_test;

    fn manager() -> (Arc<InMemorySecretStore>, BarbicanCertManager) {
        let store = Arc::new(InMemorySecretStore::new());
        (store.clone(), BarbicanCertManager::new(store, None))
    }

    #[test]
    fn test_validate_name() {
        assert!(BarbicanCertManager::validate_name("bay-1").is_ok());
        assert!(BarbicanCertManager::validate_name(&"n".repeat(MAX_NAME_LEN)).is_err());
    }

    #[tokio::test]
    async fn test_secret_names_follow_slot_labels() {
        let (store, manager) = manager();
        manager
            .store_cert("cert", &SecretString::new("key"), None, None, "bay-1")
            .await
            .unwrap();

        let names: Vec<_> = store
            .calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::CreateSecret { name } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["Certificate - bay-1", "Private Key - bay-1"]);
    }

    #[tokio::test]
    async fn test_secret_ttl_sets_expiration() {
        let store = Arc::new(InMemorySecretStore::new());
        let manager = BarbicanCertManager::new(store.clone(), Some(chrono::Duration::hours(2)));
        let reference = manager
            .store_cert("cert", &SecretString::new("key"), None, None, "bay-1")
            .await
            .unwrap();

        let container = store.get_container(reference.as_str()).await.unwrap();
        let cert_ref = container.secret_refs.certificate.unwrap();
        let expiration = store.secret_expiration(&cert_ref).await.unwrap();
        assert!(expiration > Utc::now() + chrono::Duration::minutes(110));
    }

    #[tokio::test]
    async fn test_delete_without_consumer_is_rejected() {
        let (store, manager) = manager();
        let reference = CertRef::new("memory://containers/x").unwrap();
        let err = manager.delete_cert(&reference, None).await.unwrap_err();
        assert!(matches!(err, CertError::Validation { .. }));
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rollback_logs_cause_and_cleanup_failures() {
        let (store, manager) = manager();
        store.fail_next(StoreOperation::StoreContainer, InjectedFailure::Rejected(500)).await;
        store.fail_next(StoreOperation::DeleteSecret, InjectedFailure::Unavailable).await;

        let err = manager
            .store_cert("cert", &SecretString::new("key"), None, None, "bay-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::StoreFailure { status: Some(500), .. }));

        assert!(logs_contain("Failed to store certificate, deleting created secrets"));
        assert!(logs_contain("Failed to delete secret during rollback"));
        assert_eq!(store.secret_count().await, 1);
    }
}
