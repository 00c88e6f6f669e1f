//! Secret store capability contract.
//!
//! A secret store keeps independent secrets, groups four of them into a
//! certificate container, and tracks consumers registered against a container.
//! The store is the only source of truth for existence and consumer counts.

use crate::errors::{CertError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Longest container or secret name accepted by the store.
pub const MAX_NAME_LEN: usize = 255;

/// The four secrets a certificate container can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerSlot {
    Certificate,
    PrivateKey,
    Intermediates,
    PrivateKeyPassphrase,
}

impl ContainerSlot {
    pub const ALL: [ContainerSlot; 4] =
        [Self::Certificate, Self::PrivateKey, Self::Intermediates, Self::PrivateKeyPassphrase];

    /// Name of the slot inside a container's `secret_refs`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::PrivateKey => "private_key",
            Self::Intermediates => "intermediates",
            Self::PrivateKeyPassphrase => "private_key_passphrase",
        }
    }

    /// Human readable prefix used when naming the slot's secret.
    pub fn secret_label(&self) -> &'static str {
        match self {
            Self::Certificate => "Certificate",
            Self::PrivateKey => "Private Key",
            Self::Intermediates => "Intermediates",
            Self::PrivateKeyPassphrase => "Private Key Passphrase",
        }
    }

    /// Secret name for this slot within a bundle called `bundle_name`.
    pub fn secret_name(&self, bundle_name: &str) -> String {
        format!("{} - {}", self.secret_label(), bundle_name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.as_str() == name)
    }
}

impl fmt::Display for ContainerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret references held by a certificate container, one per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateSecretRefs {
    pub certificate: Option<String>,
    pub private_key: Option<String>,
    pub intermediates: Option<String>,
    pub private_key_passphrase: Option<String>,
}

impl CertificateSecretRefs {
    pub fn get(&self, slot: ContainerSlot) -> Option<&str> {
        match slot {
            ContainerSlot::Certificate => self.certificate.as_deref(),
            ContainerSlot::PrivateKey => self.private_key.as_deref(),
            ContainerSlot::Intermediates => self.intermediates.as_deref(),
            ContainerSlot::PrivateKeyPassphrase => self.private_key_passphrase.as_deref(),
        }
    }

    pub fn set(&mut self, slot: ContainerSlot, secret_ref: impl Into<String>) {
        let value = Some(secret_ref.into());
        match slot {
            ContainerSlot::Certificate => self.certificate = value,
            ContainerSlot::PrivateKey => self.private_key = value,
            ContainerSlot::Intermediates => self.intermediates = value,
            ContainerSlot::PrivateKeyPassphrase => self.private_key_passphrase = value,
        }
    }

    /// Populated slots with their references.
    pub fn iter(&self) -> impl Iterator<Item = (ContainerSlot, &str)> + '_ {
        ContainerSlot::ALL.into_iter().filter_map(|slot| self.get(slot).map(|r| (slot, r)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A consumer registered against a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerConsumer {
    pub name: String,
    pub url: String,
}

/// A certificate container, either freshly created (no reference yet) or
/// fetched from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateContainer {
    /// Reference assigned by the store once the container is stored
    pub container_ref: Option<String>,
    pub name: String,
    pub secret_refs: CertificateSecretRefs,
    pub consumers: Vec<ContainerConsumer>,
}

impl CertificateContainer {
    /// Build an unsaved container referencing already created secrets.
    pub fn new(name: impl Into<String>, secret_refs: CertificateSecretRefs) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(CertError::validation_field(
                format!("Container name exceeds {} bytes", MAX_NAME_LEN),
                "name",
            ));
        }
        Ok(Self { container_ref: None, name, secret_refs, consumers: Vec::new() })
    }
}

/// Capabilities a secret-storage service must expose.
///
/// Implementations must be thread-safe and never log secret payloads.
/// Every method is a single round trip (or a purely local step) and performs
/// no retries of its own.
#[async_trait]
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// Store one secret and return its reference.
    ///
    /// `expiration` of `None` means the secret never expires.
    async fn create_secret(
        &self,
        payload: &str,
        name: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<String>;

    /// Fetch a secret's payload.
    async fn get_secret_payload(&self, secret_ref: &str) -> Result<String>;

    /// Delete a secret.
    async fn delete_secret(&self, secret_ref: &str) -> Result<()>;

    /// Build a certificate container referencing the given secrets.
    ///
    /// The container is not persisted until [`SecretStore::store_container`].
    async fn create_certificate_container(
        &self,
        name: &str,
        secret_refs: CertificateSecretRefs,
    ) -> Result<CertificateContainer> {
        CertificateContainer::new(name, secret_refs)
    }

    /// Persist a container and return its reference.
    async fn store_container(&self, container: &CertificateContainer) -> Result<String>;

    /// Fetch a container without side effects.
    async fn get_container(&self, container_ref: &str) -> Result<CertificateContainer>;

    /// Register `(url, name)` as a consumer and return the container in the
    /// same round trip. Repeating an identical registration is a no-op.
    async fn register_consumer(
        &self,
        container_ref: &str,
        url: &str,
        name: &str,
    ) -> Result<CertificateContainer>;

    /// Remove the `(url, name)` consumer registration.
    async fn remove_consumer(&self, container_ref: &str, url: &str, name: &str) -> Result<()>;

    /// Delete the container record. Referenced secrets are left untouched.
    async fn delete_container(&self, container_ref: &str) -> Result<()>;
}
