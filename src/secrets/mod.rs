//! Secret storage for certificate material.
//!
//! The [`SecretStore`] trait is the capability contract a key manager must
//! expose: independent secrets, an aggregating certificate container, and
//! consumer registration that defers deletion while claims remain.
//!
//! # Implementations
//!
//! - [`BarbicanClient`]: REST client for a Barbican key manager
//! - [`InMemorySecretStore`]: process-local store with a call journal and
//!   failure injection
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_certs::secrets::{BarbicanClient, SecretStore};
//!
//! let store = BarbicanClient::new(&config.barbican)?;
//! let secret_ref = store.create_secret(pem, "Certificate - bay-1", None).await?;
//! let container = store.get_container(&container_ref).await?;
//! ```

pub mod barbican;
pub mod memory;
pub mod store;
pub mod types;

pub use barbican::BarbicanClient;
pub use memory::{InMemorySecretStore, InjectedFailure, StoreCall};
pub use store::{
    CertificateContainer, CertificateSecretRefs, ContainerConsumer, ContainerSlot, SecretStore,
    MAX_NAME_LEN,
};
pub use types::SecretString;
