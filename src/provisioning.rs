//! Cluster certificate provisioning.
//!
//! Mints a cluster's CA and the conductor's client certificate, stores both
//! through a [`CertManagerHandle`], and serves later reads, node CSR signing
//! and release of the stored references.

use crate::cert_manager::{CertManagerHandle, CertRef, Consumer};
use crate::errors::{CertError, Result};
use crate::secrets::SecretString;
use crate::x509::X509Engine;
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Subject of the client certificate the conductor uses against a cluster.
pub const CONDUCTOR_CLIENT_NAME: &str = "cluster-conductor";

const PASSPHRASE_LEN: usize = 32;

/// The cluster a set of certificates belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub uuid: Uuid,
    pub name: Option<String>,
}

impl ClusterIdentity {
    pub fn new(uuid: Uuid, name: Option<String>) -> Self {
        Self { uuid, name }
    }

    /// CA common name: the cluster name, or its UUID when unnamed.
    pub fn issuer_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.uuid.to_string(),
        }
    }

    fn consumer(&self, service_name: &str) -> Consumer {
        Consumer::new(self.uuid.to_string(), service_name)
    }
}

/// References a cluster record keeps for its certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCertRefs {
    pub ca_cert_ref: CertRef,
    pub client_cert_ref: CertRef,
}

/// Random alphanumeric passphrase for a private key.
pub fn generate_passphrase() -> SecretString {
    SecretString::new(Alphanumeric.sample_string(&mut rand::thread_rng(), PASSPHRASE_LEN))
}

/// Issues and stores cluster certificates.
#[derive(Debug, Clone)]
pub struct ClusterCertificates {
    engine: X509Engine,
    manager: CertManagerHandle,
    service_name: String,
}

impl ClusterCertificates {
    /// `service_name` is the consumer name registered against stored references.
    pub fn new(
        engine: X509Engine,
        manager: CertManagerHandle,
        service_name: impl Into<String>,
    ) -> Self {
        Self { engine, manager, service_name: service_name.into() }
    }

    /// Generate and store the cluster CA and the conductor client certificate,
    /// registering the cluster as a consumer of both.
    ///
    /// If the client certificate cannot be stored, the stored CA is purged
    /// before the error is returned.
    #[instrument(skip(self), fields(cluster = %cluster.uuid))]
    pub async fn generate_certificates_for_cluster(
        &self,
        cluster: &ClusterIdentity,
    ) -> Result<ClusterCertRefs> {
        let issuer = cluster.issuer_name();

        let ca_passphrase = generate_passphrase();
        let ca = self.engine.generate_ca_certificate(
            &issuer,
            Some(ca_passphrase.expose_secret()),
            None,
        )?;
        let ca_cert_ref = self
            .manager
            .store_cert(&ca.certificate, &ca.private_key, None, Some(&ca_passphrase), &issuer)
            .await?;

        let client_passphrase = generate_passphrase();
        let client_name = format!("{}-{}", issuer, CONDUCTOR_CLIENT_NAME);
        let client_cert_ref = match self
            .store_client(&issuer, &ca, &ca_passphrase, &client_passphrase, &client_name)
            .await
        {
            Ok(reference) => reference,
            Err(e) => {
                error!(
                    ca_cert_ref = %ca_cert_ref,
                    error = %e,
                    "Client certificate failed, purging CA"
                );
                if let Err(cleanup) = self.manager.purge().hard_delete(&ca_cert_ref).await {
                    warn!(
                        ca_cert_ref = %ca_cert_ref,
                        error = %cleanup,
                        "Failed to purge CA certificate"
                    );
                }
                return Err(e);
            }
        };

        let consumer = cluster.consumer(&self.service_name);
        self.manager.get_cert(&ca_cert_ref, Some(&consumer), false).await?;
        self.manager.get_cert(&client_cert_ref, Some(&consumer), false).await?;

        info!(
            ca_cert_ref = %ca_cert_ref,
            client_cert_ref = %client_cert_ref,
            "Provisioned cluster certificates"
        );
        Ok(ClusterCertRefs { ca_cert_ref, client_cert_ref })
    }

    async fn store_client(
        &self,
        issuer: &str,
        ca: &crate::x509::IssuedCertificate,
        ca_passphrase: &SecretString,
        client_passphrase: &SecretString,
        name: &str,
    ) -> Result<CertRef> {
        let client = self.engine.generate_client_certificate(
            issuer,
            CONDUCTOR_CLIENT_NAME,
            &ca.private_key,
            Some(ca_passphrase.expose_secret()),
            Some(client_passphrase.expose_secret()),
            None,
        )?;

        self.manager
            .store_cert(
                &client.certificate,
                &client.private_key,
                Some(&ca.certificate),
                Some(client_passphrase),
                name,
            )
            .await
    }

    /// The cluster's CA certificate PEM.
    #[instrument(skip(self, refs), fields(cluster = %cluster.uuid))]
    pub async fn get_cluster_ca_certificate(
        &self,
        cluster: &ClusterIdentity,
        refs: &ClusterCertRefs,
    ) -> Result<String> {
        let consumer = cluster.consumer(&self.service_name);
        let bundle = self.manager.get_cert(&refs.ca_cert_ref, Some(&consumer), false).await?;
        bundle.require_certificate(refs.ca_cert_ref.as_str()).map(str::to_string)
    }

    /// Sign a node's CSR with the cluster CA.
    #[instrument(skip(self, refs, csr_pem), fields(cluster = %cluster.uuid))]
    pub async fn sign_node_certificate(
        &self,
        cluster: &ClusterIdentity,
        refs: &ClusterCertRefs,
        csr_pem: &str,
    ) -> Result<String> {
        let consumer = cluster.consumer(&self.service_name);
        let bundle = self.manager.get_cert(&refs.ca_cert_ref, Some(&consumer), false).await?;

        let ca_key = bundle
            .private_key()
            .ok_or_else(|| CertError::not_found("CA private key", refs.ca_cert_ref.as_str()))?;
        let passphrase = bundle.private_key_passphrase().map(|p| p.expose_secret());

        self.engine.sign_csr(csr_pem, &cluster.issuer_name(), ca_key, passphrase, None)
    }

    /// Release the cluster's claim on both references.
    ///
    /// An already absent reference or registration is logged and skipped.
    /// Any other failure is returned after both releases were attempted.
    #[instrument(skip(self, refs), fields(cluster = %cluster.uuid))]
    pub async fn delete_certificates_from_cluster(
        &self,
        cluster: &ClusterIdentity,
        refs: &ClusterCertRefs,
    ) -> Result<()> {
        let consumer = cluster.consumer(&self.service_name);
        let mut first_error = None;

        for reference in [&refs.ca_cert_ref, &refs.client_cert_ref] {
            match self.manager.delete_cert(reference, Some(&consumer)).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(cert_ref = %reference, error = %e, "Certificate already released");
                }
                Err(e) => {
                    error!(cert_ref = %reference, error = %e, "Failed to release certificate");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
