//! # X.509 Engine
//!
//! Stateless issuance of RSA/SHA-256 certificates for cluster control-plane
//! TLS:
//!
//! - a self-signed CA (`cA=true`, path length 0, keyCertSign only)
//! - client certificates signed by that CA (`cA=false`, digitalSignature +
//!   keyEncipherment, clientAuth)
//! - client-profile certificates for externally generated CSRs
//!
//! Private keys are returned as PKCS#8 PEM, encrypted when a passphrase is
//! given. Nothing here performs I/O.

pub mod inspect;
pub mod keys;
pub mod operations;

pub use inspect::{certificate_matches_key, inspect_certificate, CertificateInfo};
pub use operations::{build_csr, MAX_COMMON_NAME_LEN};

use crate::config::X509Config;
use crate::errors::Result;
use crate::secrets::SecretString;
use time::Duration;
use tracing::{debug, instrument};

/// A freshly issued certificate and its private key.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// PEM encoded certificate
    pub certificate: String,
    /// PKCS#8 PEM private key, encrypted if a passphrase was supplied
    pub private_key: SecretString,
}

/// Issues CA and client certificates.
#[derive(Debug, Clone, Default)]
pub struct X509Engine {
    config: X509Config,
}

impl X509Engine {
    pub fn new(config: X509Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &X509Config {
        &self.config
    }

    fn validity(&self, validity: Option<Duration>) -> Result<Duration> {
        let validity = validity.unwrap_or_else(|| self.config.term_of_validity());
        operations::validate_validity(validity)?;
        Ok(validity)
    }

    /// Generate a self-signed CA with subject = issuer = `issuer_name`.
    ///
    /// `validity` of `None` uses the configured term of validity.
    #[instrument(skip(self, passphrase), fields(issuer = %issuer_name))]
    pub fn generate_ca_certificate(
        &self,
        issuer_name: &str,
        passphrase: Option<&str>,
        validity: Option<Duration>,
    ) -> Result<IssuedCertificate> {
        operations::validate_common_name(issuer_name, "issuer_name")?;
        let validity = self.validity(validity)?;

        let key = keys::generate_rsa_key(self.config.rsa_key_size)?;
        let signing_key = keys::signing_key_pair(&key)?;
        let certificate = operations::self_sign_ca(issuer_name, validity, &signing_key)?;
        let private_key = keys::encode_private_key(&key, passphrase)?;

        debug!(key_bits = self.config.rsa_key_size, "Generated CA certificate");
        Ok(IssuedCertificate { certificate, private_key })
    }

    /// Generate a client key and certificate signed by the CA key.
    ///
    /// Fails with a validation error for an empty subject and a signing error
    /// when `ca_private_key` cannot be decrypted with `ca_key_passphrase`.
    #[instrument(
        skip(self, ca_private_key, ca_key_passphrase, client_passphrase),
        fields(issuer = %ca_issuer_name, subject = %subject_name)
    )]
    pub fn generate_client_certificate(
        &self,
        ca_issuer_name: &str,
        subject_name: &str,
        ca_private_key: &SecretString,
        ca_key_passphrase: Option<&str>,
        client_passphrase: Option<&str>,
        validity: Option<Duration>,
    ) -> Result<IssuedCertificate> {
        operations::validate_common_name(ca_issuer_name, "ca_issuer_name")?;
        operations::validate_common_name(subject_name, "subject_name")?;
        let validity = self.validity(validity)?;

        let ca_key = keys::decode_private_key(ca_private_key, ca_key_passphrase)?;
        let ca_signing_key = keys::signing_key_pair(&ca_key)?;

        let key = keys::generate_rsa_key(self.config.rsa_key_size)?;
        let signing_key = keys::signing_key_pair(&key)?;
        let certificate = operations::sign_client(
            ca_issuer_name,
            &ca_signing_key,
            subject_name,
            &signing_key,
            validity,
        )?;
        let private_key = keys::encode_private_key(&key, client_passphrase)?;

        debug!("Generated client certificate");
        Ok(IssuedCertificate { certificate, private_key })
    }

    /// Issue a client-profile certificate for a CSR, signed by the CA key.
    ///
    /// The CSR must be PEM, carry a valid self-signature and a non-empty
    /// common name. Returns the certificate PEM.
    #[instrument(skip(self, csr_pem, ca_private_key, ca_key_passphrase), fields(issuer = %ca_issuer_name))]
    pub fn sign_csr(
        &self,
        csr_pem: &str,
        ca_issuer_name: &str,
        ca_private_key: &SecretString,
        ca_key_passphrase: Option<&str>,
        validity: Option<Duration>,
    ) -> Result<String> {
        operations::validate_common_name(ca_issuer_name, "ca_issuer_name")?;
        let validity = self.validity(validity)?;
        let subject = operations::verify_csr(csr_pem)?;

        let ca_key = keys::decode_private_key(ca_private_key, ca_key_passphrase)?;
        let ca_signing_key = keys::signing_key_pair(&ca_key)?;
        let certificate = operations::sign_csr(csr_pem, ca_issuer_name, &ca_signing_key, validity)?;

        debug!(subject = %subject, "Signed certificate request");
        Ok(certificate)
    }
}
