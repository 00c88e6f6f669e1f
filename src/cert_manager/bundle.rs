//! Certificate bundle value object.

use crate::secrets::SecretString;

/// A certificate with its private key, intermediates and key passphrase.
///
/// Every field may be absent. Absence reads back as `None`, never as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertBundle {
    certificate: Option<String>,
    private_key: Option<SecretString>,
    intermediates: Option<String>,
    private_key_passphrase: Option<SecretString>,
}

impl CertBundle {
    pub fn new(
        certificate: Option<String>,
        private_key: Option<SecretString>,
        intermediates: Option<String>,
        private_key_passphrase: Option<SecretString>,
    ) -> Self {
        Self { certificate, private_key, intermediates, private_key_passphrase }
    }

    pub fn certificate(&self) -> Option<&str> {
        self.certificate.as_deref()
    }

    pub fn private_key(&self) -> Option<&SecretString> {
        self.private_key.as_ref()
    }

    pub fn intermediates(&self) -> Option<&str> {
        self.intermediates.as_deref()
    }

    pub fn private_key_passphrase(&self) -> Option<&SecretString> {
        self.private_key_passphrase.as_ref()
    }

    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    pub fn with_private_key(mut self, private_key: impl Into<SecretString>) -> Self {
        self.private_key = Some(private_key.into());
        self
    }

    pub fn with_intermediates(mut self, intermediates: impl Into<String>) -> Self {
        self.intermediates = Some(intermediates.into());
        self
    }

    pub fn with_private_key_passphrase(mut self, passphrase: impl Into<SecretString>) -> Self {
        self.private_key_passphrase = Some(passphrase.into());
        self
    }

    /// The certificate PEM, or a not-found error naming `reference`.
    pub fn require_certificate(&self, reference: &str) -> crate::errors::Result<&str> {
        self.certificate()
            .ok_or_else(|| crate::errors::CertError::not_found("certificate", reference))
    }
}
