//! Read-only certificate inspection.

use super::keys;
use crate::errors::{CertError, Result};
use crate::secrets::SecretString;
use chrono::{DateTime, Utc};
use serde::Serialize;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;
use x509_parser::x509::X509Name;

/// Summary of a certificate's identity and extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
    pub is_ca: bool,
    pub path_len: Option<u32>,
    /// Key usage bits that are set, by RFC 5280 name
    pub key_usage: Vec<String>,
    pub client_auth: bool,
    pub server_auth: bool,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Colon separated hex
    pub serial: String,
}

impl CertificateInfo {
    pub fn is_self_issued(&self) -> bool {
        self.subject_cn.is_some() && self.subject_cn == self.issuer_cn
    }

    pub fn has_key_usage(&self, name: &str) -> bool {
        self.key_usage.iter().any(|u| u == name)
    }
}

fn first_cn(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name().next().and_then(|cn| cn.as_str().ok()).map(str::to_string)
}

fn timestamp(value: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value, 0)
        .ok_or_else(|| CertError::validation(format!("Validity timestamp {} out of range", value)))
}

fn with_certificate<T>(pem: &str, f: impl FnOnce(&X509Certificate<'_>) -> Result<T>) -> Result<T> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|e| {
        CertError::validation_field(format!("Certificate is not valid PEM: {}", e), "certificate")
    })?;
    let (_, cert) = X509Certificate::from_der(&pem.contents).map_err(|e| {
        CertError::validation_field(format!("Malformed certificate: {}", e), "certificate")
    })?;
    f(&cert)
}

fn extension_error(e: x509_parser::error::X509Error) -> CertError {
    CertError::validation_field(format!("Invalid certificate extension: {}", e), "certificate")
}

/// Parse a PEM certificate and summarize it.
pub fn inspect_certificate(pem: &str) -> Result<CertificateInfo> {
    with_certificate(pem, |cert| {
        let basic_constraints = cert.basic_constraints().map_err(extension_error)?;
        let (is_ca, path_len) = basic_constraints
            .map(|bc| (bc.value.ca, bc.value.path_len_constraint))
            .unwrap_or((false, None));

        let key_usage = match cert.key_usage().map_err(extension_error)? {
            Some(ext) => {
                let ku = ext.value;
                [
                    ("digital_signature", ku.digital_signature()),
                    ("content_commitment", ku.non_repudiation()),
                    ("key_encipherment", ku.key_encipherment()),
                    ("data_encipherment", ku.data_encipherment()),
                    ("key_agreement", ku.key_agreement()),
                    ("key_cert_sign", ku.key_cert_sign()),
                    ("crl_sign", ku.crl_sign()),
                    ("encipher_only", ku.encipher_only()),
                    ("decipher_only", ku.decipher_only()),
                ]
                .into_iter()
                .filter(|(_, set)| *set)
                .map(|(name, _)| name.to_string())
                .collect()
            }
            None => Vec::new(),
        };

        let (client_auth, server_auth) = cert
            .extended_key_usage()
            .map_err(extension_error)?
            .map(|eku| (eku.value.client_auth, eku.value.server_auth))
            .unwrap_or((false, false));

        let validity = cert.validity();
        Ok(CertificateInfo {
            subject_cn: first_cn(cert.subject()),
            issuer_cn: first_cn(cert.issuer()),
            is_ca,
            path_len,
            key_usage,
            client_auth,
            server_auth,
            not_before: timestamp(validity.not_before.timestamp())?,
            not_after: timestamp(validity.not_after.timestamp())?,
            serial: cert.raw_serial_as_string(),
        })
    })
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Whether `certificate` carries the public half of `private_key`.
pub fn certificate_matches_key(
    certificate: &str,
    private_key: &SecretString,
    passphrase: Option<&str>,
) -> Result<bool> {
    let key = keys::decode_private_key(private_key, passphrase)?;
    let modulus = keys::modulus_bytes(&key);

    with_certificate(certificate, |cert| {
        let parsed = cert.public_key().parsed().map_err(|e| {
            CertError::validation_field(format!("Unreadable public key: {}", e), "certificate")
        })?;
        Ok(match parsed {
            PublicKey::RSA(rsa) => trim_leading_zeros(rsa.modulus) == modulus.as_slice(),
            _ => false,
        })
    })
}
