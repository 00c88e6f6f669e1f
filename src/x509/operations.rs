//! Certificate building and signing.

use super::keys;
use crate::errors::{CertError, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    SerialNumber,
};
use time::{Duration, OffsetDateTime};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

/// Upper bound on a common name (RFC 5280 `ub-common-name`).
pub const MAX_COMMON_NAME_LEN: usize = 64;

/// Longest certificate lifetime accepted, in days.
pub const MAX_VALIDITY_DAYS: i64 = 36500;

const SERIAL_LEN: usize = 16;

/// Check a subject or issuer name before it becomes a common name.
pub fn validate_common_name(name: &str, field: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CertError::validation_field(format!("{} cannot be empty", field), field));
    }
    if name.chars().count() > MAX_COMMON_NAME_LEN {
        return Err(CertError::validation_field(
            format!("{} exceeds {} characters", field, MAX_COMMON_NAME_LEN),
            field,
        ));
    }
    Ok(())
}

/// Validity must be a positive span of at most [`MAX_VALIDITY_DAYS`].
pub fn validate_validity(validity: Duration) -> Result<()> {
    if validity <= Duration::ZERO {
        return Err(CertError::validation_field("Validity must be positive", "validity"));
    }
    if validity > Duration::days(MAX_VALIDITY_DAYS) {
        return Err(CertError::validation_field(
            format!("Validity exceeds {} days", MAX_VALIDITY_DAYS),
            "validity",
        ));
    }
    Ok(())
}

fn common_name(name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name.to_string());
    dn
}

fn random_serial() -> SerialNumber {
    let mut bytes: [u8; SERIAL_LEN] = rand::random();
    // positive, no leading zero octet
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    SerialNumber::from_slice(&bytes)
}

fn apply_validity(params: &mut CertificateParams, validity: Duration) -> Result<()> {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now
        .checked_add(validity)
        .ok_or_else(|| CertError::validation_field("Validity is out of range", "validity"))?;
    Ok(())
}

/// CA profile: self-issued, `cA=true`, path length 0, keyCertSign only.
pub fn ca_params(issuer_name: &str, validity: Duration) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.distinguished_name = common_name(issuer_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    params.extended_key_usages = Vec::new();
    params.serial_number = Some(random_serial());
    apply_validity(&mut params, validity)?;
    Ok(params)
}

fn apply_client_profile(params: &mut CertificateParams, validity: Duration) -> Result<()> {
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.serial_number = Some(random_serial());
    apply_validity(params, validity)
}

/// Client profile: `cA=false`, digitalSignature + keyEncipherment, clientAuth.
pub fn client_params(subject_name: &str, validity: Duration) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.distinguished_name = common_name(subject_name);
    apply_client_profile(&mut params, validity)?;
    Ok(params)
}

/// Build the self-signed CA certificate for `key_pair`.
pub fn self_sign_ca(issuer_name: &str, validity: Duration, key_pair: &KeyPair) -> Result<String> {
    let cert = ca_params(issuer_name, validity)?
        .self_signed(key_pair)
        .map_err(|e| CertError::signing_with_source("Failed to self-sign CA certificate", e))?;
    Ok(cert.pem())
}

/// Issuer handle for signing under the CA named `ca_issuer_name`.
///
/// Signing reads only the issuer's name and key identifier, both of which
/// derive from the CA name and key.
fn issuer(ca_issuer_name: &str, ca_key: &KeyPair) -> Result<Certificate> {
    ca_params(ca_issuer_name, Duration::days(1))?
        .self_signed(ca_key)
        .map_err(|e| CertError::signing_with_source("Failed to load CA signing key", e))
}

/// Sign a client certificate for `subject_key` under the CA key.
pub fn sign_client(
    ca_issuer_name: &str,
    ca_key: &KeyPair,
    subject_name: &str,
    subject_key: &KeyPair,
    validity: Duration,
) -> Result<String> {
    let issuer = issuer(ca_issuer_name, ca_key)?;
    let cert = client_params(subject_name, validity)?
        .signed_by(subject_key, &issuer, ca_key)
        .map_err(|e| CertError::signing_with_source("Failed to sign client certificate", e))?;
    Ok(cert.pem())
}

/// Parse and verify a CSR, returning its subject common name.
pub fn verify_csr(csr_pem: &str) -> Result<String> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(csr_pem.as_bytes())
        .map_err(|e| CertError::validation_field(format!("CSR is not valid PEM: {}", e), "csr"))?;
    if pem.label != "CERTIFICATE REQUEST" && pem.label != "NEW CERTIFICATE REQUEST" {
        return Err(CertError::validation_field(
            format!("Expected a CERTIFICATE REQUEST, found {}", pem.label),
            "csr",
        ));
    }

    let (_, csr) = X509CertificationRequest::from_der(&pem.contents)
        .map_err(|e| CertError::validation_field(format!("Malformed CSR: {}", e), "csr"))?;
    csr.verify_signature().map_err(|e| {
        CertError::validation_field(format!("CSR signature does not verify: {}", e), "csr")
    })?;

    let subject = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    validate_common_name(&subject, "csr subject")?;
    Ok(subject)
}

/// Issue a client-profile certificate for a verified CSR.
pub fn sign_csr(
    csr_pem: &str,
    ca_issuer_name: &str,
    ca_key: &KeyPair,
    validity: Duration,
) -> Result<String> {
    let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
        .map_err(|e| CertError::validation_field(format!("Unsupported CSR: {}", e), "csr"))?;
    apply_client_profile(&mut csr.params, validity)?;

    let issuer = issuer(ca_issuer_name, ca_key)?;
    let cert = csr
        .signed_by(&issuer, ca_key)
        .map_err(|e| CertError::signing_with_source("Failed to sign CSR", e))?;
    Ok(cert.pem())
}

/// Build a CSR for `subject_name` signed by `key`. Used by callers that hold
/// their own key and by the engine's tests.
pub fn build_csr(subject_name: &str, key: &rsa::RsaPrivateKey) -> Result<String> {
    validate_common_name(subject_name, "subject_name")?;
    let key_pair = keys::signing_key_pair(key)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = common_name(subject_name);
    params
        .serialize_request(&key_pair)
        .and_then(|csr| csr.pem())
        .map_err(|e| CertError::signing_with_source("Failed to build CSR", e))
}
