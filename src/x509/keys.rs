//! RSA key generation and PEM encoding.
//!
//! Private keys leave this module as PKCS#8 PEM, encrypted (PBES2) when a
//! passphrase is supplied and plaintext otherwise.

use crate::errors::{CertError, Result};
use crate::secrets::SecretString;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};

/// Public exponent used for every generated key.
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

const PKCS1_PEM_LABEL: &str = "BEGIN RSA PRIVATE KEY";

/// Generate a fresh RSA private key with the given modulus size.
pub fn generate_rsa_key(bits: usize) -> Result<RsaPrivateKey> {
    let mut rng = rand::thread_rng();
    RsaPrivateKey::new_with_exp(&mut rng, bits, &BigUint::from(RSA_PUBLIC_EXPONENT)).map_err(|e| {
        CertError::key_generation_with_source(format!("Failed to generate {}-bit RSA key", bits), e)
    })
}

/// Serialize a private key as PKCS#8 PEM, encrypted under `passphrase` if given.
pub fn encode_private_key(key: &RsaPrivateKey, passphrase: Option<&str>) -> Result<SecretString> {
    let pem = match passphrase {
        Some(passphrase) => {
            let mut rng = rand::thread_rng();
            key.to_pkcs8_encrypted_pem(&mut rng, passphrase.as_bytes(), LineEnding::LF)
        }
        None => key.to_pkcs8_pem(LineEnding::LF),
    }
    .map_err(|e| CertError::key_generation_with_source("Failed to encode private key", e))?;

    Ok(SecretString::new(pem.as_str()))
}

/// Load a private key PEM, decrypting it with `passphrase` if given.
///
/// Accepts PKCS#8 (plain or encrypted) and plaintext PKCS#1. Any failure is a
/// signing error because the key is only ever loaded to sign with it.
pub fn decode_private_key(pem: &SecretString, passphrase: Option<&str>) -> Result<RsaPrivateKey> {
    let pem = pem.expose_secret();

    let decoded = match passphrase {
        Some(passphrase) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes()),
        None if pem.contains(PKCS1_PEM_LABEL) => {
            return RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| {
                CertError::signing_with_source("Failed to load RSA private key", e)
            });
        }
        None => RsaPrivateKey::from_pkcs8_pem(pem),
    };

    decoded.map_err(|e| CertError::signing_with_source("Failed to decrypt CA private key", e))
}

/// Convert a key into an rcgen signing key (RSA PKCS#1 v1.5 with SHA-256).
pub fn signing_key_pair(key: &RsaPrivateKey) -> Result<rcgen::KeyPair> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CertError::key_generation_with_source("Failed to encode private key", e))?;

    rcgen::KeyPair::from_pem_and_sign_algo(pem.as_str(), &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| CertError::key_generation_with_source("Failed to load RSA signing key", e))
}

/// Big-endian modulus bytes without leading zeros.
pub(crate) fn modulus_bytes(key: &RsaPrivateKey) -> Vec<u8> {
    key.n().to_bytes_be()
}
