//! Stored certificate references.

use crate::errors::{CertError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest reference a cluster record can hold.
pub const MAX_CERT_REF_LEN: usize = 512;

/// Opaque reference to a stored certificate bundle.
///
/// Usually a store URL; legacy rows hold bare UUIDs. Non-empty and at most
/// [`MAX_CERT_REF_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CertRef(String);

impl CertRef {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CertError::validation_field(
                "Certificate reference cannot be empty",
                "reference",
            ));
        }
        if value.len() > MAX_CERT_REF_LEN {
            return Err(CertError::validation_field(
                format!("Certificate reference exceeds {} bytes", MAX_CERT_REF_LEN),
                "reference",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Whether the reference is a bare UUID rather than a URL.
    pub fn is_legacy_uuid(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }
}

impl fmt::Display for CertRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CertRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CertRef {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CertRef {
    type Error = CertError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CertRef> for String {
    fn from(reference: CertRef) -> Self {
        reference.0
    }
}
