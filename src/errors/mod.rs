//! # Error Handling
//!
//! Error kinds for certificate issuance and storage, built on `thiserror`.
//! Cryptographic and validation errors propagate unchanged to callers; callers
//! translate kinds into protocol responses.

pub mod types;

pub use types::{CertError, Result, StoreOperation};
