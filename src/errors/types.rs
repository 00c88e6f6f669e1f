//! # Error Types
//!
//! Error kinds surfaced by certificate issuance and certificate storage.

use std::fmt;

/// Custom result type for certificate operations
pub type Result<T> = std::result::Result<T, CertError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for certificate issuance and storage
#[derive(thiserror::Error, Debug)]
pub enum CertError {
    /// Malformed subject/issuer names, references or CSRs
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Key generation or key encoding failed
    #[error("Key generation failed: {message}")]
    KeyGeneration {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Signing failed, including an undecryptable CA key
    #[error("Signing failed: {message}")]
    Signing {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Transport or authentication failure reaching the secret store
    #[error("Secret store unavailable: {message}")]
    BackendUnavailable {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Reference, secret or consumer registration absent
    #[error("Not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// The secret store rejected an operation
    #[error("Secret store rejected {operation}: {message}")]
    StoreFailure { operation: StoreOperation, status: Option<u16>, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },
}

/// Secret store operations, used to label store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CreateSecret,
    GetSecret,
    DeleteSecret,
    CreateContainer,
    StoreContainer,
    GetContainer,
    RegisterConsumer,
    RemoveConsumer,
    DeleteContainer,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSecret => "create_secret",
            Self::GetSecret => "get_secret",
            Self::DeleteSecret => "delete_secret",
            Self::CreateContainer => "create_container",
            Self::StoreContainer => "store_container",
            Self::GetContainer => "get_container",
            Self::RegisterConsumer => "register_consumer",
            Self::RemoveConsumer => "remove_consumer",
            Self::DeleteContainer => "delete_container",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CertError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a key generation error
    pub fn key_generation<S: Into<String>>(message: S) -> Self {
        Self::KeyGeneration { message: message.into(), source: None }
    }

    /// Create a key generation error with source
    pub fn key_generation_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::KeyGeneration { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a signing error
    pub fn signing<S: Into<String>>(message: S) -> Self {
        Self::Signing { message: message.into(), source: None }
    }

    /// Create a signing error with source
    pub fn signing_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Signing { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable<S: Into<String>>(message: S) -> Self {
        Self::BackendUnavailable { message: message.into(), source: None }
    }

    /// Create a backend unavailable error with source
    pub fn backend_unavailable_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BackendUnavailable { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a store failure error
    pub fn store_failure<S: Into<String>>(
        operation: StoreOperation,
        status: Option<u16>,
        message: S,
    ) -> Self {
        Self::StoreFailure { operation, status, message: message.into() }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Create a serialization error with context
    pub fn serialization<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// Whether this error reports an absent reference, secret or registration
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short, stable name of the error kind for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::KeyGeneration { .. } => "key_generation",
            Self::Signing { .. } => "signing",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::NotFound { .. } => "not_found",
            Self::StoreFailure { .. } => "store_failure",
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
        }
    }
}

impl From<std::io::Error> for CertError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for CertError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for CertError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}
