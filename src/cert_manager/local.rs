//! Certificate manager storing bundles as files.
//!
//! A bundle with reference `<uuid>` lives in the storage directory as
//!
//! ```text
//! <uuid>.crt             certificate
//! <uuid>.key             private key (mode 0600 on unix)
//! <uuid>.int             intermediates, optional
//! <uuid>.pass            private key passphrase, optional (mode 0600 on unix)
//! <uuid>.consumers.json  registered consumers
//! ```
//!
//! This store owns its deletion policy: releasing the last consumer removes
//! the bundle's files.

use super::{CertBundle, CertManager, CertPurge, CertRef, Consumer};
use crate::config::CertManagerType;
use crate::errors::{CertError, Result};
use crate::secrets::SecretString;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const CERTIFICATE_EXT: &str = "crt";
const PRIVATE_KEY_EXT: &str = "key";
const INTERMEDIATES_EXT: &str = "int";
const PASSPHRASE_EXT: &str = "pass";
const CONSUMERS_EXT: &str = "consumers.json";

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| CertError::io(e, format!("Failed to restrict {}", path.display())))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Stores certificate bundles under a directory.
#[derive(Debug)]
pub struct LocalCertManager {
    storage_path: PathBuf,
    // serializes read-modify-write of consumer files
    consumers_lock: Mutex<()>,
}

impl LocalCertManager {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self { storage_path: storage_path.into(), consumers_lock: Mutex::new(()) }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn path(&self, id: &Uuid, extension: &str) -> PathBuf {
        self.storage_path.join(format!("{}.{}", id, extension))
    }

    /// References of this backend are bare UUIDs, which also keeps them from
    /// naming paths outside the storage directory.
    fn parse_reference(reference: &CertRef) -> Result<Uuid> {
        Uuid::parse_str(reference.as_str()).map_err(|_| {
            CertError::validation_field(
                format!("'{}' is not a local certificate reference", reference),
                "reference",
            )
        })
    }

    async fn write_file(path: &Path, contents: &str, private: bool) -> Result<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| CertError::io(e, format!("Failed to write {}", path.display())))?;

        if private {
            restrict_permissions(path).await?;
        }
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CertError::io(e, format!("Failed to read {}", path.display()))),
        }
    }

    async fn read_required(path: &Path, reference: &CertRef) -> Result<String> {
        Self::read_optional(path)
            .await?
            .ok_or_else(|| CertError::not_found("certificate", reference.as_str()))
    }

    async fn remove_optional(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CertError::io(e, format!("Failed to remove {}", path.display()))),
        }
    }

    async fn load_consumers(&self, id: &Uuid) -> Result<Vec<Consumer>> {
        let path = self.path(id, CONSUMERS_EXT);
        match Self::read_optional(&path).await? {
            Some(contents) => serde_json::from_str(&contents).map_err(|e| {
                CertError::serialization(e, format!("Corrupt consumer file {}", path.display()))
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save_consumers(&self, id: &Uuid, consumers: &[Consumer]) -> Result<()> {
        let contents = serde_json::to_string_pretty(consumers)?;
        Self::write_file(&self.path(id, CONSUMERS_EXT), &contents, false).await
    }

    async fn exists(&self, id: &Uuid) -> Result<bool> {
        tokio::fs::try_exists(self.path(id, CERTIFICATE_EXT))
            .await
            .map_err(|e| CertError::io(e, "Failed to stat certificate file"))
    }

    /// Remove every file of a bundle. Returns which of the certificate and
    /// key files were present.
    ///
    /// A failed removal does not stop the remaining ones; the first failure
    /// is returned once every file has been attempted.
    async fn remove_files(&self, id: &Uuid) -> Result<(bool, bool)> {
        let mut removed = [false; 2];
        let mut first_error = None;

        let extensions =
            [CERTIFICATE_EXT, PRIVATE_KEY_EXT, INTERMEDIATES_EXT, PASSPHRASE_EXT, CONSUMERS_EXT];
        for (index, extension) in extensions.into_iter().enumerate() {
            match Self::remove_optional(&self.path(id, extension)).await {
                Ok(present) => {
                    if let Some(slot) = removed.get_mut(index) {
                        *slot = present;
                    }
                }
                Err(e) => {
                    warn!(file = extension, error = %e, "Failed to remove certificate file");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok((removed[0], removed[1])),
        }
    }
}

#[async_trait]
impl CertManager for LocalCertManager {
    #[instrument(skip(self, certificate, private_key, intermediates, private_key_passphrase), fields(name = %name))]
    async fn store_cert(
        &self,
        certificate: &str,
        private_key: &SecretString,
        intermediates: Option<&str>,
        private_key_passphrase: Option<&SecretString>,
        name: &str,
    ) -> Result<CertRef> {
        tokio::fs::create_dir_all(&self.storage_path).await.map_err(|e| {
            CertError::io(e, format!("Failed to create {}", self.storage_path.display()))
        })?;

        let id = Uuid::new_v4();
        let files = [
            (CERTIFICATE_EXT, Some(certificate), false),
            (PRIVATE_KEY_EXT, Some(private_key.expose_secret()), true),
            (INTERMEDIATES_EXT, intermediates, false),
            (PASSPHRASE_EXT, private_key_passphrase.map(|p| p.expose_secret()), true),
        ];

        let mut written = Vec::new();
        for (extension, contents, private) in files {
            let Some(contents) = contents else { continue };
            let path = self.path(&id, extension);
            if let Err(e) = Self::write_file(&path, contents, private).await {
                error!(error = %e, written = written.len(), "Failed to store certificate, removing written files");
                // the failed write may have created the file
                written.push(path);
                for path in &written {
                    if let Err(cleanup) = Self::remove_optional(path).await {
                        warn!(path = %path.display(), error = %cleanup, "Failed to remove file during rollback");
                    }
                }
                return Err(e);
            }
            written.push(path);
        }

        let reference = CertRef::new(id.to_string())?;
        info!(cert_ref = %reference, "Stored certificate");
        Ok(reference)
    }

    #[instrument(skip(self), fields(cert_ref = %reference))]
    async fn get_cert(
        &self,
        reference: &CertRef,
        consumer: Option<&Consumer>,
        check_only: bool,
    ) -> Result<CertBundle> {
        let id = Self::parse_reference(reference)?;
        let registering = consumer.filter(|_| !check_only);

        // held until the registration is written; releases wait on it
        let _guard = match registering {
            Some(_) => {
                let guard = self.consumers_lock.lock().await;
                if !self.exists(&id).await? {
                    return Err(CertError::not_found("certificate", reference.as_str()));
                }
                Some(guard)
            }
            None => None,
        };

        let certificate = Self::read_required(&self.path(&id, CERTIFICATE_EXT), reference).await?;
        let private_key = Self::read_required(&self.path(&id, PRIVATE_KEY_EXT), reference).await?;
        let intermediates = Self::read_optional(&self.path(&id, INTERMEDIATES_EXT)).await?;
        let passphrase = Self::read_optional(&self.path(&id, PASSPHRASE_EXT)).await?;

        if let Some(consumer) = registering {
            let mut consumers = self.load_consumers(&id).await?;
            if !consumers.contains(consumer) {
                consumers.push(consumer.clone());
                self.save_consumers(&id, &consumers).await?;
                debug!(consumer = %consumer, "Registered consumer");
            }
        }

        Ok(CertBundle::new(
            Some(certificate),
            Some(SecretString::new(private_key)),
            intermediates,
            passphrase.map(SecretString::new),
        ))
    }

    #[instrument(skip(self), fields(cert_ref = %reference))]
    async fn delete_cert(&self, reference: &CertRef, consumer: Option<&Consumer>) -> Result<()> {
        let id = Self::parse_reference(reference)?;
        let consumer = consumer.ok_or_else(|| {
            CertError::validation_field(
                "A consumer is required to release a stored certificate",
                "consumer",
            )
        })?;

        let _guard = self.consumers_lock.lock().await;
        if !self.exists(&id).await? {
            return Err(CertError::not_found("certificate", reference.as_str()));
        }

        let mut consumers = self.load_consumers(&id).await?;
        let before = consumers.len();
        consumers.retain(|c| c != consumer);
        if consumers.len() == before {
            return Err(CertError::not_found(
                "consumer registration",
                format!("{} ({})", reference, consumer),
            ));
        }

        if consumers.is_empty() {
            self.remove_files(&id).await?;
            info!("Released last consumer, removed certificate files");
        } else {
            self.save_consumers(&id, &consumers).await?;
            info!(remaining = consumers.len(), "Released certificate");
        }
        Ok(())
    }

    fn backend_type(&self) -> CertManagerType {
        CertManagerType::Local
    }
}

#[async_trait]
impl CertPurge for LocalCertManager {
    #[instrument(skip(self), fields(cert_ref = %reference))]
    async fn hard_delete(&self, reference: &CertRef) -> Result<()> {
        let id = Self::parse_reference(reference)?;
        let _guard = self.consumers_lock.lock().await;

        let (certificate, private_key) = self.remove_files(&id).await?;
        if !(certificate && private_key) {
            return Err(CertError::not_found("certificate", reference.as_str()));
        }
        info!("Deleted certificate files");
        Ok(())
    }
}
