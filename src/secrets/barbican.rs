//! Barbican key manager client.
//!
//! Implements [`SecretStore`] against the Barbican v1 REST API:
//!
//! ```text
//! POST   /v1/secrets                        create_secret
//! GET    {secret_ref}/payload               get_secret_payload
//! DELETE {secret_ref}                       delete_secret
//! POST   /v1/containers                     store_container (type=certificate)
//! GET    {container_ref}                    get_container
//! POST   {container_ref}/consumers          register_consumer
//! DELETE {container_ref}/consumers          remove_consumer
//! DELETE {container_ref}                    delete_container
//! ```
//!
//! Secret and container references are the absolute URLs returned by the
//! store. A bare UUID is accepted too and resolved against the configured
//! endpoint, which keeps references written before they became URLs usable.

use super::store::{
    CertificateContainer, CertificateSecretRefs, ContainerConsumer, ContainerSlot, SecretStore,
};
use super::types::SecretString;
use crate::config::BarbicanConfig;
use crate::errors::{CertError, Result, StoreOperation};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use url::Url;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const PROJECT_ID_HEADER: &str = "X-Project-Id";

#[derive(Debug, Serialize)]
struct CreateSecretRequest<'a> {
    name: &'a str,
    payload: &'a str,
    payload_content_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretRefResponse {
    secret_ref: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretRefEntry {
    name: String,
    secret_ref: String,
}

#[derive(Debug, Serialize)]
struct CreateContainerRequest<'a> {
    #[serde(rename = "type")]
    container_type: &'static str,
    name: &'a str,
    secret_refs: Vec<SecretRefEntry>,
}

#[derive(Debug, Deserialize)]
struct ContainerRefResponse {
    container_ref: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConsumerEntry {
    name: String,
    #[serde(rename = "URL")]
    url: String,
}

#[derive(Debug, Deserialize)]
struct ContainerResponse {
    container_ref: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    secret_refs: Vec<SecretRefEntry>,
    #[serde(default)]
    consumers: Vec<ConsumerEntry>,
}

impl ContainerResponse {
    fn into_container(self, fallback_ref: &Url) -> CertificateContainer {
        let mut secret_refs = CertificateSecretRefs::default();
        for entry in self.secret_refs {
            match ContainerSlot::from_name(&entry.name) {
                Some(slot) => secret_refs.set(slot, entry.secret_ref),
                None => trace!(slot = %entry.name, "Ignoring unknown container secret slot"),
            }
        }

        CertificateContainer {
            container_ref: Some(self.container_ref.unwrap_or_else(|| fallback_ref.to_string())),
            name: self.name.unwrap_or_default(),
            secret_refs,
            consumers: self
                .consumers
                .into_iter()
                .map(|c| ContainerConsumer { name: c.name, url: c.url })
                .collect(),
        }
    }
}

/// REST client for a Barbican key manager.
#[derive(Clone)]
pub struct BarbicanClient {
    client: Client,
    endpoint: Url,
    auth_token: SecretString,
    project_id: Option<String>,
}

impl std::fmt::Debug for BarbicanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarbicanClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("project_id", &self.project_id)
            .field("auth_token", &self.auth_token)
            .finish()
    }
}

impl BarbicanClient {
    /// Create a client from configuration.
    ///
    /// Fails with `BackendUnavailable` when no auth token is configured, since
    /// every call would be rejected by the store.
    pub fn new(config: &BarbicanConfig) -> Result<Self> {
        let auth_token = config.auth_token.clone().ok_or_else(|| {
            CertError::backend_unavailable("No auth token configured for the Barbican endpoint")
        })?;

        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            CertError::config(format!("Invalid Barbican endpoint '{}': {}", config.endpoint, e))
        })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CertError::config(format!("Failed to build HTTP client: {}", e)))?;

        debug!(
            endpoint = %endpoint,
            region = ?config.region_name,
            project_id = ?config.project_id,
            "Initialized Barbican client"
        );

        Ok(Self { client, endpoint, auth_token, project_id: config.project_id.clone() })
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn collection_url(&self, collection: &str) -> Result<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/v1/{}", base, collection))
            .map_err(|e| CertError::config(format!("Invalid Barbican endpoint: {}", e)))
    }

    fn resolve(&self, collection: &str, reference: &str) -> Result<Url> {
        let reference = reference.trim();
        if uuid::Uuid::parse_str(reference).is_ok() {
            let base = self.collection_url(collection)?;
            return Url::parse(&format!("{}/{}", base, reference))
                .map_err(|e| CertError::validation(format!("Invalid reference: {}", e)));
        }

        Url::parse(reference).map_err(|e| {
            CertError::validation_field(
                format!("Reference '{}' is neither a URL nor a UUID: {}", reference, e),
                "reference",
            )
        })
    }

    /// Resolve a container reference (URL or bare UUID) to its URL.
    pub fn resolve_container_url(&self, reference: &str) -> Result<Url> {
        self.resolve("containers", reference)
    }

    /// Resolve a secret reference (URL or bare UUID) to its URL.
    pub fn resolve_secret_url(&self, reference: &str) -> Result<Url> {
        self.resolve("secrets", reference)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!("{} {}", method, url);
        let builder = self
            .client
            .request(method, url)
            .header(AUTH_TOKEN_HEADER, self.auth_token.expose_secret());

        match &self.project_id {
            Some(project_id) => builder.header(PROJECT_ID_HEADER, project_id),
            None => builder,
        }
    }

    async fn send(
        &self,
        operation: StoreOperation,
        reference: &str,
        builder: RequestBuilder,
    ) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            CertError::backend_unavailable_with_source(
                format!("{} request to the secret store failed", operation),
                e,
            )
        })?;

        let status = response.status();
        trace!(operation = %operation, status = %status, "Secret store response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|_| "<unable to read error>".to_string());
        Err(status_error(operation, reference, status, &body))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        operation: StoreOperation,
        response: Response,
    ) -> Result<T> {
        let body = response.text().await.map_err(|e| {
            CertError::backend_unavailable_with_source(
                format!("Failed to read {} response body", operation),
                e,
            )
        })?;

        serde_json::from_str(&body).map_err(|e| {
            CertError::serialization(e, format!("Unexpected {} response body", operation))
        })
    }
}

/// Translate a non-success HTTP status into an error kind.
pub(crate) fn status_error(
    operation: StoreOperation,
    reference: &str,
    status: StatusCode,
    body: &str,
) -> CertError {
    match status {
        StatusCode::NOT_FOUND => {
            let resource_type = match operation {
                StoreOperation::GetSecret | StoreOperation::DeleteSecret => "secret",
                StoreOperation::RemoveConsumer => "consumer registration",
                _ => "container",
            };
            CertError::not_found(resource_type, reference)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CertError::backend_unavailable(
            format!("Secret store refused credentials for {} ({})", operation, status),
        ),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            CertError::backend_unavailable(format!(
                "Secret store unavailable during {} ({})",
                operation, status
            ))
        }
        _ => {
            warn!(operation = %operation, status = %status, "Secret store rejected request");
            CertError::store_failure(operation, Some(status.as_u16()), body.trim().to_string())
        }
    }
}

#[async_trait]
impl SecretStore for BarbicanClient {
    async fn create_secret(
        &self,
        payload: &str,
        name: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let body = CreateSecretRequest {
            name,
            payload,
            payload_content_type: "text/plain",
            expiration: expiration.map(|e| e.to_rfc3339_opts(SecondsFormat::Secs, true)),
        };

        let url = self.collection_url("secrets")?;
        let response = self
            .send(StoreOperation::CreateSecret, name, self.request(Method::POST, url).json(&body))
            .await?;
        let created: SecretRefResponse =
            Self::read_json(StoreOperation::CreateSecret, response).await?;

        debug!(secret_ref = %created.secret_ref, name = %name, "Created secret");
        Ok(created.secret_ref)
    }

    async fn get_secret_payload(&self, secret_ref: &str) -> Result<String> {
        let secret_url = self.resolve_secret_url(secret_ref)?;
        let payload_url = Url::parse(&format!("{}/payload", secret_url.as_str().trim_end_matches('/')))
            .map_err(|e| CertError::validation(format!("Invalid secret reference: {}", e)))?;

        let response = self
            .send(
                StoreOperation::GetSecret,
                secret_ref,
                self.request(Method::GET, payload_url).header(header::ACCEPT, "text/plain"),
            )
            .await?;

        response.text().await.map_err(|e| {
            CertError::backend_unavailable_with_source("Failed to read secret payload", e)
        })
    }

    async fn delete_secret(&self, secret_ref: &str) -> Result<()> {
        let url = self.resolve_secret_url(secret_ref)?;
        self.send(StoreOperation::DeleteSecret, secret_ref, self.request(Method::DELETE, url))
            .await?;
        debug!(secret_ref = %secret_ref, "Deleted secret");
        Ok(())
    }

    async fn store_container(&self, container: &CertificateContainer) -> Result<String> {
        let body = CreateContainerRequest {
            container_type: "certificate",
            name: &container.name,
            secret_refs: container
                .secret_refs
                .iter()
                .map(|(slot, secret_ref)| SecretRefEntry {
                    name: slot.as_str().to_string(),
                    secret_ref: secret_ref.to_string(),
                })
                .collect(),
        };

        let url = self.collection_url("containers")?;
        let response = self
            .send(
                StoreOperation::StoreContainer,
                &container.name,
                self.request(Method::POST, url).json(&body),
            )
            .await?;
        let stored: ContainerRefResponse =
            Self::read_json(StoreOperation::StoreContainer, response).await?;

        debug!(container_ref = %stored.container_ref, name = %container.name, "Stored container");
        Ok(stored.container_ref)
    }

    async fn get_container(&self, container_ref: &str) -> Result<CertificateContainer> {
        let url = self.resolve_container_url(container_ref)?;
        let response = self
            .send(
                StoreOperation::GetContainer,
                container_ref,
                self.request(Method::GET, url.clone()).header(header::ACCEPT, "application/json"),
            )
            .await?;
        let container: ContainerResponse =
            Self::read_json(StoreOperation::GetContainer, response).await?;
        Ok(container.into_container(&url))
    }

    async fn register_consumer(
        &self,
        container_ref: &str,
        url: &str,
        name: &str,
    ) -> Result<CertificateContainer> {
        let container_url = self.resolve_container_url(container_ref)?;
        let consumers_url =
            Url::parse(&format!("{}/consumers", container_url.as_str().trim_end_matches('/')))
                .map_err(|e| CertError::validation(format!("Invalid container reference: {}", e)))?;

        let body = ConsumerEntry { name: name.to_string(), url: url.to_string() };
        let response = self
            .send(
                StoreOperation::RegisterConsumer,
                container_ref,
                self.request(Method::POST, consumers_url).json(&body),
            )
            .await?;
        let container: ContainerResponse =
            Self::read_json(StoreOperation::RegisterConsumer, response).await?;

        debug!(container_ref = %container_ref, consumer = %name, "Registered consumer");
        Ok(container.into_container(&container_url))
    }

    async fn remove_consumer(&self, container_ref: &str, url: &str, name: &str) -> Result<()> {
        let container_url = self.resolve_container_url(container_ref)?;
        let consumers_url =
            Url::parse(&format!("{}/consumers", container_url.as_str().trim_end_matches('/')))
                .map_err(|e| CertError::validation(format!("Invalid container reference: {}", e)))?;

        let body = ConsumerEntry { name: name.to_string(), url: url.to_string() };
        self.send(
            StoreOperation::RemoveConsumer,
            container_ref,
            self.request(Method::DELETE, consumers_url).json(&body),
        )
        .await?;

        debug!(container_ref = %container_ref, consumer = %name, "Removed consumer");
        Ok(())
    }

    async fn delete_container(&self, container_ref: &str) -> Result<()> {
        let url = self.resolve_container_url(container_ref)?;
        self.send(StoreOperation::DeleteContainer, container_ref, self.request(Method::DELETE, url))
            .await?;
        debug!(container_ref = %container_ref, "Deleted container");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BarbicanConfig {
        BarbicanConfig {
            endpoint: "http://kms.example.com:9311/".to_string(),
            auth_token: Some(SecretString::new("token")),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_requires_auth_token() {
        let config = BarbicanConfig { auth_token: None, ..config() };
        let err = BarbicanClient::new(&config).unwrap_err();
        assert!(matches!(err, CertError::BackendUnavailable { .. }));
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = BarbicanClient::new(&config()).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"token\""));
    }

    #[test]
    fn test_resolve_bare_uuid_reference() {
        let client = BarbicanClient::new(&config()).unwrap();
        let url = client.resolve_container_url("0b5a4c4e-9a3f-4c1e-8d0e-0f1f2a3b4c5d").unwrap();
        assert_eq!(
            url.as_str(),
            "http://kms.example.com:9311/v1/containers/0b5a4c4e-9a3f-4c1e-8d0e-0f1f2a3b4c5d"
        );
    }

    #[test]
    fn test_resolve_url_reference_is_kept() {
        let client = BarbicanClient::new(&config()).unwrap();
        let reference = "https://other-kms/v1/containers/abc";
        assert_eq!(client.resolve_container_url(reference).unwrap().as_str(), reference);
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        let client = BarbicanClient::new(&config()).unwrap();
        let err = client.resolve_secret_url("not a reference").unwrap_err();
        assert!(matches!(err, CertError::Validation { .. }));
    }

    #[test]
    fn test_status_error_mapping() {
        let op = StoreOperation::GetContainer;
        assert!(status_error(op, "r", StatusCode::NOT_FOUND, "").is_not_found());
        assert!(matches!(
            status_error(op, "r", StatusCode::UNAUTHORIZED, ""),
            CertError::BackendUnavailable { .. }
        ));
        assert!(matches!(
            status_error(op, "r", StatusCode::SERVICE_UNAVAILABLE, ""),
            CertError::BackendUnavailable { .. }
        ));
        match status_error(StoreOperation::StoreContainer, "r", StatusCode::BAD_REQUEST, " bad ")
        {
            CertError::StoreFailure { operation, status, message } => {
                assert_eq!(operation, StoreOperation::StoreContainer);
                assert_eq!(status, Some(400));
                assert_eq!(message, "bad");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_container_response_maps_slots() {
        let json = serde_json::json!({
            "container_ref": "http://kms/v1/containers/c1",
            "name": "bay-ca",
            "type": "certificate",
            "secret_refs": [
                {"name": "certificate", "secret_ref": "http://kms/v1/secrets/s1"},
                {"name": "private_key", "secret_ref": "http://kms/v1/secrets/s2"},
                {"name": "public_key", "secret_ref": "http://kms/v1/secrets/s3"}
            ],
            "consumers": [{"name": "conductor", "URL": "cluster-1"}]
        });
        let response: ContainerResponse = serde_json::from_value(json).unwrap();
        let fallback = Url::parse("http://kms/v1/containers/fallback").unwrap();
        let container = response.into_container(&fallback);

        assert_eq!(container.container_ref.as_deref(), Some("http://kms/v1/containers/c1"));
        assert_eq!(container.secret_refs.len(), 2);
        assert_eq!(container.secret_refs.intermediates, None);
        assert_eq!(
            container.consumers,
            vec![ContainerConsumer { name: "conductor".into(), url: "cluster-1".into() }]
        );
    }
}
