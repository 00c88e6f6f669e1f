//! In-process secret store.
//!
//! Keeps secrets, containers and consumer registrations in memory. Every call
//! is recorded in a journal, and a failure can be queued for the next call of
//! a given operation, which is how manager behaviour around partial failures
//! is exercised without a live key manager.

use super::store::{CertificateContainer, CertificateSecretRefs, ContainerConsumer, SecretStore};
use crate::errors::{CertError, Result, StoreOperation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const SECRET_PREFIX: &str = "memory://secrets/";
const CONTAINER_PREFIX: &str = "memory://containers/";

/// One recorded call against the store. Payloads are not recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    CreateSecret { name: String },
    GetSecret { secret_ref: String },
    DeleteSecret { secret_ref: String },
    CreateContainer { name: String },
    StoreContainer { name: String },
    GetContainer { container_ref: String },
    RegisterConsumer { container_ref: String, url: String, name: String },
    RemoveConsumer { container_ref: String, url: String, name: String },
    DeleteContainer { container_ref: String },
}

impl StoreCall {
    pub fn operation(&self) -> StoreOperation {
        match self {
            Self::CreateSecret { .. } => StoreOperation::CreateSecret,
            Self::GetSecret { .. } => StoreOperation::GetSecret,
            Self::DeleteSecret { .. } => StoreOperation::DeleteSecret,
            Self::CreateContainer { .. } => StoreOperation::CreateContainer,
            Self::StoreContainer { .. } => StoreOperation::StoreContainer,
            Self::GetContainer { .. } => StoreOperation::GetContainer,
            Self::RegisterConsumer { .. } => StoreOperation::RegisterConsumer,
            Self::RemoveConsumer { .. } => StoreOperation::RemoveConsumer,
            Self::DeleteContainer { .. } => StoreOperation::DeleteContainer,
        }
    }
}

/// Failure to return from the next call of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    /// `BackendUnavailable`
    Unavailable,
    /// `StoreFailure` with the given HTTP-like status
    Rejected(u16),
    /// `NotFound`
    Missing,
}

impl InjectedFailure {
    fn into_error(self, operation: StoreOperation, subject: &str) -> CertError {
        match self {
            Self::Unavailable => {
                CertError::backend_unavailable(format!("injected outage during {}", operation))
            }
            Self::Rejected(status) => CertError::store_failure(
                operation,
                Some(status),
                format!("injected rejection of {}", subject),
            ),
            Self::Missing => CertError::not_found(operation.as_str(), subject),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredSecret {
    payload: String,
    expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    secrets: HashMap<String, StoredSecret>,
    containers: HashMap<String, CertificateContainer>,
    calls: Vec<StoreCall>,
    // `None` lets one call through
    failures: HashMap<StoreOperation, VecDeque<Option<InjectedFailure>>>,
}

impl State {
    /// Journal the call, then pop a queued failure for its operation.
    fn enter(&mut self, call: StoreCall, subject: &str) -> Result<()> {
        let operation = call.operation();
        self.calls.push(call);

        match self.failures.get_mut(&operation).and_then(VecDeque::pop_front).flatten() {
            Some(failure) => Err(failure.into_error(operation, subject)),
            None => Ok(()),
        }
    }

    fn container_mut(&mut self, container_ref: &str) -> Result<&mut CertificateContainer> {
        self.containers
            .get_mut(container_ref)
            .ok_or_else(|| CertError::not_found("container", container_ref))
    }
}

/// Secret store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    state: Mutex<State>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` fail. Failures queue in order.
    pub async fn fail_next(&self, operation: StoreOperation, failure: InjectedFailure) {
        self.state.lock().await.failures.entry(operation).or_default().push_back(Some(failure));
    }

    /// Let `skip` calls of `operation` succeed, then fail the one after.
    pub async fn fail_after(
        &self,
        operation: StoreOperation,
        skip: usize,
        failure: InjectedFailure,
    ) {
        let mut state = self.state.lock().await;
        let queue = state.failures.entry(operation).or_default();
        queue.extend(std::iter::repeat_with(|| None).take(skip));
        queue.push_back(Some(failure));
    }

    /// Every call made so far, oldest first.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of recorded calls of `operation`.
    pub async fn call_count(&self, operation: StoreOperation) -> usize {
        self.state.lock().await.calls.iter().filter(|c| c.operation() == operation).count()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    pub async fn secret_count(&self) -> usize {
        self.state.lock().await.secrets.len()
    }

    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    pub async fn contains_secret(&self, secret_ref: &str) -> bool {
        self.state.lock().await.secrets.contains_key(secret_ref)
    }

    /// Expiration recorded for a secret, `None` if absent or never expiring.
    pub async fn secret_expiration(&self, secret_ref: &str) -> Option<DateTime<Utc>> {
        self.state.lock().await.secrets.get(secret_ref).and_then(|s| s.expiration)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn create_secret(
        &self,
        payload: &str,
        name: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::CreateSecret { name: name.to_string() }, name)?;

        let secret_ref = format!("{}{}", SECRET_PREFIX, Uuid::new_v4());
        state
            .secrets
            .insert(secret_ref.clone(), StoredSecret { payload: payload.to_string(), expiration });
        debug!(secret_ref = %secret_ref, name = %name, "Created in-memory secret");
        Ok(secret_ref)
    }

    async fn get_secret_payload(&self, secret_ref: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::GetSecret { secret_ref: secret_ref.to_string() }, secret_ref)?;

        state
            .secrets
            .get(secret_ref)
            .map(|s| s.payload.clone())
            .ok_or_else(|| CertError::not_found("secret", secret_ref))
    }

    async fn delete_secret(&self, secret_ref: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::DeleteSecret { secret_ref: secret_ref.to_string() }, secret_ref)?;

        state
            .secrets
            .remove(secret_ref)
            .map(|_| ())
            .ok_or_else(|| CertError::not_found("secret", secret_ref))
    }

    async fn create_certificate_container(
        &self,
        name: &str,
        secret_refs: CertificateSecretRefs,
    ) -> Result<CertificateContainer> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::CreateContainer { name: name.to_string() }, name)?;

        if let Some((slot, missing)) =
            secret_refs.iter().find(|(_, secret_ref)| !state.secrets.contains_key(*secret_ref))
        {
            return Err(CertError::store_failure(
                StoreOperation::CreateContainer,
                Some(400),
                format!("{} references unknown secret {}", slot, missing),
            ));
        }

        CertificateContainer::new(name, secret_refs)
    }

    async fn store_container(&self, container: &CertificateContainer) -> Result<String> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::StoreContainer { name: container.name.clone() }, &container.name)?;

        let container_ref = format!("{}{}", CONTAINER_PREFIX, Uuid::new_v4());
        let mut stored = container.clone();
        stored.container_ref = Some(container_ref.clone());
        state.containers.insert(container_ref.clone(), stored);
        debug!(container_ref = %container_ref, name = %container.name, "Stored in-memory container");
        Ok(container_ref)
    }

    async fn get_container(&self, container_ref: &str) -> Result<CertificateContainer> {
        let mut state = self.state.lock().await;
        state.enter(
            StoreCall::GetContainer { container_ref: container_ref.to_string() },
            container_ref,
        )?;

        state.container_mut(container_ref).map(|c| c.clone())
    }

    async fn register_consumer(
        &self,
        container_ref: &str,
        url: &str,
        name: &str,
    ) -> Result<CertificateContainer> {
        let mut state = self.state.lock().await;
        state.enter(
            StoreCall::RegisterConsumer {
                container_ref: container_ref.to_string(),
                url: url.to_string(),
                name: name.to_string(),
            },
            container_ref,
        )?;

        let container = state.container_mut(container_ref)?;
        let consumer = ContainerConsumer { name: name.to_string(), url: url.to_string() };
        if !container.consumers.contains(&consumer) {
            container.consumers.push(consumer);
        }
        Ok(container.clone())
    }

    async fn remove_consumer(&self, container_ref: &str, url: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(
            StoreCall::RemoveConsumer {
                container_ref: container_ref.to_string(),
                url: url.to_string(),
                name: name.to_string(),
            },
            container_ref,
        )?;

        let container = state.container_mut(container_ref)?;
        let before = container.consumers.len();
        container.consumers.retain(|c| !(c.name == name && c.url == url));
        if container.consumers.len() == before {
            return Err(CertError::not_found(
                "consumer registration",
                format!("{} ({}, {})", container_ref, url, name),
            ));
        }
        Ok(())
    }

    async fn delete_container(&self, container_ref: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(
            StoreCall::DeleteContainer { container_ref: container_ref.to_string() },
            container_ref,
        )?;

        state
            .containers
            .remove(container_ref)
            .map(|_| ())
            .ok_or_else(|| CertError::not_found("container", container_ref))
    }
}
