use cluster_certs::cert_manager::{
    BarbicanCertManager, CertManager, CertManagerHandle, CertPurge, CertRef, Consumer,
};
use cluster_certs::errors::StoreOperation;
use cluster_certs::secrets::{
    CertificateSecretRefs, ContainerSlot, InMemorySecretStore, InjectedFailure, SecretStore,
    SecretString, StoreCall,
};
use cluster_certs::CertError;
use std::sync::Arc;

const CERTIFICATE: &str = "My Certificate";
const PRIVATE_KEY: &str = "My Private Key";
const INTERMEDIATES: &str = "My Intermediates";
const PASSPHRASE: &str = "My Private Key Passphrase";
const NAME: &str = "My Fancy Cert";

fn setup() -> (Arc<InMemorySecretStore>, BarbicanCertManager) {
    let store = Arc::new(InMemorySecretStore::new());
    let manager = BarbicanCertManager::new(store.clone(), None);
    (store, manager)
}

async fn store_full(manager: &BarbicanCertManager) -> cluster_certs::Result<CertRef> {
    manager
        .store_cert(
            CERTIFICATE,
            &SecretString::new(PRIVATE_KEY),
            Some(INTERMEDIATES),
            Some(&SecretString::new(PASSPHRASE)),
            NAME,
        )
        .await
}

fn consumer() -> Consumer {
    Consumer::new("http://conductor/v1/clusters/1", "cluster-certs")
}

#[tokio::test]
async fn store_creates_four_secrets_and_one_container() {
    let (store, manager) = setup();
    store_full(&manager).await.unwrap();

    assert_eq!(store.call_count(StoreOperation::CreateSecret).await, 4);
    assert_eq!(store.call_count(StoreOperation::CreateContainer).await, 1);
    assert_eq!(store.call_count(StoreOperation::StoreContainer).await, 1);
    assert_eq!(store.secret_count().await, 4);
    assert_eq!(store.container_count().await, 1);
}

#[tokio::test]
async fn stored_bundle_round_trips() {
    let (_store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();

    let bundle = manager.get_cert(&reference, Some(&consumer()), false).await.unwrap();
    assert_eq!(bundle.certificate(), Some(CERTIFICATE));
    assert_eq!(bundle.private_key().map(|k| k.expose_secret()), Some(PRIVATE_KEY));
    assert_eq!(bundle.intermediates(), Some(INTERMEDIATES));
    assert_eq!(bundle.private_key_passphrase().map(|p| p.expose_secret()), Some(PASSPHRASE));
}

#[tokio::test]
async fn absent_fields_read_back_as_none() {
    let (store, manager) = setup();
    let reference = manager
        .store_cert(CERTIFICATE, &SecretString::new(PRIVATE_KEY), None, None, NAME)
        .await
        .unwrap();
    assert_eq!(store.secret_count().await, 2);

    let bundle = manager.get_cert(&reference, None, true).await.unwrap();
    assert_eq!(bundle.certificate(), Some(CERTIFICATE));
    assert_eq!(bundle.intermediates(), None);
    assert!(bundle.private_key_passphrase().is_none());
}

#[tokio::test]
async fn empty_container_reads_back_as_all_none() {
    let (store, manager) = setup();
    let container = store
        .create_certificate_container("empty", CertificateSecretRefs::default())
        .await
        .unwrap();
    let reference = CertRef::new(store.store_container(&container).await.unwrap()).unwrap();

    let bundle = manager.get_cert(&reference, None, true).await.unwrap();
    assert_eq!(bundle.certificate(), None);
    assert!(bundle.private_key().is_none());
    assert_eq!(bundle.intermediates(), None);
    assert!(bundle.private_key_passphrase().is_none());
}

#[tokio::test]
async fn failed_container_store_deletes_every_created_secret() {
    let (store, manager) = setup();
    store.fail_next(StoreOperation::StoreContainer, InjectedFailure::Rejected(500)).await;

    let err = store_full(&manager).await.unwrap_err();
    assert!(matches!(
        err,
        CertError::StoreFailure { operation: StoreOperation::StoreContainer, status: Some(500), .. }
    ));

    assert_eq!(store.call_count(StoreOperation::DeleteSecret).await, 4);
    assert_eq!(store.secret_count().await, 0);
    assert_eq!(store.container_count().await, 0);
}

#[tokio::test]
async fn failed_container_create_deletes_every_created_secret() {
    let (store, manager) = setup();
    store.fail_next(StoreOperation::CreateContainer, InjectedFailure::Unavailable).await;

    let err = store_full(&manager).await.unwrap_err();
    assert!(matches!(err, CertError::BackendUnavailable { .. }));
    assert_eq!(store.call_count(StoreOperation::DeleteSecret).await, 4);
    assert_eq!(store.call_count(StoreOperation::StoreContainer).await, 0);
    assert_eq!(store.secret_count().await, 0);
}

#[tokio::test]
async fn failed_first_secret_leaves_nothing_to_delete() {
    let (store, manager) = setup();
    store.fail_next(StoreOperation::CreateSecret, InjectedFailure::Rejected(413)).await;

    let err = store_full(&manager).await.unwrap_err();
    assert!(matches!(err, CertError::StoreFailure { status: Some(413), .. }));
    assert_eq!(store.call_count(StoreOperation::DeleteSecret).await, 0);
    assert_eq!(store.call_count(StoreOperation::CreateContainer).await, 0);
    assert_eq!(store.secret_count().await, 0);
}

#[tokio::test]
async fn failed_secret_creation_deletes_only_the_secrets_before_it() {
    let (store, manager) = setup();
    manager
        .store_cert(CERTIFICATE, &SecretString::new(PRIVATE_KEY), None, None, "first")
        .await
        .unwrap();
    store.clear_calls().await;

    // certificate and private key succeed, intermediates fails
    let failing = Arc::new(FailOnNthCreate::new(store.clone(), 3));
    let manager = BarbicanCertManager::new(failing, None);
    let err = store_full(&manager).await.unwrap_err();
    assert!(matches!(err, CertError::StoreFailure { operation: StoreOperation::CreateSecret, .. }));

    assert_eq!(store.call_count(StoreOperation::DeleteSecret).await, 2);
    assert_eq!(store.secret_count().await, 2, "only the first bundle's secrets remain");
}

#[tokio::test]
async fn cleanup_failure_does_not_replace_the_original_error() {
    let (store, manager) = setup();
    store.fail_next(StoreOperation::StoreContainer, InjectedFailure::Rejected(400)).await;
    store.fail_next(StoreOperation::DeleteSecret, InjectedFailure::Unavailable).await;

    let err = store_full(&manager).await.unwrap_err();
    assert!(matches!(err, CertError::StoreFailure { status: Some(400), .. }), "got {err:?}");

    // every deletion is still attempted
    assert_eq!(store.call_count(StoreOperation::DeleteSecret).await, 4);
    assert_eq!(store.secret_count().await, 1);
}

#[tokio::test]
async fn get_cert_registers_consumer_exactly_once() {
    let (store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();
    store.clear_calls().await;

    manager.get_cert(&reference, Some(&consumer()), false).await.unwrap();

    let registrations: Vec<_> = store
        .calls()
        .await
        .into_iter()
        .filter(|call| matches!(call, StoreCall::RegisterConsumer { .. }))
        .collect();
    assert_eq!(
        registrations,
        vec![StoreCall::RegisterConsumer {
            container_ref: reference.to_string(),
            url: consumer().resource_ref,
            name: consumer().service_name,
        }]
    );
    assert_eq!(store.call_count(StoreOperation::GetContainer).await, 0);
}

#[tokio::test]
async fn check_only_does_not_register() {
    let (store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();
    store.clear_calls().await;

    let bundle = manager.get_cert(&reference, Some(&consumer()), true).await.unwrap();
    assert_eq!(bundle.certificate(), Some(CERTIFICATE));
    assert_eq!(store.call_count(StoreOperation::RegisterConsumer).await, 0);
    assert_eq!(store.call_count(StoreOperation::GetContainer).await, 1);
}

#[tokio::test]
async fn repeated_registration_is_idempotent() {
    let (store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();

    manager.get_cert(&reference, Some(&consumer()), false).await.unwrap();
    manager.get_cert(&reference, Some(&consumer()), false).await.unwrap();

    let container = store.get_container(reference.as_str()).await.unwrap();
    assert_eq!(container.consumers.len(), 1);
}

#[tokio::test]
async fn delete_cert_removes_consumer_without_deleting_secrets() {
    let (store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();
    manager.get_cert(&reference, Some(&consumer()), false).await.unwrap();
    store.clear_calls().await;

    manager.delete_cert(&reference, Some(&consumer())).await.unwrap();

    assert_eq!(
        store.calls().await,
        vec![StoreCall::RemoveConsumer {
            container_ref: reference.to_string(),
            url: consumer().resource_ref,
            name: consumer().service_name,
        }]
    );
    assert_eq!(store.secret_count().await, 4);
}

#[tokio::test]
async fn delete_cert_for_unknown_registration_is_not_found() {
    let (_store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();

    let err = manager.delete_cert(&reference, Some(&consumer())).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let (_store, manager) = setup();
    let reference = CertRef::new("memory://containers/missing").unwrap();

    assert!(manager.get_cert(&reference, None, true).await.unwrap_err().is_not_found());
    assert!(manager
        .get_cert(&reference, Some(&consumer()), false)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn hard_delete_removes_four_secrets_and_container_once_each() {
    let (store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();
    let container = store.get_container(reference.as_str()).await.unwrap();
    store.clear_calls().await;

    manager.hard_delete(&reference).await.unwrap();

    let calls = store.calls().await;
    let mut deleted_secrets: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            StoreCall::DeleteSecret { secret_ref } => Some(secret_ref.clone()),
            _ => None,
        })
        .collect();
    deleted_secrets.sort();
    let mut expected: Vec<_> =
        container.secret_refs.iter().map(|(_, secret_ref)| secret_ref.to_string()).collect();
    expected.sort();
    assert_eq!(deleted_secrets, expected);

    let container_deletes =
        calls.iter().filter(|call| matches!(call, StoreCall::DeleteContainer { .. })).count();
    assert_eq!(container_deletes, 1);

    assert_eq!(store.secret_count().await, 0);
    assert_eq!(store.container_count().await, 0);
    assert!(manager.get_cert(&reference, None, true).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn hard_delete_continues_past_missing_secret() {
    let (store, manager) = setup();
    let reference = store_full(&manager).await.unwrap();
    let container = store.get_container(reference.as_str()).await.unwrap();
    let certificate_ref = container.secret_refs.get(ContainerSlot::Certificate).unwrap();
    store.delete_secret(certificate_ref).await.unwrap();

    let err = manager.hard_delete(&reference).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.secret_count().await, 0);
    assert_eq!(store.container_count().await, 0);
}

#[tokio::test]
async fn handle_exposes_purge_separately() {
    let (store, manager) = setup();
    let handle = CertManagerHandle::new(Arc::new(manager));
    let reference = handle
        .store_cert(CERTIFICATE, &SecretString::new(PRIVATE_KEY), None, None, NAME)
        .await
        .unwrap();

    handle.purge().hard_delete(&reference).await.unwrap();
    assert_eq!(store.container_count().await, 0);
}

/// Delegates to an in-memory store but rejects the n-th secret creation.
#[derive(Debug)]
struct FailOnNthCreate {
    inner: Arc<InMemorySecretStore>,
    fail_on: usize,
    creates: std::sync::atomic::AtomicUsize,
}

impl FailOnNthCreate {
    fn new(inner: Arc<InMemorySecretStore>, fail_on: usize) -> Self {
        Self { inner, fail_on, creates: std::sync::atomic::AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl SecretStore for FailOnNthCreate {
    async fn create_secret(
        &self,
        payload: &str,
        name: &str,
        expiration: Option<chrono::DateTime<chrono::Utc>>,
    ) -> cluster_certs::Result<String> {
        let n = self.creates.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(CertError::store_failure(StoreOperation::CreateSecret, Some(413), "too large"));
        }
        self.inner.create_secret(payload, name, expiration).await
    }

    async fn get_secret_payload(&self, secret_ref: &str) -> cluster_certs::Result<String> {
        self.inner.get_secret_payload(secret_ref).await
    }

    async fn delete_secret(&self, secret_ref: &str) -> cluster_certs::Result<()> {
        self.inner.delete_secret(secret_ref).await
    }

    async fn store_container(
        &self,
        container: &cluster_certs::secrets::CertificateContainer,
    ) -> cluster_certs::Result<String> {
        self.inner.store_container(container).await
    }

    async fn get_container(
        &self,
        container_ref: &str,
    ) -> cluster_certs::Result<cluster_certs::secrets::CertificateContainer> {
        self.inner.get_container(container_ref).await
    }

    async fn register_consumer(
        &self,
        container_ref: &str,
        url: &str,
        name: &str,
    ) -> cluster_certs::Result<cluster_certs::secrets::CertificateContainer> {
        self.inner.register_consumer(container_ref, url, name).await
    }

    async fn remove_consumer(
        &self,
        container_ref: &str,
        url: &str,
        name: &str,
    ) -> cluster_certs::Result<()> {
        self.inner.remove_consumer(container_ref, url, name).await
    }

    async fn delete_container(&self, container_ref: &str) -> cluster_certs::Result<()> {
        self.inner.delete_container(container_ref).await
    }
}
