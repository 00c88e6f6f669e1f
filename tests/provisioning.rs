use cluster_certs::cert_manager::{BarbicanCertManager, CertManager, CertManagerHandle};
use cluster_certs::config::X509Config;
use cluster_certs::errors::StoreOperation;
use cluster_certs::provisioning::{ClusterCertificates, ClusterIdentity, CONDUCTOR_CLIENT_NAME};
use cluster_certs::secrets::{InMemorySecretStore, InjectedFailure, SecretStore};
use cluster_certs::x509::{build_csr, certificate_matches_key, inspect_certificate, keys};
use cluster_certs::{CertError, X509Engine};
use std::sync::Arc;
use tokio_test::assert_ok;
use uuid::Uuid;

const SERVICE: &str = "cluster-certs";

fn setup() -> (Arc<InMemorySecretStore>, ClusterCertificates) {
    let store = Arc::new(InMemorySecretStore::new());
    let handle = CertManagerHandle::new(Arc::new(BarbicanCertManager::new(store.clone(), None)));
    let certificates =
        ClusterCertificates::new(X509Engine::new(X509Config::default()), handle, SERVICE);
    (store, certificates)
}

fn cluster() -> ClusterIdentity {
    ClusterIdentity::new(Uuid::new_v4(), Some("k8s-prod".to_string()))
}

#[tokio::test]
async fn provisioning_stores_ca_and_client_with_consumers() {
    let (store, certificates) = setup();
    let cluster = cluster();

    let refs = assert_ok!(certificates.generate_certificates_for_cluster(&cluster).await);
    assert_eq!(store.container_count().await, 2);
    // CA: certificate, key, passphrase; client: the same plus the CA as intermediates
    assert_eq!(store.secret_count().await, 7);

    for reference in [&refs.ca_cert_ref, &refs.client_cert_ref] {
        let container = store.get_container(reference.as_str()).await.unwrap();
        assert_eq!(container.consumers.len(), 1);
        assert_eq!(container.consumers[0].url, cluster.uuid.to_string());
        assert_eq!(container.consumers[0].name, SERVICE);
    }
}

#[tokio::test]
async fn stored_bundles_hold_usable_key_material() {
    let (store, certificates) = setup();
    let cluster = cluster();
    let refs = certificates.generate_certificates_for_cluster(&cluster).await.unwrap();

    let manager = BarbicanCertManager::new(store.clone(), None);
    let ca = manager.get_cert(&refs.ca_cert_ref, None, true).await.unwrap();
    let client = manager.get_cert(&refs.client_cert_ref, None, true).await.unwrap();

    let ca_cert = ca.certificate().unwrap();
    let ca_info = inspect_certificate(ca_cert).unwrap();
    assert_eq!(ca_info.subject_cn.as_deref(), Some("k8s-prod"));
    assert!(ca_info.is_ca);
    assert!(ca.intermediates().is_none());

    let passphrase = ca.private_key_passphrase().unwrap().expose_secret();
    assert!(certificate_matches_key(ca_cert, ca.private_key().unwrap(), Some(passphrase)).unwrap());

    let client_info = inspect_certificate(client.certificate().unwrap()).unwrap();
    assert_eq!(client_info.subject_cn.as_deref(), Some(CONDUCTOR_CLIENT_NAME));
    assert_eq!(client_info.issuer_cn.as_deref(), Some("k8s-prod"));
    assert_eq!(client.intermediates(), Some(ca_cert));
    assert_ne!(client.private_key_passphrase(), ca.private_key_passphrase());
}

#[tokio::test]
async fn unnamed_cluster_uses_uuid_as_issuer() {
    let (_store, certificates) = setup();
    let cluster = ClusterIdentity::new(Uuid::new_v4(), None);
    let refs = certificates.generate_certificates_for_cluster(&cluster).await.unwrap();

    let pem = certificates.get_cluster_ca_certificate(&cluster, &refs).await.unwrap();
    let info = inspect_certificate(&pem).unwrap();
    assert_eq!(info.subject_cn, Some(cluster.uuid.to_string()));
}

#[tokio::test]
async fn node_csr_is_signed_by_cluster_ca() {
    let (_store, certificates) = setup();
    let cluster = cluster();
    let refs = certificates.generate_certificates_for_cluster(&cluster).await.unwrap();

    let node_key = keys::generate_rsa_key(2048).unwrap();
    let csr = build_csr("k8s-prod-node-0", &node_key).unwrap();
    let signed = certificates.sign_node_certificate(&cluster, &refs, &csr).await.unwrap();

    let info = inspect_certificate(&signed).unwrap();
    assert_eq!(info.subject_cn.as_deref(), Some("k8s-prod-node-0"));
    assert_eq!(info.issuer_cn.as_deref(), Some("k8s-prod"));
    assert!(info.client_auth);
}

#[tokio::test]
async fn release_removes_registrations_and_tolerates_repeats() {
    let (store, certificates) = setup();
    let cluster = cluster();
    let refs = certificates.generate_certificates_for_cluster(&cluster).await.unwrap();

    assert_ok!(certificates.delete_certificates_from_cluster(&cluster, &refs).await);
    for reference in [&refs.ca_cert_ref, &refs.client_cert_ref] {
        let container = store.get_container(reference.as_str()).await.unwrap();
        assert!(container.consumers.is_empty());
    }
    // secrets stay until purged
    assert_eq!(store.secret_count().await, 7);

    assert_ok!(certificates.delete_certificates_from_cluster(&cluster, &refs).await);
}

#[tokio::test]
async fn release_failure_is_returned_after_both_attempts() {
    let (store, certificates) = setup();
    let cluster = cluster();
    let refs = certificates.generate_certificates_for_cluster(&cluster).await.unwrap();
    store.fail_next(StoreOperation::RemoveConsumer, InjectedFailure::Unavailable).await;
    store.clear_calls().await;

    let err = certificates.delete_certificates_from_cluster(&cluster, &refs).await.unwrap_err();
    assert!(matches!(err, CertError::BackendUnavailable { .. }));
    assert_eq!(store.call_count(StoreOperation::RemoveConsumer).await, 2);

    let client = store.get_container(refs.client_cert_ref.as_str()).await.unwrap();
    assert!(client.consumers.is_empty());
}

#[tokio::test]
async fn registration_failure_fails_provisioning() {
    let (store, certificates) = setup();
    store.fail_next(StoreOperation::RegisterConsumer, InjectedFailure::Unavailable).await;

    let err = certificates.generate_certificates_for_cluster(&cluster()).await.unwrap_err();
    assert!(matches!(err, CertError::BackendUnavailable { .. }));
    assert_eq!(store.container_count().await, 2);
}

#[tokio::test]
async fn client_store_failure_purges_stored_ca() {
    let (store, certificates) = setup();
    // the CA container goes through, the client container does not
    store.fail_after(StoreOperation::StoreContainer, 1, InjectedFailure::Rejected(400)).await;

    let err = certificates.generate_certificates_for_cluster(&cluster()).await.unwrap_err();
    assert!(matches!(
        err,
        CertError::StoreFailure { operation: StoreOperation::StoreContainer, .. }
    ));
    assert_eq!(store.container_count().await, 0);
    assert_eq!(store.secret_count().await, 0);
    assert_eq!(store.call_count(StoreOperation::RegisterConsumer).await, 0);
}

#[tokio::test]
async fn failed_ca_purge_still_returns_client_error() {
    let (store, certificates) = setup();
    store.fail_after(StoreOperation::StoreContainer, 1, InjectedFailure::Rejected(400)).await;
    store.fail_next(StoreOperation::DeleteContainer, InjectedFailure::Unavailable).await;

    let err = certificates.generate_certificates_for_cluster(&cluster()).await.unwrap_err();
    assert!(matches!(err, CertError::StoreFailure { status: Some(400), .. }));
    // secrets were purged before the container delete failed
    assert_eq!(store.secret_count().await, 0);
    assert_eq!(store.container_count().await, 1);
}
