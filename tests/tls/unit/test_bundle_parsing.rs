use std::sync::Arc;
use std::time::Duration;

use meshplane::errors::TlsError;
use meshplane::identity::{BundleStore, CertificateBundle, FileCertificateLoader};
use meshplane::Error;

use crate::tls::support::{sec1_key_pem, IdentityFiles, TestCertificateAuthority};

#[test]
fn bundle_keeps_leaf_bytes_and_names() {
    let ca = TestCertificateAuthority::new().unwrap();
    let leaf = ca.issue_localhost(time::Duration::days(1)).unwrap();

    let bundle = CertificateBundle::from_pem(
        leaf.cert_pem.as_bytes(),
        leaf.key_pem.as_bytes(),
        ca.cert_pem.as_bytes(),
    )
    .unwrap();

    assert_eq!(bundle.leaf().as_ref(), leaf.cert_der.as_slice());
    assert_eq!(bundle.info().dns_names, vec!["localhost".to_string()]);
    assert_eq!(bundle.trust_anchor_pem(), ca.cert_pem.as_bytes());
    assert_eq!(bundle.fingerprint().len(), 64);
}

#[test]
fn key_from_another_leaf_is_rejected() {
    let ca = TestCertificateAuthority::new().unwrap();
    let first = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let second = ca.issue_localhost(time::Duration::days(1)).unwrap();

    let err = CertificateBundle::from_pem(
        first.cert_pem.as_bytes(),
        second.key_pem.as_bytes(),
        ca.cert_pem.as_bytes(),
    )
    .unwrap_err();
    assert!(matches!(err, TlsError::CertificateKeyMismatch));
}

#[test]
fn sec1_key_from_another_leaf_is_rejected() {
    let ca = TestCertificateAuthority::new().unwrap();
    let first = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let second = ca.issue_localhost(time::Duration::days(1)).unwrap();

    let err = CertificateBundle::from_pem(
        first.cert_pem.as_bytes(),
        sec1_key_pem(&second.key_pem).unwrap().as_bytes(),
        ca.cert_pem.as_bytes(),
    )
    .unwrap_err();
    assert!(matches!(err, TlsError::CertificateKeyMismatch));
}

#[test]
fn sec1_key_for_the_leaf_is_accepted() {
    let ca = TestCertificateAuthority::new().unwrap();
    let leaf = ca.issue_localhost(time::Duration::days(1)).unwrap();

    let bundle = CertificateBundle::from_pem(
        leaf.cert_pem.as_bytes(),
        sec1_key_pem(&leaf.key_pem).unwrap().as_bytes(),
        ca.cert_pem.as_bytes(),
    )
    .unwrap();
    assert_eq!(bundle.leaf().as_ref(), leaf.cert_der.as_slice());
}

#[tokio::test]
async fn malformed_files_fail_initial_load() {
    let ca = TestCertificateAuthority::new().unwrap();
    let leaf = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let files = IdentityFiles::write(&ca, &leaf).unwrap();
    std::fs::write(&files.paths.cert, "not a certificate").unwrap();

    let store = Arc::new(BundleStore::new());
    let loader = FileCertificateLoader::new(files.paths.clone(), store.clone(), Duration::from_secs(1));
    let err = loader.load_initial().await.unwrap_err();

    assert!(matches!(err, Error::Tls(_)), "unexpected error {err:?}");
    assert!(!store.is_ready());
}

#[tokio::test]
async fn loaded_identity_matches_file_bytes() {
    let ca = TestCertificateAuthority::new().unwrap();
    let leaf = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let files = IdentityFiles::write(&ca, &leaf).unwrap();

    let store = Arc::new(BundleStore::new());
    FileCertificateLoader::new(files.paths.clone(), store.clone(), Duration::from_secs(1))
        .load_initial()
        .await
        .unwrap();

    let bundle = store.current().unwrap();
    assert_eq!(bundle.leaf().as_ref(), leaf.cert_der.as_slice());
}
