use std::sync::Arc;

use meshplane::errors::TlsError;
use meshplane::identity::BundleStore;
use meshplane::server::{resolve_cipher_suites, TlsConfigSource};

#[test]
fn iana_names_resolve_in_any_case() {
    let suites = resolve_cipher_suites(&[
        "TLS_AES_256_GCM_SHA384".to_string(),
        "tls_ecdhe_rsa_with_aes_128_gcm_sha256".to_string(),
    ])
    .unwrap();
    assert_eq!(suites.len(), 2);
}

#[test]
fn unsupported_suite_fails_configuration() {
    let err = TlsConfigSource::new(Arc::new(BundleStore::new()), &["TLS_NULL_WITH_NULL_NULL".to_string()])
        .unwrap_err();
    assert!(matches!(err, TlsError::UnknownCipherSuite { .. }));
    assert!(err.to_string().contains("TLS_NULL_WITH_NULL_NULL"));
}
