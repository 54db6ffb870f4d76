use meshplane::identity::{bootstrap, IdentitySource};
use meshplane::server::MultiplexServer;
use rustls::crypto::ring::cipher_suite;
use tempfile::TempDir;

use crate::tls::support::{
    client_config, connect, loopback, quiet_config, IdentityFiles, TestCertificateAuthority,
};

#[tokio::test]
async fn handshake_outside_allow_list_fails_without_affecting_others() {
    let ca = TestCertificateAuthority::new().unwrap();
    let leaf = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let files = IdentityFiles::write(&ca, &leaf).unwrap();
    let empty = TempDir::new().unwrap();

    let mut config = quiet_config(empty.path());
    config.tls = files.tls_options();
    config.tls.cipher_suites = vec!["TLS_AES_256_GCM_SHA384".to_string()];
    config.server.secure_grpc_addr = loopback();

    let identity = bootstrap(&config, vec!["localhost".into()], None).await.unwrap();
    let server = MultiplexServer::new(&config, &identity).start().await.unwrap();
    let addr = server.addresses().secure_grpc.unwrap();

    let outside = client_config(&ca.cert_pem, Some(vec![cipher_suite::TLS13_CHACHA20_POLY1305_SHA256]));
    assert!(connect(addr, outside).await.is_err());

    let inside = client_config(&ca.cert_pem, Some(vec![cipher_suite::TLS13_AES_256_GCM_SHA384]));
    let stream = connect(addr, inside).await.expect("allowed suite negotiates");
    let (_, session) = stream.get_ref();
    assert_eq!(
        session.negotiated_cipher_suite().map(|suite| suite.suite()),
        Some(cipher_suite::TLS13_AES_256_GCM_SHA384.suite())
    );

    server.shutdown().await;
    identity.shutdown().await;
}

#[tokio::test]
async fn absent_identity_opens_no_tls_listeners() {
    let empty = TempDir::new().unwrap();
    let mut config = quiet_config(empty.path());
    config.server.secure_grpc_addr = loopback();
    config.server.https_addr = loopback();
    config.server.http_addr = loopback();

    let identity = bootstrap(&config, vec!["localhost".into()], None).await.unwrap();
    assert_eq!(identity.source(), &IdentitySource::Absent);
    assert!(identity.store().current().unwrap_err().is_not_ready());

    let server = MultiplexServer::new(&config, &identity).start().await.unwrap();
    let addresses = server.addresses();
    assert!(addresses.secure_grpc.is_none());
    assert!(addresses.https.is_none());

    let http = addresses.http.expect("plaintext listener still serves");
    let response = reqwest::get(format!("http://{http}/debug/identity")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    server.shutdown().await;
    identity.shutdown().await;
}

#[tokio::test]
async fn https_listener_serves_router_with_client_certificates_optional() {
    let ca = TestCertificateAuthority::new().unwrap();
    let leaf = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let files = IdentityFiles::write(&ca, &leaf).unwrap();
    let empty = TempDir::new().unwrap();

    let mut config = quiet_config(empty.path());
    config.tls = files.tls_options();
    config.server.https_addr = loopback();

    let identity = bootstrap(&config, vec!["localhost".into()], None).await.unwrap();
    let server = MultiplexServer::new(&config, &identity).start().await.unwrap();
    let addr = server.addresses().https.unwrap();

    let client = reqwest::Client::builder()
        .add_root_certificate(reqwest::Certificate::from_pem(ca.cert_pem.as_bytes()).unwrap())
        .resolve("localhost", addr)
        .build()
        .unwrap();

    let response = client
        .get(format!("https://localhost:{}/debug/identity", addr.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["dns_names"][0], "localhost");

    server.shutdown().await;
    identity.shutdown().await;
}
