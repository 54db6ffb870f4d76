use std::time::Duration;

use meshplane::identity::{bootstrap, IdentitySource};
use meshplane::server::MultiplexServer;
use tempfile::TempDir;

use crate::tls::support::{
    eventually, loopback, quiet_config, served_leaf, IdentityFiles, TestCertificateAuthority,
};

#[tokio::test]
async fn secure_listener_serves_on_disk_leaf() {
    let ca = TestCertificateAuthority::new().unwrap();
    let leaf = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let files = IdentityFiles::write(&ca, &leaf).unwrap();
    let empty = TempDir::new().unwrap();

    let mut config = quiet_config(empty.path());
    config.tls = files.tls_options();
    config.server.secure_grpc_addr = loopback();

    let identity = bootstrap(&config, vec!["localhost".into()], None).await.unwrap();
    assert!(matches!(identity.source(), IdentitySource::Files(_)));
    let server = MultiplexServer::new(&config, &identity).start().await.unwrap();
    let addr = server.addresses().secure_grpc.expect("secure listener bound");

    let served = served_leaf(addr, &ca.cert_pem).await.unwrap();
    assert_eq!(served, leaf.cert_der);

    server.shutdown().await;
    identity.shutdown().await;
}

#[tokio::test]
async fn replaced_files_are_served_without_rebinding() {
    let ca = TestCertificateAuthority::new().unwrap();
    let first = ca.issue_localhost(time::Duration::days(1)).unwrap();
    let files = IdentityFiles::write(&ca, &first).unwrap();
    let empty = TempDir::new().unwrap();

    let mut config = quiet_config(empty.path());
    config.tls = files.tls_options();
    config.server.secure_grpc_addr = loopback();
    config.server.https_addr = loopback();

    let identity = bootstrap(&config, vec!["localhost".into()], None).await.unwrap();
    let server = MultiplexServer::new(&config, &identity).start().await.unwrap();
    let before = server.addresses();
    let grpc_addr = before.secure_grpc.unwrap();
    let https_addr = before.https.unwrap();
    assert_eq!(served_leaf(grpc_addr, &ca.cert_pem).await.unwrap(), first.cert_der);

    let second = ca.issue_localhost(time::Duration::days(2)).unwrap();
    files.replace(&second).unwrap();

    let expected = second.cert_der.clone();
    let rotated = eventually(Duration::from_secs(10), || {
        let expected = expected.clone();
        let ca_pem = ca.cert_pem.clone();
        async move {
            matches!(served_leaf(grpc_addr, &ca_pem).await, Ok(served) if served == expected)
        }
    })
    .await;
    assert!(rotated, "new leaf was not served within the polling window");

    // Both TLS listeners share the store.
    assert_eq!(served_leaf(https_addr, &ca.cert_pem).await.unwrap(), second.cert_der);
    assert_eq!(server.addresses(), before);

    server.shutdown().await;
    identity.shutdown().await;
}
