use std::time::Duration;

use envoy_types::pb::envoy::service::discovery::v3::DeltaDiscoveryRequest;
use envoy_types::pb::google::rpc::Status as RpcStatus;
use futures::stream;
use tonic::Code;

use crate::server::support::{
    ads_client, base_config, discovery_request, loopback, start, AdsSession, CLUSTER_TYPE,
    LISTENER_TYPE,
};

#[tokio::test]
async fn ack_and_nack_produce_no_response() {
    let mut config = base_config();
    config.server.grpc_addr = loopback();
    let server = start(&config).await;
    let addr = server.addresses().grpc.unwrap();

    let mut session = AdsSession::open(addr).await.unwrap();
    session.send(discovery_request(CLUSTER_TYPE, "")).await;
    let response = session.next_response().await;
    assert_eq!(response.type_url, CLUSTER_TYPE);
    assert!(!response.version_info.is_empty());
    assert!(!response.nonce.is_empty());

    let mut ack = discovery_request(CLUSTER_TYPE, &response.nonce);
    ack.version_info = response.version_info.clone();
    session.expect_silence(ack, Duration::from_millis(300)).await;

    let mut nack = discovery_request(CLUSTER_TYPE, &response.nonce);
    nack.error_detail = Some(RpcStatus { code: 3, message: "rejected".into(), details: Vec::new() });
    session.expect_silence(nack, Duration::from_millis(300)).await;

    session.send(discovery_request(LISTENER_TYPE, "")).await;
    let listeners = session.next_response().await;
    assert_eq!(listeners.type_url, LISTENER_TYPE);
    assert_ne!(listeners.nonce, response.nonce);

    drop(session);
    server.shutdown().await;
}

#[tokio::test]
async fn stale_nonce_is_ignored() {
    let mut config = base_config();
    config.server.grpc_addr = loopback();
    let server = start(&config).await;
    let addr = server.addresses().grpc.unwrap();

    let mut session = AdsSession::open(addr).await.unwrap();
    session.send(discovery_request(CLUSTER_TYPE, "")).await;
    let first = session.next_response().await;
    session.send(discovery_request(CLUSTER_TYPE, "")).await;
    let second = session.next_response().await;

    session
        .expect_silence(discovery_request(CLUSTER_TYPE, &first.nonce), Duration::from_millis(300))
        .await;
    session
        .expect_silence(discovery_request(CLUSTER_TYPE, &second.nonce), Duration::from_millis(300))
        .await;

    drop(session);
    server.shutdown().await;
}

#[tokio::test]
async fn delta_discovery_is_unimplemented() {
    let mut config = base_config();
    config.server.grpc_addr = loopback();
    let server = start(&config).await;

    let mut client = ads_client(server.addresses().grpc.unwrap()).await;
    let status = client.delta_aggregated_resources(stream::empty::<DeltaDiscoveryRequest>()).await.unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    server.shutdown().await;
}

#[tokio::test]
async fn discovery_is_served_over_h2c_without_grpc_port() {
    let mut config = base_config();
    config.server.http_addr = loopback();
    let server = start(&config).await;
    assert!(server.addresses().grpc.is_none());

    let mut session = AdsSession::open(server.addresses().http.unwrap()).await.unwrap();
    session.send(discovery_request(CLUSTER_TYPE, "")).await;
    let response = session.next_response().await;
    assert_eq!(response.type_url, CLUSTER_TYPE);

    drop(session);
    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_ends_open_sessions() {
    let mut config = base_config();
    config.server.grpc_addr = loopback();
    let server = start(&config).await;

    let mut session = AdsSession::open(server.addresses().grpc.unwrap()).await.unwrap();
    session.send(discovery_request(CLUSTER_TYPE, "")).await;
    session.next_response().await;

    tokio::time::timeout(Duration::from_secs(5), server.shutdown()).await.expect("drained in time");

    let end = tokio::time::timeout(Duration::from_secs(5), session.responses.message())
        .await
        .expect("stream ended");
    match end {
        Ok(None) => {}
        Err(status) => assert!(matches!(status.code(), Code::Unavailable | Code::Unknown | Code::Cancelled)),
        Ok(Some(message)) => panic!("unexpected message {message:?}"),
    }
}
