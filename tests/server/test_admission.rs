use std::time::{Duration, Instant};

use tonic::Code;

use crate::server::support::{
    base_config, discovery_request, eventually, loopback, start, AdsSession, CLUSTER_TYPE,
};

#[tokio::test]
async fn sessions_beyond_limit_are_refused_until_one_ends() {
    let mut config = base_config();
    config.server.grpc_addr = loopback();
    config.admission.max_connections = 2;

    let server = start(&config).await;
    let addr = server.addresses().grpc.unwrap();

    let mut first = AdsSession::open(addr).await.expect("first admitted");
    let mut second = AdsSession::open(addr).await.expect("second admitted");
    first.send(discovery_request(CLUSTER_TYPE, "")).await;
    second.send(discovery_request(CLUSTER_TYPE, "")).await;
    first.next_response().await;
    second.next_response().await;
    assert_eq!(server.admission().active(), 2);

    let refused = AdsSession::open(addr).await.err().expect("third refused");
    assert_eq!(refused.code(), Code::ResourceExhausted);
    assert_eq!(server.admission().active(), 2);

    drop(first);
    assert!(
        eventually(Duration::from_secs(5), || server.admission().active() == 1).await,
        "closed session was not released"
    );

    let mut replacement = AdsSession::open(addr).await.expect("slot freed");
    replacement.send(discovery_request(CLUSTER_TYPE, "")).await;
    replacement.next_response().await;

    drop((second, replacement));
    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_attempts_admit_exactly_the_limit() {
    let mut config = base_config();
    config.server.grpc_addr = loopback();
    config.admission.max_connections = 3;

    let server = start(&config).await;
    let addr = server.addresses().grpc.unwrap();

    let attempts: Vec<_> = (0..8).map(|_| tokio::spawn(AdsSession::open(addr))).collect();
    let mut admitted = Vec::new();
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(session) => admitted.push(session),
            Err(status) => {
                assert_eq!(status.code(), Code::ResourceExhausted);
                refused += 1;
            }
        }
    }

    assert_eq!(admitted.len(), 3);
    assert_eq!(refused, 5);

    drop(admitted);
    server.shutdown().await;
}

#[tokio::test]
async fn burst_of_attempts_is_smoothed_by_rate_limit() {
    let mut config = base_config();
    config.server.grpc_addr = loopback();
    config.admission.max_requests_per_second = 20;
    config.admission.burst = 1;

    let server = start(&config).await;
    let addr = server.addresses().grpc.unwrap();

    let started = Instant::now();
    let mut sessions = Vec::new();
    for _ in 0..4 {
        sessions.push(AdsSession::open(addr).await.expect("admitted"));
    }
    // Three attempts past the burst at 50ms each.
    assert!(started.elapsed() >= Duration::from_millis(120), "elapsed {:?}", started.elapsed());

    drop(sessions);
    server.shutdown().await;
}
