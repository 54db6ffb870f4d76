use reqwest::{StatusCode, Version};

use crate::server::support::{base_config, loopback, start};

#[tokio::test]
async fn plaintext_port_serves_http1_and_h2c() {
    let mut config = base_config();
    config.server.http_addr = loopback();
    let server = start(&config).await;
    let url = format!("http://{}/ready", server.addresses().http.unwrap());

    let http1 = reqwest::Client::builder().http1_only().build().unwrap();
    let response = http1.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.version(), Version::HTTP_11);

    let h2c = reqwest::Client::builder().http2_prior_knowledge().build().unwrap();
    let response = h2c.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.version(), Version::HTTP_2);

    server.shutdown().await;
}

#[tokio::test]
async fn monitoring_port_reports_version() {
    let mut config = base_config();
    config.server.monitoring_addr = loopback();
    let server = start(&config).await;

    let body: serde_json::Value =
        reqwest::get(format!("http://{}/version", server.addresses().monitoring.unwrap()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(body["name"], "meshplane");

    server.shutdown().await;
}

#[tokio::test]
async fn disabled_listeners_are_not_bound() {
    let server = start(&base_config()).await;
    assert_eq!(server.addresses(), Default::default());
    server.shutdown().await;
}
