use meshplane::{
    config::Config,
    identity::{bootstrap, resolve_san_set},
    observability::{init_observability, log_config_info},
    server::MultiplexServer,
    Result, APP_NAME, VERSION,
};
use tokio::signal;
use tracing::{error, info};

fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        ring::default_provider().install_default().expect("install ring crypto provider");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    install_rustls_provider();

    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = Config::from_env()?;
    let metrics = init_observability(&config.observability)?;

    info!(app_name = APP_NAME, version = VERSION, "Starting meshplane control plane");
    log_config_info(&config);

    let subject_names = resolve_san_set(&config.mesh);
    info!(names = ?subject_names, "Resolved identity subject names");

    let identity = bootstrap(&config, subject_names, None).await?;
    info!(source = identity.source().as_str(), "Identity source selected");

    let server = MultiplexServer::new(&config, &identity).with_metrics(metrics).start().await?;

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");

    server.shutdown().await;
    identity.shutdown().await;

    info!("meshplane stopped");
    Ok(())
}
