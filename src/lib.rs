//! # Meshplane
//!
//! Identity and secure-channel bootstrap for a service mesh discovery
//! control plane.
//!
//! ## Architecture
//!
//! ```text
//! Identity Resolver → (File Loader | CA Rotator) → Bundle Store
//!                                                       ↓
//!                  Admission ← Multiplexed Server (per-handshake lookup) ⇄ Envoy agents
//! ```
//!
//! ## Core Components
//!
//! - **Identity**: SAN resolution, certificate bundles, the bundle store and
//!   its two producers (watched files or a signing CA)
//! - **Server**: plaintext, h2c, TLS and mutual-TLS listeners sharing one
//!   live identity
//! - **xDS**: Envoy aggregated discovery sessions with ACK/NACK tracking,
//!   gated by admission control
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshplane::{identity, server::MultiplexServer, Config, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!     let names = identity::resolve_san_set(&config.mesh);
//!     let identity = identity::bootstrap(&config, names, None).await?;
//!     let server = MultiplexServer::new(&config, &identity).start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     identity.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod identity;
pub mod observability;
pub mod server;
pub mod xds;

// Re-export commonly used types and traits
pub use config::Config;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
