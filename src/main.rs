//! shellgate - WebSocket gateway for SSH terminals and SFTP
//!
//! Configuration comes from `$SHELLGATE_CONFIG` (or the platform config
//! directory); `$SHELLGATE_BIND` overrides the listen address and
//! `RUST_LOG` the log filter.

// Many small allocations per frame (JSON text, channel payloads)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use shellgate::bridge::WsGateway;
use shellgate::config::ConfigStorage;
use shellgate::gateway::SshConnector;

/// Time given to open links to disconnect cleanly on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args().nth(1).is_some_and(|a| a == "--version" || a == "-V") {
        println!("shellgate {}", VERSION);
        return ExitCode::SUCCESS;
    }

    let storage = match ConfigStorage::from_env() {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!("shellgate: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = match storage.load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shellgate: failed to load {:?}: {}", storage.path(), e);
            return ExitCode::FAILURE;
        }
    };

    shellgate::init_logging(&config.log_level);
    info!("Starting shellgate v{}", VERSION);

    let gateway = WsGateway::new(config, Arc::new(SshConnector));
    let listener = match gateway.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", gateway.config().bind, e);
            return ExitCode::FAILURE;
        }
    };

    let server = tokio::spawn(gateway.clone().serve(listener));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");

    gateway.shutdown();
    if !gateway.wait_idle(SHUTDOWN_GRACE).await {
        warn!("{} links still open after {:?}", gateway.link_count(), SHUTDOWN_GRACE);
    }

    match server.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("Gateway failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Gateway task panicked: {}", e);
            ExitCode::FAILURE
        }
    }
}
