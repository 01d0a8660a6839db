use buddy_lens::config::AppConfig;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("[server] Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("[server] Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("[server] Shutdown requested");
    };

    match buddy_lens::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[server] {}", e);
            ExitCode::FAILURE
        }
    }
}
