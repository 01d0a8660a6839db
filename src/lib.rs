//! BuddyLens - peer-review claim and approval service.
//!
//! Requesters post review requests, reviewers claim them, and the
//! requester approves or rejects each claim. The library exposes the
//! state machine, its SQLite store and the HTTP surface; the binary in
//! `main.rs` only loads configuration and runs [`run`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

use config::AppConfig;
use error::AppError;
use services::mailer::transport_from_config;
use services::notification_sink::SqliteNotificationSink;
use services::{AppState, ClaimArbiter, Notifier};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Open the database and assemble the shared route state.
pub async fn build_state(config: &AppConfig) -> Result<AppState, AppError> {
    let db = db::initialize_with(&config.db_path, config.db_max_connections).await?;
    log::info!("[server] Database ready at {}", config.db_path.display());

    let notifier = Notifier::new(
        Arc::new(SqliteNotificationSink::new(db.clone())),
        transport_from_config(&config.mail)?,
        config.base_url.clone(),
        Duration::from_millis(config.mail.timeout_ms),
    );

    Ok(AppState {
        arbiter: ClaimArbiter::new(db.clone(), Arc::new(notifier)),
        db,
    })
}

/// Serve the API until `shutdown` resolves.
pub async fn run<F>(config: AppConfig, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()>,
{
    let state = build_state(&config).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let handle = services::start_server(addr, state)
        .await
        .map_err(AppError::internal)?;

    shutdown.await;
    handle.shutdown().await;
    Ok(())
}
