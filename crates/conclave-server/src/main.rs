use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("conclave=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dirs(&config);

    let db = conclave_db::create_pool(&config.database.url, config.database.max_connections).await?;
    conclave_db::run_migrations(&db).await?;

    let shutdown = Arc::new(Notify::new());
    let state = conclave_core::AppState {
        db,
        event_bus: conclave_core::events::EventBus::default(),
        config: conclave_core::AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
            jwt_expiry_seconds: config.auth.jwt_expiry_seconds,
            registration_enabled: config.auth.registration_enabled,
            max_attachment_size: config.limits.max_attachment_size,
        },
        shutdown: shutdown.clone(),
    };

    let app = conclave_api::build_router()
        .merge(conclave_ws::gateway_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    print_startup_banner(
        &config.server.bind_address,
        &config.server.server_name,
        &config.database.url,
    );
    tracing::info!(bind_address = %config.server.bind_address, "server started");

    let shutdown_signal = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, closing gateway connections");
        // Wake every gateway connection so they close before the listener stops.
        shutdown.notify_waiters();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Ensure the sqlite database's parent directory exists before the pool
/// tries to create the file.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
    }
}

fn print_startup_banner(bind_address: &str, server_name: &str, db_url: &str) {
    println!();
    println!("   ____                _                 ");
    println!("  / ___|___  _ __   __| | __ ___   _____ ");
    println!(" | |   / _ \\| '_ \\ / __| |/ _` \\ \\ / / _ \\");
    println!(" | |__| (_) | | | | (__| | (_| |\\ V /  __/");
    println!("  \\____\\___/|_| |_|\\___|_|\\__,_| \\_/ \\___|");
    println!();
    println!("  Server:      {}", server_name);
    println!("  Listening:   http://{}", bind_address);
    println!("  Gateway:     ws://{}/gateway", bind_address);
    println!("  Database:    {}", db_url);
    println!();
}
