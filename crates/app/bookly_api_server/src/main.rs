//! Bookly API server binary.
//!
//! Reads configuration from the environment (and `.env`), connects to
//! PostgreSQL and the Redis revocation store, runs migrations and serves the
//! HTTP API until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bookly_api::AppState;
use bookly_api::config::ApiConfig;
use bookly_core::auth::revocation::{RedisRevocationStore, RetryPolicy, RetryingStore};
use bookly_core::mail::{LogTransport, MailQueue};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "bookly_api_server", about = "Bookly API server")]
struct Args {
    /// Address to listen on; overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    /// Skip running embedded migrations at startup.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bookly_api=debug,bookly_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    // Missing or malformed required settings stop the process here.
    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    info!(?config, "starting bookly_api_server");

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    if !args.skip_migrations {
        info!("running database migrations");
        bookly_api::migrate(&pool).await?;
    }

    let redis = RedisRevocationStore::connect(&config.redis_url).await?;
    let revocations = Arc::new(RetryingStore::new(Arc::new(redis), RetryPolicy::default()));

    let shutdown = CancellationToken::new();
    let (mail, mail_worker) = MailQueue::start(Arc::new(LogTransport), shutdown.clone());

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, config, revocations, mail)?;
    let app = bookly_api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Let the mail worker drain what is already queued.
    shutdown.cancel();
    let _ = mail_worker.await;

    Ok(())
}
