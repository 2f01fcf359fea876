use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use aide_api::config::AppConfig;
use aide_api::rate_limit::RETENTION_MS;
use aide_api::routes::build_router;
use aide_api::state::{AppState, AppStateInner};
use aide_db::Database;

/// How often expired sessions and stale rate-limit hits are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aide_server=debug,aide_api=debug,aide_db=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            std::process::exit(1);
        }
    };
    if config.stripe.secret_key.is_empty() {
        warn!("STRIPE_SECRET_KEY is not set; billing requests will fail");
    }
    if config.hash_pepper.is_empty() {
        warn!("AIDE_HASH_PEPPER is not set; credentials are hashed without a pepper");
    }
    if config.twilio.is_none() {
        warn!("Twilio is not configured; reset links are only logged");
    }
    if !config.proxy.trust_forwarded {
        info!("AIDE_TRUST_PROXY is off; clients are identified by socket address");
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&config.db_path))?);

    // Shared state
    let state: AppState = Arc::new(AppStateInner::from_config(db.clone(), config));

    let sweeper = tokio::spawn(sweep_expired(db));

    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Aide server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Aide server stopped");
    Ok(())
}

async fn sweep_expired(db: Arc<Database>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let now = Utc::now();

        match db.purge_expired_sessions(now.timestamp()) {
            Ok(0) => {}
            Ok(n) => info!("Purged {} expired sessions", n),
            Err(e) => warn!("Session sweep failed: {:#}", e),
        }

        match db.purge_rate_limit_hits(now.timestamp_millis() - RETENTION_MS) {
            Ok(0) => {}
            Ok(n) => info!("Purged {} stale rate limit hits", n),
            Err(e) => warn!("Rate limit sweep failed: {:#}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
