//! Nalu - Single-use discount vouchers with a staff redemption console

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nalu::{
    api::{self, AppState},
    config::{AuthConfig, Config},
    db::{
        self,
        repositories::{SqlxSessionRepository, SqlxVoucherRepository},
    },
    services::{
        hash_password, password::is_valid_hash, SessionGate, StaffCredential, VoucherService,
    },
};

/// How often expired sessions are removed
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nalu=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Nalu voucher service...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Voucher store with its in-memory view
    let voucher_service = Arc::new(VoucherService::with_event_buffer(
        SqlxVoucherRepository::boxed(pool.clone()),
        config.store.event_buffer,
    ));
    let loaded = voucher_service.load().await?;
    tracing::info!("Voucher cache loaded: {} vouchers", loaded);

    // Session gate
    let session_lifetime = ChronoDuration::try_hours(config.auth.session_hours)
        .context("auth.session_hours is out of range")?;
    let session_gate = Arc::new(
        SessionGate::new(
            SqlxSessionRepository::boxed(pool.clone()),
            staff_credential(&config.auth)?,
            session_secret(&config.auth)?,
        )
        .with_lifetime(session_lifetime),
    );
    tracing::info!("Session gate ready for user '{}'", config.auth.username);

    // Periodic voucher cache refresh
    if config.store.refresh_interval_seconds > 0 {
        let service = voucher_service.clone();
        let period = Duration::from_secs(config.store.refresh_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = service.refresh().await {
                    tracing::warn!("Voucher cache refresh failed: {}", e);
                }
            }
        });
    }

    // Expired session cleanup
    {
        let gate = session_gate.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = gate.purge_expired().await {
                    tracing::warn!("Session purge failed: {}", e);
                }
            }
        });
    }

    let state = AppState {
        pool: pool.clone(),
        voucher_service: voucher_service.clone(),
        session_gate,
    };

    // Build router
    let app = api::build_router(state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    voucher_service.discard().await;
    pool.close().await;

    Ok(())
}

/// Staff credential from configuration, hashing a plaintext password if needed
fn staff_credential(auth: &AuthConfig) -> Result<StaffCredential> {
    let password_hash = match &auth.password_hash {
        Some(hash) => {
            if !is_valid_hash(hash) {
                anyhow::bail!("auth.password_hash is not a valid PHC string");
            }
            hash.clone()
        }
        None => hash_password(&auth.password).context("Failed to hash staff password")?,
    };

    Ok(StaffCredential {
        username: auth.username.clone(),
        password_hash,
    })
}

/// Session signing key from configuration, or a random one for this process
fn session_secret(auth: &AuthConfig) -> Result<Vec<u8>> {
    if let Some(secret) = auth.session_secret.as_deref().filter(|s| !s.is_empty()) {
        return Ok(secret.as_bytes().to_vec());
    }

    let mut key = vec![0u8; 32];
    getrandom::fill(&mut key)
        .map_err(|e| anyhow::anyhow!("Failed to generate session secret: {}", e))?;
    tracing::warn!("auth.session_secret is not set; sessions will not survive a restart");
    Ok(key)
}

async fn shutdown_signal() {
    let ctrl_c = signal_or_pending(tokio::signal::ctrl_c(), "Ctrl-C");

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
}

/// Wait for a signal; if it cannot be installed, log and never resolve
async fn signal_or_pending<F>(signal: F, name: &str)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!("Failed to listen for {}: {}", name, e);
        std::future::pending::<()>().await;
    }
}
