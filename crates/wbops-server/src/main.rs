mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use wbops_core::PassthroughCipher;
use wbops_ingest::JobRegistry;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(wbops_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = wbops_db::PoolConfig::from_app_config(&config);
    let pool = wbops_db::connect_pool(&config.database_url, pool_config).await?;
    wbops_db::run_migrations(&pool).await?;

    let registry = Arc::new(JobRegistry::new());
    let cipher: Arc<dyn wbops_core::TokenCipher> = Arc::new(PassthroughCipher);

    let _scheduler = scheduler::start_background_jobs(
        pool.clone(),
        Arc::clone(&config),
        Arc::clone(&cipher),
        Arc::clone(&registry),
    )
    .await?;

    let auth = AuthState::new(config.api_bearer_token.clone());
    let state = AppState {
        pool,
        config: Arc::clone(&config),
        registry,
        cipher,
    };
    let app = build_app(state, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "wbops server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
