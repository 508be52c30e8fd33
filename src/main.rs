use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use intellidial::app::App;
use intellidial::config::AppConfig;
use intellidial::store::{LibSqlBackend, Store};

const DEFERRED_DRAIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;

    eprintln!("📞 Intellidial v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Inbound: http://0.0.0.0:{}/api/webhooks/inbound-email", config.server.port);
    eprintln!("   Call ended: http://0.0.0.0:{}/api/webhooks/vapi/call-ended", config.server.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = &config.server.db_path;
    let store: Arc<dyn Store> = Arc::new(
        LibSqlBackend::new_local(db_path)
            .await
            .with_context(|| format!("opening database at {}", db_path.display()))?,
    );
    eprintln!("   Database: {}", db_path.display());

    if config.vapi.agent.callback_url.is_none() {
        tracing::warn!("VAPI_WEBHOOK_BASE_URL not set; call results will only arrive via sync");
    }

    // ── HTTP ─────────────────────────────────────────────────────────────
    let App { router, deferred } = App::build(&config, store)?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("binding port {}", config.server.port))?;
    tracing::info!(port = config.server.port, "Intellidial server started");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    if !deferred.shutdown(DEFERRED_DRAIN).await {
        tracing::warn!("Exiting with deferred work still running");
    }
    Ok(())
}
