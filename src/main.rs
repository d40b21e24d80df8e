use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use cardroom_realtime::adapters::http::router;
use cardroom_realtime::application::{AppContext, StartupError};
use cardroom_realtime::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "cardroom-realtime starting"
    );

    let addr = config.server.socket_addr()?;
    let ctx = AppContext::connect(config).await?;
    ctx.start().await?;

    let app = router(&ctx);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, instance_id = %ctx.instance_id(), "Listening");

    let shutdown = ctx.shutdown_token();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await;

    ctx.shutdown().await;
    served?;
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.server.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.is_production() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().compact().with_env_filter(filter).init();
    }
}
