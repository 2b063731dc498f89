use tracing_subscriber::EnvFilter;

use finality_server::build_app;
use finality_server::config::ServerConfig;

#[tokio::main]
async fn main() {
    init_tracing();
    let config = ServerConfig::load();
    config.validate();

    tracing::info!(addr = %config.listen_addr, "Trial of Finality server starting");

    let addr = config.listen_addr.clone();
    let (app, state) = match build_app(config) {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open penalty store");
            std::process::exit(1);
        },
    };

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };

    let shutdown = state.shutdown.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
        shutdown.cancel();
    });
    if let Err(e) = serve.await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// `FINALITY_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let json = std::env::var("FINALITY_LOG_JSON")
        .is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
