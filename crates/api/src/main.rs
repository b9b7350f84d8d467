use tokio_util::sync::CancellationToken;
use tracing::info;

use hireflow_api::app::{
    build_app,
    services::{Backends, Runtime, ServiceSettings},
};
use hireflow_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    hireflow_observability::init();

    let config = AppConfig::from_env()?;
    let cancel = CancellationToken::new();

    let backends = Backends::from_config(&config).await?;
    let runtime = Runtime::start(backends, ServiceSettings::from_config(&config), cancel.clone());
    let app = build_app(runtime.services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %listener.local_addr()?,
        inbound_domain = %config.inbound_domain,
        transport = config.transport.name(),
        processor_enabled = config.processor.enabled,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    runtime.processor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}
