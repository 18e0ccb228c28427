use std::net::SocketAddr;

use clap::Parser;
use cmd_util::env::config_service;
use common::errors::MainError;
use local_backend::{
    config::LocalConfig,
    make_app,
    router::router,
};
use runtime::prod::ProdRuntime;

fn main() -> Result<(), MainError> {
    let _guard = config_service();
    let config = LocalConfig::parse();
    tracing::info!("Starting logbull-backend with config {config:?}");

    let tokio = ProdRuntime::init_tokio()?;
    let runtime = ProdRuntime::new(&tokio);

    let runtime_ = runtime.clone();
    runtime.block_on("main", async move {
        run_server(runtime_, config).await?;
        Ok(())
    })
}

async fn run_server(runtime: ProdRuntime, config: LocalConfig) -> anyhow::Result<()> {
    let state = make_app(runtime, &config).await?;
    let application = state.application.clone();
    let app = router(state);

    let listener =
        tokio::net::TcpListener::bind(SocketAddr::from(config.http_bind_address())).await?;
    tracing::info!("logbull-backend listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal");
    })
    .await?;

    application.shutdown().await;
    Ok(())
}
