use anyhow::{Context, Result};
use faceswap_core::ToolConfig;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod http;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("faceswapd starting");

    let tool = Arc::new(ToolConfig::from_env().context("invalid face swap tool configuration")?);
    let server = Arc::new(ServerConfig::from_env()?);

    tokio::fs::create_dir_all(&server.uploads_dir)
        .await
        .with_context(|| format!("cannot create {}", server.uploads_dir.display()))?;
    tokio::fs::create_dir_all(&tool.results_dir)
        .await
        .with_context(|| format!("cannot create {}", tool.results_dir.display()))?;

    tracing::info!(
        addr = %server.bind_addr(),
        uploads = %server.uploads_dir.display(),
        results = %tool.results_dir.display(),
        tool = %tool.installation_dir.display(),
        "configuration loaded"
    );

    if server.result_urls_are_local_only() {
        tracing::warn!(
            "result URLs use localhost; set FACESWAP_PUBLIC_HOST so remote clients can fetch results"
        );
    }

    let state = http::AppState::new(tool, server.clone());

    // Startup diagnostics only; an unavailable tool does not block serving.
    let probe = state.probe.clone();
    tokio::spawn(async move {
        if probe.check_availability().await {
            tracing::info!("face swap tool is available and ready to use");
        } else {
            tracing::warn!("face swap tool is not available; check the installation");
        }
    });

    let listener = tokio::net::TcpListener::bind(server.bind_addr())
        .await
        .with_context(|| format!("cannot bind {}", server.bind_addr()))?;
    tracing::info!(addr = %server.bind_addr(), "faceswapd ready");

    axum::serve(listener, http::build_router(state))
        .with_graceful_shutdown(async {
            // Keep running until signaled
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("faceswapd shutting down");
        })
        .await?;

    Ok(())
}
