/// Agent Directory server
use agent_dir::{config::ServerConfig, context::AppContext, error::DirResult, server};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> DirResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_dir=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = AppContext::new(config).await?;

    let shutdown = CancellationToken::new();

    // Start reverification
    let scheduler = if ctx.config.verification.reverification_enabled {
        let scheduler = Arc::new(ctx.reverification_scheduler(shutdown.clone()));
        Some(scheduler.start())
    } else {
        tracing::info!("Reverification disabled");
        None
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    // Start server
    let served = server::serve(ctx, shutdown.clone()).await;
    shutdown.cancel();

    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            tracing::error!("Reverification scheduler crashed: {}", e);
        }
    }

    served
}

fn print_banner() {
    println!(
        r#"
    Agent Directory v{}
    domain-backed name verification
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
