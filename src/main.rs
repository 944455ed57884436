/// Runway daemon entry point
///
/// Loads configuration from RUNWAY_* environment variables, assembles the
/// engine (queue worker and cron clock included) and runs until ctrl-c.

use runway::{Config, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let config = Config::default();
    tracing::info!("🚀 Starting runway engine");
    let engine = Engine::new(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown signal received");
    engine.shutdown().await;

    Ok(())
}
