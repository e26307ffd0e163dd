use anyhow::Context;
use bookstore_app::Application;
use bookstore_kernel::settings::Settings;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load bookstore settings")?;
    bookstore_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        strategy = ?settings.order.strategy,
        "bookstore bootstrap starting"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown signal received");
                    shutdown.cancel();
                }
                Err(error) => tracing::warn!(%error, "failed to listen for shutdown signal"),
            }
        }
    });

    Application::build(settings, shutdown)
        .await?
        .run()
        .await
}
