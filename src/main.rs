use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docforge::{create_router, CleanupScheduler, Config, JobService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docforge=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting docforge document tools service");
    tracing::info!("Upload root: {}", config.upload_root.display());
    tracing::info!("Max request size: {}MB", config.max_content_length_mb);
    tracing::info!(
        "Cleanup delay: {}s, result TTL: {}s",
        config.cleanup_delay_seconds,
        config.result_ttl_seconds
    );

    let addr = format!("{}:{}", config.server_host, config.server_port);

    let scheduler = CleanupScheduler::start();
    let app = create_router(JobService::new(config, scheduler));

    tracing::info!("Server listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
