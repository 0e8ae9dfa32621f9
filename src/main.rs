//! Library API server
//!
//! Serves the REST API and runs the new-book notification consumer.

use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use library_api::{
    config::{AppConfig, LoggingConfig},
    create_router,
    repository::Repository,
    services::{
        email::SmtpMailer,
        events::EventBus,
        notifications::NotificationConsumer,
        redis::RedisEventBus,
        Services,
    },
    AppState,
};

/// Install the global subscriber. The returned guard flushes the log file on drop.
fn init_tracing(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("library_api={},tower_http=debug", config.level).into());

    let (writer, guard) = match config.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", file))?;
            let appender =
                tracing_appender::rolling::never(directory.unwrap_or(Path::new(".")), file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer),
                Some(guard),
            )
        }
        None => (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout),
            None,
        ),
    };

    let fmt_layer = if config.format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(guard.is_none())
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    let _log_guard = init_tracing(&config.logging)?;

    tracing::info!("Starting library API v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    // Event queue
    let bus = RedisEventBus::connect(config.queue.clone())
        .await
        .context("Failed to connect to Redis")?;
    let events: Arc<dyn EventBus> = Arc::new(bus);

    tracing::info!(topic = %config.queue.topic, "Connected to event queue");

    // Create repository and services
    let repository = Repository::new(pool);
    let services = Services::new(repository.clone(), &config, events.clone())
        .context("Failed to create services")?;

    // Notification consumer
    let mailer = Arc::new(SmtpMailer::new(&config.email).context("Failed to configure SMTP")?);
    let consumer = NotificationConsumer::new(
        repository.users.clone(),
        mailer,
        config.server.public_url.clone(),
        &config.notifications,
    );
    let subscription = events
        .subscribe()
        .await
        .context("Failed to subscribe to event queue")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(subscription, shutdown_rx));

    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .context("Invalid host address")?,
        config.server.port,
    );

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the consumer; it finishes the batch in hand first
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "Notification consumer task failed");
    }

    Ok(())
}
