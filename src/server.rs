//! Broker startup and shutdown.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use prioq_api::{ApiServer, AppState};
use prioq_config::{ConfigLoader, ConfigValidator, LogFormat, LoggingConfig};
use prioq_queue::Broker;

/// Keeps the non-blocking file writer flushing for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing from the logging config.
///
/// `RUST_LOG` takes precedence over `logging.level`. When `logging.file` is set,
/// logs are also written to a daily rolling file in that directory.
pub(crate) fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let (text, json) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    let file = match &config.file {
        Some(dir) => {
            let log_dir = ConfigLoader::expand_path(dir);
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("prioq")
                .filename_suffix("log")
                .max_log_files(30)
                .build(&log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .with(file)
        .try_init()?;

    Ok(())
}

/// Run the broker in foreground until Ctrl-C.
pub(crate) async fn run_server(
    config_path: &Path,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ConfigLoader::load_or_default(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    init_tracing(&config.logging)?;
    info!("Starting prioq v{}", env!("CARGO_PKG_VERSION"));
    if !config_path.exists() {
        warn!("Config file {} not found, using defaults", config_path.display());
    }

    let warnings = ConfigValidator::validate(&config)?.into_result()?;
    for warning in warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    let broker = Arc::new(Broker::open(&config.store, &config.queue).await?);
    let state = Arc::new(AppState::new(Arc::clone(&broker), &config.auth, config.queue.clone()));
    let server = ApiServer::new(config.server.clone(), state);

    info!("prioq ready:");
    info!("  API Server:    http://{}", server.addr());
    info!("  POST /api/v1/enqueue | dequeue | ack | fail | count");
    info!("  GET  /health");

    let shutdown = {
        let broker = Arc::clone(&broker);
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
            // Blocked dequeues return before the server drains.
            broker.shutdown().await;
        }
    };

    let result = server.run_until(shutdown).await;
    if !broker.is_shutting_down() {
        broker.shutdown().await;
    }
    result
}
