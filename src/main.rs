use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use pgroute66::api;
use pgroute66::config::{self, Config, CONFIG_ENV, DEFAULT_CONFIG_FILE};
use pgroute66::handler::RoutingHandler;
use pgroute66::registry::ConnectionRegistry;

#[derive(Parser, Debug)]
#[command(name = "pgroute66", version, disable_version_flag = true)]
#[command(about = "Routing answers for a PostgreSQL cluster: primaries, standbys, availability")]
struct Args {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config", env = CONFIG_ENV, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Print version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::load_config(&args.config, args.debug)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = init_logging(&config)?;

    if !config.loglevel.is_empty() && config.loglevel.parse::<Level>().is_err() {
        warn!(loglevel = %config.loglevel, "Unknown log level, using info");
    }
    info!(path = %args.config.display(), nodes = config.hosts.len(), groups = config.groups.len(), "Loaded configuration");

    let registry = ConnectionRegistry::from_config(&config).context("invalid node configuration")?;
    let tls = api::tls::acceptor(&config.ssl).context("invalid [ssl] configuration")?;
    let handler = Arc::new(RoutingHandler::new(registry));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }

    let state = api::ApiState::new(handler, config.request_timeout(), shutdown);
    api::serve(state, &config.bind_to(), tls).await
}

/// Console logging, plus the configured log file when there is one
fn init_logging(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let level = config.loglevel.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (file_layer, guard) = match config.log_file() {
        Some((dir, name)) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(&name)
                .build(&dir)
                .with_context(|| format!("failed to open log file {}", config.logfile))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}
