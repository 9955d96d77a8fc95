use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rpaas_server::cli::{Args, Mode};
use rpaas_server::config::{Config, LogFormat};
use rpaas_server::{commands, server};

const SERVER_FILTER: &str = "info,rpaas_server=debug,rpaas_operator=debug,kube=warn,hyper=warn";
const CLI_FILTER: &str = "warn";

/// Initialize tracing.
///
/// The server logs to stdout; CLI commands log to stderr so their output
/// stays clean. Keep the returned guard alive: dropping it stops the
/// background writer.
fn initialize_tracing(format: LogFormat, default_filter: &str, server: bool) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let (writer, guard) = if server {
        tracing_appender::non_blocking(std::io::stdout())
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(writer).with_ansi(!server))
            .init(),
    }
    guard
}

async fn run(args: Args) -> Result<ExitCode> {
    match args.mode {
        Mode::Serve => {
            let config = Config::load()?;
            let _guard = initialize_tracing(config.log_format, SERVER_FILTER, true);
            tracing::info!(
                listen = %config.listen,
                namespace = %config.namespace,
                clusters = config.clusters.len(),
                auth = config.auth_enabled(),
                "Starting rpaas API"
            );
            server::run(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        mode => {
            let _guard = initialize_tracing(LogFormat::Text, CLI_FILTER, false);
            commands::run(args.target, mode).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
