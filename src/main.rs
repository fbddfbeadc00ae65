//! converge - follow a service rollout until it converges
//!
//! Polls the engine for a service's update status and tasks and renders
//! per-task progress until the rollout is stable, fails, or is interrupted.

use clap::Parser;
use converge::{
    client::EngineClient,
    config::{AppConfig, OutputMode},
    logging,
    progress::{
        service_progress, ChannelSink, DiscardSink, JsonLinesSink, ProgressSink, TerminalSink,
    },
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Follow a service rollout until it converges
    Watch {
        /// Service ID or name
        service: String,
        /// Progress output: terminal, json or quiet
        #[arg(long)]
        output: Option<OutputMode>,
        /// Pause between polls in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
}

#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Live rollout progress for orchestrated services", long_about = None)]
struct Args {
    /// Configuration file path (overrides defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine API URL, e.g. tcp://127.0.0.1:2375
    #[arg(long)]
    engine_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write debug entries to the log file
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut app_config = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = args.engine_url {
        app_config.engine_url = url;
    }

    match args.command {
        Command::Watch {
            service,
            output,
            poll_interval_ms,
        } => {
            if let Some(output) = output {
                app_config.output = output;
            }
            if let Some(interval) = poll_interval_ms {
                app_config.poll_interval_ms = interval;
            }
            app_config.validate()?;

            let tui_mode =
                app_config.output == OutputMode::Terminal && std::io::stdout().is_terminal();
            init_logging(args.verbose, tui_mode, args.debug || app_config.debug);

            watch(&app_config, &service).await
        }
    }
}

/// Initialize logging
fn init_logging(verbose: bool, tui_mode: bool, debug_mode: bool) {
    let filter = if verbose || debug_mode {
        "converge=debug,info"
    } else {
        "converge=info,warn"
    };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // Bars own the terminal, so diagnostics go to the log file instead
    if tui_mode {
        match logging::open_log_file() {
            Ok(file) => {
                if debug_mode {
                    eprintln!("Debug log: {}", logging::log_path().display());
                }
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_target(false)
                            .with_ansi(false)
                            .with_writer(Mutex::new(file)),
                    )
                    .init();
                return;
            }
            Err(e) => eprintln!(
                "Cannot open {}: {}; logging to stderr",
                logging::log_path().display(),
                e
            ),
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Follow one service until its rollout settles
async fn watch(config: &AppConfig, service_id: &str) -> anyhow::Result<()> {
    let client = EngineClient::new(&config.engine_url, config.request_timeout())?;
    tracing::info!("Connecting to engine at {}", client.base_url());

    // Ctrl-C detaches; the rollout keeps going on the orchestrator
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watched = service_id.to_string();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, detaching from {}", watched);
            interrupt.cancel();
        }
    });

    let stdout = std::io::stdout();
    let is_tty = stdout.is_terminal();
    let mut sink: Box<dyn ProgressSink> = match config.output {
        OutputMode::Terminal => Box::new(ChannelSink::spawn(TerminalSink::new(stdout, is_tty))),
        OutputMode::Json => Box::new(ChannelSink::spawn(JsonLinesSink::new(stdout))),
        OutputMode::Quiet => Box::new(DiscardSink),
    };

    tracing::debug!("Watching {} with {:?}", service_id, config.poll_options());
    let result = service_progress(
        &client,
        service_id,
        sink.as_mut(),
        &cancel,
        config.poll_options(),
    )
    .await;

    match result {
        Ok(()) => {
            tracing::info!("Stopped watching {}", service_id);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Rollout of {} failed: {}", service_id, e);
            Err(e.into())
        }
    }
}
