use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use camworker::{
    ControlServerBuilder, EventBus, FfmpegPlanner, HttpAlertSink, MotionDetectorFactory,
    SessionContext, SessionManager, SessionSettings, SnapshotStore, WorkerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "camworker")]
#[command(about = "Per-camera live video worker with relay supervision and detection alerts")]
#[command(version)]
#[command(long_about = "Runs one ffmpeg relay per camera, optionally samples decoded frames \
for detection, and posts alerts with snapshots to a backend. Sessions are started and stopped \
over a small HTTP control API.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camworker.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the worker")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build components but don't serve
    #[arg(long, help = "Perform dry run - build components but don't start the control server")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rotating file in this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily rotating log files")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Held for the process lifetime so buffered file logs are flushed
    let _log_guard = init_logging(&args)?;

    info!("Starting camworker v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match WorkerConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let manager = build_manager(&config)?;

    let server = ControlServerBuilder::new()
        .config(config.server.clone())
        .manager(manager.clone())
        .build()?;

    if args.dry_run {
        info!("Dry run mode - components built but control server not started");
        println!("✓ Dry run completed successfully - all components built");
        return Ok(());
    }

    setup_signal_handlers(server.shutdown_token());

    let served = server.start().await;
    if let Err(e) = &served {
        error!("Control server error: {}", e);
    }

    let teardown_budget = config.supervisor.grace_period() * 2 + config.supervisor.dispatch_drain();
    if !manager.shutdown_all(teardown_budget).await {
        warn!("Some sessions did not finish teardown before exit");
    }

    info!("camworker stopped");
    served.map_err(Into::into)
}

fn build_manager(config: &WorkerConfig) -> Result<SessionManager> {
    let sink = HttpAlertSink::new(
        config.alerts.backend_url.clone(),
        Duration::from_secs(config.alerts.request_timeout_secs),
    )?;
    info!("Alerts will be posted to {}", sink.url());

    let snapshots = SnapshotStore::new(
        config.alerts.snapshot_dir.clone(),
        config.alerts.snapshot_url_prefix.clone(),
        config.alerts.snapshot_quality,
    );

    Ok(SessionManager::new(SessionContext {
        planner: Arc::new(FfmpegPlanner::new(config.media.clone())),
        detectors: Arc::new(MotionDetectorFactory::new(config.analysis.clone())),
        sink: Arc::new(sink),
        snapshots: Some(Arc::new(snapshots)),
        events: EventBus::default(),
        settings: SessionSettings::from_config(config),
    }))
}

/// Cancel `shutdown` on SIGINT or SIGTERM
fn setup_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        let shutdown_sigterm = shutdown.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM signal");
                        shutdown_sigterm.cancel();
                    }
                }
                Err(e) => error!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT signal");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to register SIGINT handler: {}", e),
        }
    });
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camworker={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match args.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "camworker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# camworker configuration file");
    println!("# Every key can also be set as CAMWORKER_<SECTION>__<KEY>; PORT and BACKEND_URL are honoured too");
    println!();
    println!("{}", toml::to_string_pretty(&WorkerConfig::default())?);
    Ok(())
}
