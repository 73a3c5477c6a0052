use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use svcctl::{
    BoxError, ForegroundRunner, LifecycleController, MessageKey, Messages, SignalBridge,
    SvcctlConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "svcctl")]
#[command(about = "Run a worker under a supervised start/stop lifecycle")]
#[command(version)]
#[command(long_about = "Runs a demonstration heartbeat worker in the foreground under the \
lifecycle controller. SIGINT, SIGTERM and SIGQUIT trigger a graceful stop with bounded \
escalation; a worker that ignores the stop is forced after the configured timeouts.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "svcctl.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without starting the service")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Heartbeat interval of the demonstration worker
    #[arg(long, value_name = "MS", default_value_t = 1000, help = "Heartbeat interval in milliseconds")]
    heartbeat_ms: u64,

    /// Print final service statistics as JSON
    #[arg(long, help = "Print final service statistics as JSON on exit")]
    stats_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting svcctl v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SvcctlConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    let messages = Messages::for_language(&config.ui.language);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ {}", messages.format(MessageKey::ConfigInvalid, &e));
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ {}", messages.get(MessageKey::ConfigValid));
        return Ok(());
    }

    if args.heartbeat_ms == 0 {
        anyhow::bail!("--heartbeat-ms must be greater than 0");
    }
    let interval = Duration::from_millis(args.heartbeat_ms);

    let root = CancellationToken::new();
    let bridge = SignalBridge::install(&root);

    let controller = LifecycleController::builder(config.service.clone())
        .lifecycle(config.lifecycle)
        .cancellation_token(bridge.token())
        .run(move |token| heartbeat(token, interval))
        .on_stop(|| {
            info!("Heartbeat stop callback invoked");
            Ok(())
        })
        .build()
        .map_err(|e| {
            error!("Failed to create controller: {}", e);
            e
        })?;

    controller.add_state_listener(|old, new| info!("Service state: {} -> {}", old, new));

    println!(
        "{}",
        messages.format(MessageKey::ServiceStarting, controller.name())
    );

    let runner = ForegroundRunner::new(controller, bridge);
    let report = runner.run().await.map_err(|e| {
        error!("Service error during execution: {}", e);
        e
    })?;

    // After a forced stop the watchdog stays armed over the output below,
    // which can block on a full pipe
    if let Some(reason) = &report.reason {
        println!("{}", messages.format(MessageKey::ShutdownRequested, reason));
    }
    let status = if report.forced {
        MessageKey::StopForced
    } else if report.exit_code == 0 {
        MessageKey::ServiceStopped
    } else {
        MessageKey::ServiceFailed
    };
    println!("{}", messages.format(status, runner.controller().name()));

    if args.stats_json {
        println!("{}", report.stats.to_json()?);
    }

    info!(
        "{}",
        messages.format(MessageKey::ExitCode, report.exit_code)
    );

    std::process::exit(report.exit_code);
}

/// Demonstration worker: log a heartbeat until cancelled
async fn heartbeat(token: CancellationToken, interval: Duration) -> Result<(), BoxError> {
    let mut ticker = tokio::time::interval(interval);
    let mut beats: u64 = 0;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Heartbeat worker stopping after {} beats", beats);
                return Ok(());
            }
            _ = ticker.tick() => {
                beats += 1;
                info!("Heartbeat #{}", beats);
            }
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
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
        .unwrap_or_else(|_| EnvFilter::new(format!("svcctl={}", log_level)));

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

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# svcctl configuration file");
    println!("# Every value may be overridden with SVCCTL_<SECTION>__<KEY>,");
    println!("# e.g. SVCCTL_LIFECYCLE__STOP_TIMEOUT_MS=5000");
    println!();
    println!("{}", SvcctlConfig::default().to_toml()?);
    Ok(())
}
