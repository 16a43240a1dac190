use anyhow::{Context, Result};
use clap::Parser;
use serial_daq::channel::ChannelType;
use serial_daq::config::{DeviceFamily, DeviceSettings};
use serial_daq::discovery::{self, EnumerationSource, StaticSource};
use serial_daq::instrument::ReaderRegistry;
use serial_daq::log_capture::LogBuffer;
use serial_daq::{AcquisitionCoordinator, RecordingSurface, Settings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

const STEP: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "serial_daq")]
#[command(about = "Headless acquisition front-end for serially attached lab devices")]
#[command(version)]
#[command(long_about = "Discovers serial devices by identity, streams samples from one \
acquisition worker per channel and routes the accumulated series to per-channel plots. \
Runs until the duration elapses or Ctrl-C is pressed.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, help = "Path to TOML configuration file")]
    config: Option<String>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS", help = "Acquire for SECS seconds, then exit")]
    duration: Option<u64>,

    /// Use simulated devices for every channel
    #[arg(long, help = "Replace discovery and devices with simulated ones")]
    simulate: bool,

    /// Session file to preload before acquisition
    #[arg(long, value_name = "FILE", help = "Load a saved session before starting")]
    load: Option<String>,

    /// Save the session on exit
    #[arg(long, help = "Save the recorded series into storage.default_path on exit")]
    save: bool,

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
    #[arg(long, help = "Validate configuration and exit without acquiring")]
    validate_config: bool,

    /// Print effective configuration and exit
    #[arg(long, help = "Print the effective configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        let settings = Settings::new(args.config.as_deref())?;
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    init_logging(&args);
    info!("Starting serial_daq v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = match Settings::new(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            if e.is_configuration() {
                error!("Invalid configuration: {}", e);
            } else {
                error!("Failed to load configuration: {}", e);
            }
            if args.validate_config {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            return Err(e.into());
        }
    };

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let source: Arc<dyn EnumerationSource> = if args.simulate {
        Arc::new(simulate(&mut settings))
    } else {
        discovery::source_from_settings(&settings.discovery)?
    };

    let log = LogBuffer::new(settings.application.log_capacity);
    let registry = Arc::new(ReaderRegistry::from_settings(&settings)?);
    let storage_dir = settings.storage.default_path.clone();
    let mut coordinator = AcquisitionCoordinator::new(
        settings,
        registry,
        source,
        RecordingSurface::new(),
        Arc::new(log.clone()),
    )?;

    if let Some(path) = &args.load {
        coordinator
            .load_session(path)
            .with_context(|| format!("Failed to load session {}", path))?;
    }

    let interrupted = install_interrupt_flag()?;
    coordinator.start_reading()?;

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    while !interrupted.load(Ordering::Acquire) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        coordinator.run_for(STEP);
    }

    coordinator.stop_reading();
    coordinator.join_workers();

    for line in coordinator.availability_report() {
        println!("{}", line);
    }
    for channel in ChannelType::concrete() {
        let points = coordinator.latest_batch(channel).map_or(0, |b| b.len());
        let state = coordinator
            .worker_state(channel)
            .map_or_else(|| "absent".to_string(), |s| s.to_string());
        println!("{}: {} points, worker {}", channel, points, state);
    }

    if args.save {
        let path = coordinator.save_session(&storage_dir)?;
        println!("Session saved to {}", path.display());
    }

    coordinator.close_session();
    info!("serial_daq exited");
    Ok(())
}

/// Rewrites `settings` for a hardware-free run and returns the matching source.
fn simulate(settings: &mut Settings) -> StaticSource {
    let mut identities = Vec::new();
    for channel in ChannelType::concrete() {
        let key = channel.label().to_lowercase();
        settings
            .devices
            .insert(key.clone(), DeviceSettings::for_family(DeviceFamily::Simulated));
        let needle = settings
            .discovery
            .rules
            .entry(key)
            .or_insert_with(|| channel.label().to_string())
            .clone();
        identities.push(format!("sim-{}", needle));
    }
    let identities: Vec<&str> = identities.iter().map(String::as_str).collect();
    StaticSource::new("sim:", &identities)
}

/// Sets the returned flag on Ctrl-C.
fn install_interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&flag);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping acquisition");
                    handle.store(true, Ordering::Release);
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(flag)
}

fn init_logging(args: &Args) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("serial_daq={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
        Some("compact") => fmt::layer().compact().with_target(false).boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(args.debug)
            .boxed(),
        None => fmt::layer().with_target(true).with_thread_names(args.debug).boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
