pub mod actuator;
pub mod config;
pub mod input;
pub mod mapping;
pub mod service;

use crate::actuator::{Actuator, DesktopNotifier, Notifier, PactlActuator, SilentNotifier};
use crate::config::KnobConfig;
use crate::input::source::UnavailableReason;
use crate::input::{
    list_input_devices, AnySource, Committed, PrimaryOutcome, SecondaryOutcome, SourceError,
    SourceSupervisor, INPUT_BY_ID_DIR,
};
use crate::service::KnobService;
use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const EXIT_SOURCE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_ACTUATOR: u8 = 3;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup()?;

    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version land here too
            let code = if e.use_stderr() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::SUCCESS
            };
            e.print()?;
            return Ok(code);
        }
    };
    let config_path = args.config.clone().unwrap_or_else(KnobConfig::default_path);

    if args.write_default_config {
        return match KnobConfig::write_default(&config_path).await {
            Ok(()) => Ok(ExitCode::SUCCESS),
            Err(e) => {
                error!("{}", e);
                Ok(ExitCode::from(EXIT_CONFIG))
            }
        };
    }

    let mut config = match KnobConfig::load(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            info!("Fix the file or regenerate it with --write-default-config");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    if let Some(device) = args.device {
        info!("Using device {} from command line", device.display());
        config.source.device_path = device;
    }

    let mut actuator = PactlActuator::new(config.actuator.sink.clone());
    match actuator.get_volume().await {
        Ok(volume) => info!("Volume backend ready, sink {} at {}%", actuator.sink(), volume),
        Err(e) => {
            error!("Volume backend unusable: {}", e);
            info!("Make sure pactl is installed and an audio server is running");
            return Ok(ExitCode::from(EXIT_ACTUATOR));
        }
    }

    let limiter = config.rate_limiter();
    let dispatcher = config.dispatcher();
    info!(
        "Debounce {}ms, sensitivity {} per tick",
        limiter.min_interval().as_millis(),
        dispatcher.multiplier()
    );

    let stop = CancellationToken::new();
    spawn_signal_listener(stop.clone())?;

    let committed = match select_source(&config, &stop).await {
        Selection::Committed(committed) => committed,
        Selection::Cancelled => {
            info!("Stopped before any input source was committed");
            return Ok(ExitCode::SUCCESS);
        }
        Selection::Fatal => return Ok(ExitCode::from(EXIT_SOURCE)),
    };

    let code = if config.actuator.notifications {
        let notifier = DesktopNotifier::new("volume-knob", config.actuator.notify_timeout_ms);
        let service = KnobService::new(
            config.normalizer(),
            limiter,
            dispatcher,
            actuator,
            notifier,
            config.poll_timeout(),
        );
        run_service(service, committed, &stop).await
    } else {
        let service = KnobService::new(
            config.normalizer(),
            limiter,
            dispatcher,
            actuator,
            SilentNotifier,
            config.poll_timeout(),
        );
        run_service(service, committed, &stop).await
    };
    Ok(code)
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = match std::env::var("RUST_LOG").as_deref() {
        Ok("trace") => Level::TRACE,
        Ok("debug") => Level::DEBUG,
        Ok("warn") => Level::WARN,
        Ok("error") => Level::ERROR,
        _ => Level::INFO,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// SIGINT or SIGTERM cancels the stop token
fn spawn_signal_listener(stop: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| eyre!("Failed to listen for SIGTERM: {}", e))?;
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Could not listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received SIGINT, shutting down");
            }
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
        stop.cancel();
    });
    Ok(())
}

#[derive(Debug)]
enum Selection {
    Committed(Committed<AnySource>),
    Cancelled,
    Fatal,
}

async fn select_source(config: &KnobConfig, stop: &CancellationToken) -> Selection {
    let supervisor = SourceSupervisor::create(config.fallback_settings(), config.normalizer());

    let primary_spec = config.primary_spec();
    let opened = primary_spec.open().await;
    let secondary = match supervisor.watch(opened, stop).await {
        Ok(PrimaryOutcome::Committed(committed)) => return Selection::Committed(committed),
        Ok(PrimaryOutcome::Cancelled) => return Selection::Cancelled,
        Ok(PrimaryOutcome::Fallback(secondary)) => secondary,
        Err(e) => {
            error!("Cannot open {}: {}", primary_spec.identifier(), e);
            print_source_hint(&e, &primary_spec.identifier());
            return Selection::Fatal;
        }
    };

    let opened = match config.secondary_spec() {
        Some(spec) => {
            let opened = spec.open().await;
            if let Err(e) = &opened {
                print_source_hint(e, &spec.identifier());
            }
            opened
        }
        None => Err(SourceError::Unavailable {
            identifier: "secondary".to_string(),
            reason: UnavailableReason::Other,
            message: "no fallback source configured".to_string(),
        }),
    };
    match secondary.engage(opened, stop).await {
        SecondaryOutcome::Committed(committed) => Selection::Committed(committed),
        SecondaryOutcome::Cancelled => Selection::Cancelled,
        SecondaryOutcome::Failed(failed) => {
            error!(
                "No usable input source ({:?}): {}",
                failed.state(),
                failed.reason()
            );
            Selection::Fatal
        }
    }
}

fn print_source_hint(error: &SourceError, identifier: &str) {
    match error.unavailable_reason() {
        Some(UnavailableReason::PermissionDenied) => {
            info!("Permission denied on {}", identifier);
            info!("Try running with sudo or add your user to the input group:");
            info!("  sudo usermod -a -G input $USER");
        }
        Some(UnavailableReason::NotFound) => {
            info!("{} not found, check that the keyboard is connected", identifier);
            let devices = list_input_devices(Path::new(INPUT_BY_ID_DIR));
            if devices.is_empty() {
                info!("No devices listed under {}", INPUT_BY_ID_DIR);
            } else {
                info!("Available input devices:");
                for device in devices {
                    info!("  {}", device);
                }
            }
        }
        _ => {}
    }
}

async fn run_service<A: Actuator, N: Notifier>(
    mut service: KnobService<A, N>,
    committed: Committed<AnySource>,
    stop: &CancellationToken,
) -> ExitCode {
    match service.run(committed, stop).await {
        Ok(summary) => {
            info!(
                "Volume knob stopped after {} actions",
                summary.actions_applied
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_SOURCE)
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "volume-knob",
    version,
    about = "Turns a horizontal scroll wheel into a volume knob"
)]
struct Cli {
    /// Config file, defaults to $VOLUME_KNOB_CONFIG or the user config directory
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the default config to the config path and exit
    #[arg(long = "write-default-config")]
    write_default_config: bool,

    /// Input device, overrides source.device_path
    #[arg(value_name = "DEVICE")]
    device: Option<PathBuf>,
}
