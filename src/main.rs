use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telecall::config::{AppConfig, ConfigStore};
use telecall::events::CallEvent;
use telecall::media::{MediaConstraints, SyntheticDevices};
use telecall::peer::RtcPeerLinkFactory;
use telecall::server;
use telecall::signaling::{appointment_room, RoomHub, SignalingChannel};
use telecall::{CallSession, CallStatus};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// telecall command line arguments
#[derive(Parser, Debug)]
#[command(name = "telecall")]
#[command(version, about = "Peer-to-peer consultation calls", long_about = None)]
struct CliArgs {
    /// Configuration file (created with defaults if missing)
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the rendezvous server
    Serve {
        /// Listen address (overrides config)
        #[arg(short = 'a', long, value_name = "ADDRESS")]
        address: Option<String>,

        /// Port (overrides config)
        #[arg(short = 'p', long, value_name = "PORT")]
        port: Option<u16>,
    },
    /// Join an appointment as a headless peer with synthetic media
    Call {
        /// Appointment id; the room is `appointment-<id>`
        #[arg(long, value_name = "ID")]
        appointment: String,

        /// Signaling endpoint (overrides config)
        #[arg(short = 'e', long, value_name = "URL")]
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);
    tracing::info!("Starting telecall v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.unwrap_or_else(get_config_path);
    let config_store = ConfigStore::new(&config_path).await?;
    let config = (*config_store.get()).clone();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for CTRL+C: {}", e),
        }
        signal.cancel();
    });

    match args.command {
        Command::Serve { address, port } => run_server(config, address, port, shutdown).await,
        Command::Call {
            appointment,
            endpoint,
        } => run_call(config, appointment, endpoint, shutdown).await,
    }
}

async fn run_server(
    mut config: AppConfig,
    address: Option<String>,
    port: Option<u16>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(address) = address {
        config.server.bind_address = address;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let listener = server::bind(&config.server).await?;
    server::serve(listener, RoomHub::new(), shutdown.cancelled_owned()).await?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn run_call(
    config: AppConfig,
    appointment: String,
    endpoint: Option<String>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let endpoint = endpoint.unwrap_or(config.signaling.endpoint.clone());
    let signaling = SignalingChannel::connect(&endpoint).await?;

    let session = CallSession::new(
        signaling.clone(),
        Arc::new(SyntheticDevices::new(config.media.clone())),
        Arc::new(RtcPeerLinkFactory::new(config.ice.clone())),
        MediaConstraints::from(&config.media),
    );
    let mut events = session.subscribe();

    let room_id = appointment_room(&appointment);
    if let Err(e) = session.initialize(&room_id, &appointment).await {
        tracing::error!("{}", e.user_message());
        signaling.disconnect();
        return Err(e.into());
    }
    tracing::info!("Waiting in room {} as {}", room_id, session.peer_id());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(CallEvent::StateChanged { status, connection, failure }) => {
                    tracing::info!("Call {} (media {:?})", status, connection);
                    if status == CallStatus::Ended {
                        if let Some(failure) = failure {
                            tracing::warn!("Call ended: {:?}", failure);
                        }
                        break;
                    }
                }
                Ok(event) => tracing::debug!("Call event: {}", event.event_name()),
                Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} call events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.end().await;
    signaling.disconnect();
    tracing::info!("Call finished");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "telecall=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "telecall=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "telecall=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "telecall=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "telecall=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "telecall=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Default configuration file location
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TELECALL_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("telecall.json")
}
