//! Binary entrypoint for the acconeer-link CLI.
//!
//! Commands:
//! - `init [--force]` - write a starter `acconeer-link.toml`
//! - `info` - connect, print what the device or server reports, disconnect
//! - `stream [-n <frames>]` - run the configured session and print a line per frame
//!
//! See the library crate docs for module level details: `acconeer_link::`.
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use acconeer_link::a111;
use acconeer_link::a121;
use acconeer_link::client::{
    Client, ExplorationClient, MockA121Client, MockClient, SensorGeneration, Session, SocketClient, UartClient,
};
use acconeer_link::config::{Config, LinkKind};
use acconeer_link::error::ClientError;
#[cfg(feature = "serial")]
use acconeer_link::link::serial::{SerialLink, DEFAULT_BAUDRATE};
use acconeer_link::link::SocketLink;
use acconeer_link::metrics;
use acconeer_link::record::Record;

#[derive(Parser)]
#[command(name = "acconeer-link")]
#[command(about = "Talk to Acconeer A111/A121 radar sensors")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "acconeer-link.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Connect and print server information
    Info,
    /// Stream frames from the configured session
    Stream {
        /// Frames to read; overrides `[session] frames`, 0 streams until Ctrl-C
        #[arg(short = 'n', long)]
        frames: Option<u32>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Info,
    Stream { frames: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let requested = match cli.command {
        Commands::Init { force } => return init_config(&cli.config, force, cli.verbose).await,
        Commands::Info => None,
        Commands::Stream { frames } => Some(frames),
    };

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    config.validate()?;

    let action = match requested {
        None => Action::Info,
        Some(frames) => Action::Stream {
            frames: frames.unwrap_or(config.session.frames),
        },
    };

    let stop = Arc::new(AtomicBool::new(false));
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping session");
            ctrl_c_stop.store(true, Ordering::SeqCst);
        }
    });

    // Clients are blocking; keep them off the runtime threads.
    tokio::task::spawn_blocking(move || run(&config, action, &stop))
        .await
        .context("client task panicked")??;

    let stats = metrics::snapshot();
    info!(
        "link stats: {} frames, {} recovered ({} bytes dropped), {} framing errors, {} JSON responses",
        stats.frames_received, stats.frames_recovered, stats.bytes_dropped, stats.framing_errors, stats.json_responses
    );
    Ok(())
}

async fn init_config(path: &str, force: bool, verbosity: u8) -> Result<()> {
    init_logging(&None, verbosity);
    if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
        bail!("{} already exists (use --force to overwrite)", path);
    }
    Config::create_default(path).await?;
    info!("Wrote default configuration to {}", path);
    Ok(())
}

fn run(config: &Config, action: Action, stop: &AtomicBool) -> Result<()> {
    let info = config.client_info()?;
    let session = &config.session;
    let link = &config.link;
    match (session.generation, link.kind) {
        (SensorGeneration::A111, LinkKind::Mock) => {
            drive(Client::new(MockClient::new(), info), session.a111_config(), config, action, stop, describe_a111)
        }
        (SensorGeneration::A121, LinkKind::Mock) => drive(
            Client::new(MockA121Client::new(), info),
            session.a121_config(),
            config,
            action,
            stop,
            describe_a121,
        ),
        (SensorGeneration::A111, LinkKind::Socket) => {
            let host = link.host.as_deref().ok_or_else(|| anyhow!("[link] host is missing"))?;
            let client = SocketClient::new(SocketLink::new(host, link.tcp_port));
            drive(Client::new(client, info), session.a111_config(), config, action, stop, describe_a111)
        }
        (SensorGeneration::A121, LinkKind::Socket) => {
            let host = link.host.as_deref().ok_or_else(|| anyhow!("[link] host is missing"))?;
            let client = ExplorationClient::new(SocketLink::new(host, link.tcp_port));
            drive(Client::new(client, info), session.a121_config(), config, action, stop, describe_a121)
        }
        #[cfg(feature = "serial")]
        (generation, LinkKind::Serial) => {
            let port = link.port.as_deref().ok_or_else(|| anyhow!("[link] port is missing"))?;
            match generation {
                SensorGeneration::A111 => {
                    let serial = SerialLink::new(port, link.baudrate.unwrap_or(DEFAULT_BAUDRATE));
                    let client = match link.baudrate {
                        Some(b) => UartClient::with_baudrate(serial, b),
                        None => UartClient::new(serial),
                    };
                    drive(Client::new(client, info), session.a111_config(), config, action, stop, describe_a111)
                }
                SensorGeneration::A121 => {
                    let serial = SerialLink::new(port, DEFAULT_BAUDRATE);
                    let client = match link.baudrate {
                        Some(b) => ExplorationClient::with_baudrate(serial, b),
                        None => ExplorationClient::new(serial),
                    };
                    drive(Client::new(client, info), session.a121_config(), config, action, stop, describe_a121)
                }
            }
        }
        #[cfg(not(feature = "serial"))]
        (_, LinkKind::Serial) => bail!("built without the `serial` feature"),
        (_, LinkKind::Spi) => bail!("no SPI driver is available in this build; use the library with your own Link"),
    }
}

fn drive<S>(
    mut client: Client<S>,
    session_config: S::Config,
    config: &Config,
    action: Action,
    stop: &AtomicBool,
    describe: fn(&S::Frame) -> String,
) -> Result<()>
where
    S: Session,
    S::Config: Clone,
    S::Metadata: Debug,
{
    client.session_mut().set_timeout(config.link.timeout());
    client.set_squeeze(config.session.squeeze);

    let version = client.connect()?.version_string.clone();
    info!("Connected via {}: {}", client.client_info(), version);
    let server_info = client.server_info().map(|s| s.to_json()).transpose()?;

    let frames = match action {
        Action::Info => {
            if let Some(json) = server_info {
                println!("{}", json);
            }
            client.disconnect()?;
            return Ok(());
        }
        Action::Stream { frames } => frames,
    };

    let metadata = client.setup_session(&session_config)?;
    info!("Session metadata: {:?}", metadata);
    client.start_session(None)?;

    let mut received = 0u32;
    while !stop.load(Ordering::SeqCst) && (frames == 0 || received < frames) {
        match client.get_next() {
            Ok(frame) => {
                println!("{:>6} {}", received, describe(&frame));
                received += 1;
            }
            Err(ClientError::SessionEnded) => {
                warn!("Server ended the session");
                break;
            }
            Err(e) => {
                if let Err(close) = client.disconnect() {
                    warn!("disconnect after stream error failed: {}", close);
                }
                return Err(e.into());
            }
        }
    }

    if client.session_is_started() {
        client.stop_session()?;
    }
    client.disconnect()?;
    info!("Received {} frames", received);
    Ok(())
}

fn describe_a111(frame: &a111::Frame) -> String {
    let peak = match &frame.data {
        a111::SweepData::Real(a) => a.iter().cloned().fold(f64::MIN, f64::max),
        a111::SweepData::Complex(a) => a.iter().map(|c| c.norm()).fold(f64::MIN, f64::max),
    };
    let flags: Vec<&str> = frame
        .info
        .iter()
        .flat_map(|i| {
            [
                (i.data_saturated, "saturated"),
                (i.missed_data, "missed"),
                (i.data_quality_warning, "quality"),
                (i.sensor_communication_error, "comm-error"),
            ]
        })
        .filter(|(set, _)| *set)
        .map(|(_, name)| name)
        .collect();
    format!("shape {:?} peak {:.1} {}", frame.data.shape(), peak, flags.join(","))
}

fn describe_a121(frame: &a121::Frame) -> String {
    frame
        .groups
        .iter()
        .flat_map(|g| g.iter())
        .map(|(id, r)| {
            let peak = r.frame.iter().map(|c| c.norm()).fold(0.0, f64::max);
            format!("s{} tick {} {:?} peak {:.1}", id, r.tick, r.frame.dim(), peak)
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Open the log file for appending; warns on stderr, as logging is not up yet.
fn open_log_file(path: &str) -> Option<std::fs::File> {
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("warning: can't open log file {}: {}; logging to the console only", path, e);
            None
        }
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| open_log_file(file));

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // Only echo to the console when someone is watching it
            let is_tty = atty::is(atty::Stream::Stderr);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}
