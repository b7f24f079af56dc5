//! CinderVPN control CLI.
//!
//! A thin bridge over the session manager: each subcommand maps onto one
//! facade operation and prints a single reply, or a structured
//! `(code, message)` error. All tunnel state lives behind the facade; this
//! binary holds none of its own.

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use cinder_control::channel::CommandChannel;
use cinder_control::config::ControlConfig;
use cinder_control::error::{ControlError, ControlResult};
use cinder_control::logging::{init_logging, parse_level, LogOptions};
use cinder_control::logs::{BoundedLogBuffer, LogRelay};
use cinder_control::profile::{AutoGrantGate, FileRegistry, ProfileStore, TunnelProfile};
use cinder_control::session::{SessionManager, SilentStatusSource, TunnelActivator};
use cinder_ipc::transport::{ControlTransport, UnixConnector, UnixSocketTransport};

/// Command-line arguments for the control CLI
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the tunnel worker's control socket
    #[clap(short = 's', long)]
    worker_socket: Option<PathBuf>,

    /// Path to the profile registry file
    #[clap(long)]
    registry: Option<PathBuf>,

    /// Path to the configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[clap(short, long, default_value = "info")]
    log_level: String,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Command,
}

/// Subcommands for the control CLI
#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure a tunnel profile exists and is authorized
    Prepare,

    /// Report whether an authorized profile is in place
    IsPrepared,

    /// Prepare, then activate the tunnel
    Connect,

    /// Stop the tunnel (succeeds when already stopped)
    Disconnect,

    /// Print the current connection status
    Status,

    /// Report whether the tunnel is up or transitioning
    IsRunning,

    /// Send one command to the tunnel worker
    Send {
        /// Command name, e.g. MEASURE_PING or SET_TIMEZONE
        name: String,

        /// Command arguments as key=value pairs
        #[clap(long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{}`", s)),
    }
}

/// Activator for an externally managed worker: activation probes the
/// control endpoint, deactivation is left to whoever runs the worker.
struct SocketProbeActivator {
    socket_path: PathBuf,
}

#[async_trait]
impl TunnelActivator for SocketProbeActivator {
    async fn activate(&self, profile: &TunnelProfile) -> ControlResult<()> {
        debug!(name = %profile.name, "probing worker control endpoint");
        let mut transport = UnixSocketTransport::connect(&self.socket_path)
            .await
            .map_err(|e| {
                ControlError::TunnelUnreachable(format!(
                    "worker not reachable at {}: {}",
                    self.socket_path.display(),
                    e
                ))
            })?;
        let _ = transport.close().await;
        Ok(())
    }

    async fn deactivate(&self) -> ControlResult<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _guard = init_logging(LogOptions {
        level: parse_level(&args.log_level),
        ..Default::default()
    });

    let config = ControlConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let worker_socket = args.worker_socket.unwrap_or_else(|| config.worker_socket.clone());
    let registry_path = args.registry.unwrap_or_else(|| config.registry_path.clone());

    debug!(
        worker_socket = %worker_socket.display(),
        registry = %registry_path.display(),
        "control plane starting"
    );

    let session = SessionManager::new(
        ProfileStore::new(
            Box::new(FileRegistry::new(registry_path)),
            Box::new(AutoGrantGate),
        ),
        CommandChannel::new(Box::new(UnixConnector::new(worker_socket.clone()))),
        Box::new(SocketProbeActivator {
            socket_path: worker_socket,
        }),
        Box::new(SilentStatusSource),
        LogRelay::new(
            Arc::new(BoundedLogBuffer::new(config.log_capacity)),
            config.poll_interval(),
        ),
    )
    .with_command_timeout(config.command_timeout());

    if let Err(err) = run(&session, args.command).await {
        let (code, message) = err.reply();
        eprintln!("error[{}]: {}", code, message);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(session: &SessionManager, command: Command) -> ControlResult<()> {
    match command {
        Command::Prepare => {
            let granted = session.prepare().await?;
            println!("{}", if granted { "granted" } else { "denied" });
        }
        Command::IsPrepared => {
            println!("{}", session.is_prepared());
        }
        Command::Connect => {
            if session.connect().await? {
                info!("tunnel activation requested");
                println!("connected");
            } else {
                println!("denied");
            }
        }
        Command::Disconnect => {
            session.disconnect().await?;
            println!("disconnected");
        }
        Command::Status => {
            println!("{}", session.get_status());
        }
        Command::IsRunning => {
            println!("{}", session.is_running());
        }
        Command::Send { name, args } => {
            // Sending is not allowed to create a profile as a side effect;
            // one must already be persisted. Prepare only re-obtains the
            // in-memory grant for it.
            if !session.load().await? {
                return Err(ControlError::NotPrepared);
            }
            session.prepare().await?;
            let response = session.send_tunnel_command(&name, args).await?;
            println!("{}", response);
        }
    }
    Ok(())
}
