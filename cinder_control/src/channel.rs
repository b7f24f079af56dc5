//! Tunnel command channel.
//!
//! Turns the asynchronous, potentially unreliable cross-process control
//! call into a typed request/response with an explicit timeout window.
//! Sends are serialized through a single outstanding request at a time;
//! the transport does not correlate concurrent calls.

use cinder_ipc::messages::{TunnelCommand, TunnelResponse};
use cinder_ipc::transport::{ControlConnector, ControlTransport};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};

/// Default window to wait for a worker reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends structured commands to the running tunnel worker and awaits one
/// correlated reply per command.
pub struct CommandChannel {
    connector: Box<dyn ControlConnector>,
    // One outstanding request at a time. Holding the connection behind the
    // same lock also keeps a late reply from bleeding into the next send.
    transport: Mutex<Option<Box<dyn ControlTransport>>>,
}

impl CommandChannel {
    pub fn new(connector: Box<dyn ControlConnector>) -> Self {
        CommandChannel {
            connector,
            transport: Mutex::new(None),
        }
    }

    /// Send one command and await its reply within `window`.
    ///
    /// On expiry the pending call resolves to `TunnelUnreachable` and the
    /// underlying connection is dropped, so a reply arriving late has no
    /// observable effect; the next send reconnects. No retry is performed
    /// here.
    pub async fn send(
        &self,
        command: &TunnelCommand,
        window: Duration,
    ) -> ControlResult<TunnelResponse> {
        validate(command)?;
        let payload = command.to_payload()?;

        let mut slot = self.transport.lock().await;
        if slot.is_none() {
            let transport = self.connector.connect().await.map_err(|e| {
                ControlError::TunnelUnreachable(format!(
                    "worker control endpoint unavailable: {}",
                    e
                ))
            })?;
            *slot = Some(transport);
        }
        let Some(transport) = slot.as_mut() else {
            return Err(ControlError::TunnelUnreachable(
                "worker control endpoint unavailable".to_string(),
            ));
        };

        debug!(command = command.name(), "sending tunnel command");
        match timeout(window, transport.exchange(&payload)).await {
            Err(_) => {
                *slot = None;
                warn!(command = command.name(), window = ?window, "tunnel command timed out");
                Err(ControlError::TunnelUnreachable(format!(
                    "no response to {} within {:?}",
                    command.name(),
                    window
                )))
            }
            Ok(Err(err)) => {
                *slot = None;
                Err(err.into())
            }
            Ok(Ok(None)) => Err(ControlError::TunnelUnreachable(format!(
                "worker returned no response to {}",
                command.name()
            ))),
            Ok(Ok(Some(bytes))) => TunnelResponse::from_bytes(bytes).map_err(|_| {
                ControlError::TunnelUnreachable("worker reply was not valid UTF-8".to_string())
            }),
        }
    }
}

/// Reject malformed commands locally, before any transmission occurs.
fn validate(command: &TunnelCommand) -> ControlResult<()> {
    if command.name().is_empty() {
        return Err(ControlError::InvalidArgument(
            "command name is empty".to_string(),
        ));
    }

    if let Some(kind) = command.kind() {
        for key in kind.required_args() {
            match command.arg(key) {
                Some(value) if !value.is_empty() => {}
                _ => {
                    return Err(ControlError::InvalidArgument(format!(
                        "{} requires a non-empty `{}` argument",
                        command.name(),
                        key
                    )))
                }
            }
        }
    }

    Ok(())
}
