//! Control command and response definitions.
//!
//! A command is a flat string-to-string mapping serialized as a JSON object
//! with a `command` key naming the operation. Responses are plain UTF-8
//! strings, not JSON-wrapped. Each command yields exactly one reply or none
//! at all (the caller times out).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::transport::{IpcError, IpcResult};

/// Well-known reply strings used by the worker.
pub mod replies {
    pub const TUN2SOCKS_STARTED: &str = "TUN2SOCKS_STARTED";
    pub const VPN_STOPPED: &str = "VPN_STOPPED";
    pub const ASN_NAME_SET: &str = "ASN_NAME_SET";
    pub const LOCAL_TIMEZONE_SET: &str = "LOCAL_TIMEZONE_SET";
    /// Flag lookup result when the region is unknown.
    pub const UNKNOWN_FLAG: &str = "xx";
}

/// Fixed command vocabulary understood by the tunnel worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Start the SOCKS forwarding engine inside the worker
    StartTun2socks,
    /// Stop the SOCKS forwarding engine
    StopTun2socks,
    /// Measure round-trip time; replies with a numeric string
    MeasurePing,
    /// Look up the exit country/region code
    GetFlag,
    /// Start the VPN core with a cache directory, flow line and pattern
    StartVpn,
    /// Stop the VPN core
    StopVpn,
    /// Push the ASN name into the worker
    SetAsnName,
    /// Set the worker's local timezone (decimal-string offset)
    SetTimezone,
    /// Fetch the current flow line
    GetFlowLine,
}

impl CommandKind {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::StartTun2socks => "START_TUN2SOCKS",
            CommandKind::StopTun2socks => "STOP_TUN2SOCKS",
            CommandKind::MeasurePing => "MEASURE_PING",
            CommandKind::GetFlag => "GET_FLAG",
            CommandKind::StartVpn => "START_VPN",
            CommandKind::StopVpn => "STOP_VPN",
            CommandKind::SetAsnName => "SET_ASN_NAME",
            CommandKind::SetTimezone => "SET_TIMEZONE",
            CommandKind::GetFlowLine => "GET_FLOW_LINE",
        }
    }

    /// Look a command up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "START_TUN2SOCKS" => Some(CommandKind::StartTun2socks),
            "STOP_TUN2SOCKS" => Some(CommandKind::StopTun2socks),
            "MEASURE_PING" => Some(CommandKind::MeasurePing),
            "GET_FLAG" => Some(CommandKind::GetFlag),
            "START_VPN" => Some(CommandKind::StartVpn),
            "STOP_VPN" => Some(CommandKind::StopVpn),
            "SET_ASN_NAME" => Some(CommandKind::SetAsnName),
            "SET_TIMEZONE" => Some(CommandKind::SetTimezone),
            "GET_FLOW_LINE" => Some(CommandKind::GetFlowLine),
            _ => None,
        }
    }

    /// Argument keys that must be present and non-empty for this command.
    pub fn required_args(&self) -> &'static [&'static str] {
        match self {
            CommandKind::StartVpn => &["cacheDir", "flowLine", "pattern"],
            CommandKind::SetTimezone => &["timezone"],
            CommandKind::GetFlowLine => &["isTest"],
            _ => &[],
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single request to the tunnel worker.
///
/// Short-lived: constructed, sent, and discarded after a response or
/// timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelCommand {
    command: String,
    #[serde(flatten)]
    args: BTreeMap<String, String>,
}

impl TunnelCommand {
    /// Create a command with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        TunnelCommand {
            command: name.into(),
            args: BTreeMap::new(),
        }
    }

    /// Attach one string argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Wire name of the command.
    pub fn name(&self) -> &str {
        &self.command
    }

    /// Look up one argument.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// The vocabulary entry this command maps onto, if any.
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_name(&self.command)
    }

    /// Serialize into the flat JSON transport payload.
    pub fn to_payload(&self) -> IpcResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(IpcError::Serialization)
    }

    /// Parse a transport payload back into a command (worker side).
    pub fn from_payload(data: &[u8]) -> IpcResult<Self> {
        let command: TunnelCommand =
            serde_json::from_slice(data).map_err(IpcError::Serialization)?;
        if command.command.is_empty() {
            return Err(IpcError::Protocol("payload is missing a command".to_string()));
        }
        Ok(command)
    }
}

/// A single correlated reply from the tunnel worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResponse(String);

impl TunnelResponse {
    /// Interpret raw reply bytes as a UTF-8 string.
    pub fn from_bytes(data: Vec<u8>) -> IpcResult<Self> {
        String::from_utf8(data)
            .map(TunnelResponse)
            .map_err(|_| IpcError::Protocol("reply is not valid UTF-8".to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TunnelResponse {
    fn from(s: &str) -> Self {
        TunnelResponse(s.to_string())
    }
}

impl fmt::Display for TunnelResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
