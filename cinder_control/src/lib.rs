//! CinderVPN control plane.
//!
//! Manages the lifecycle of a VPN tunnel running in a separate worker
//! process and mediates all communication between the foreground
//! application and that worker: profile lifecycle, the cross-process
//! command/response channel, the connection-status state machine, and the
//! diagnostic log relay.
//!
//! The actual packet-forwarding engine is out of scope; it is consumed as
//! an opaque worker reachable through its control endpoint.

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod logs;
pub mod profile;
pub mod session;
pub mod status;
pub mod subscriber;

pub use error::{ControlError, ControlResult};
pub use session::SessionManager;
