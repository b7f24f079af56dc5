//! Session manager facade.
//!
//! Composes the profile store, command channel, status observer and log
//! relay behind the operations the UI bridge calls. This is the only
//! component that mutates tunnel state or the active-profile reference,
//! and the only owner of the subscriber slots.

use async_trait::async_trait;
use cinder_ipc::messages::{TunnelCommand, TunnelResponse};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::channel::{CommandChannel, DEFAULT_COMMAND_TIMEOUT};
use crate::error::{ControlError, ControlResult};
use crate::logs::LogRelay;
use crate::profile::{PrepareOutcome, ProfileStore, TunnelProfile};
use crate::status::{ConnectionState, RawStatus, StatusObserver};
use crate::subscriber::SubscriptionHandle;

/// Platform-level start/stop of the tunnel for a profile. The packet
/// engine behind it is out of scope.
#[async_trait]
pub trait TunnelActivator: Send + Sync {
    /// Start the tunnel for the given profile.
    async fn activate(&self, profile: &TunnelProfile) -> ControlResult<()>;

    /// Stop the tunnel. Implementations should tolerate an already-stopped
    /// tunnel.
    async fn deactivate(&self) -> ControlResult<()>;
}

/// Source of raw platform status notifications, one feed per profile.
pub trait StatusSource: Send + Sync {
    fn subscribe(&self, profile: &TunnelProfile) -> mpsc::UnboundedReceiver<RawStatus>;
}

/// Source that never reports; the cached state stays `Disconnected`.
pub struct SilentStatusSource;

impl StatusSource for SilentStatusSource {
    fn subscribe(&self, _profile: &TunnelProfile) -> mpsc::UnboundedReceiver<RawStatus> {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }
}

/// The control-plane facade exposed to the UI bridge.
pub struct SessionManager {
    profiles: ProfileStore,
    channel: CommandChannel,
    activator: Box<dyn TunnelActivator>,
    source: Box<dyn StatusSource>,
    status: StatusObserver,
    logs: LogRelay,
    command_timeout: Duration,
}

impl SessionManager {
    /// Build the facade and start the log poller.
    pub fn new(
        profiles: ProfileStore,
        channel: CommandChannel,
        activator: Box<dyn TunnelActivator>,
        source: Box<dyn StatusSource>,
        logs: LogRelay,
    ) -> Self {
        logs.start();
        SessionManager {
            profiles,
            channel,
            activator,
            source,
            status: StatusObserver::new(),
            logs,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Ensure a usable, authorized profile exists. A declined authorization
    /// is an expected user choice and resolves to `Ok(false)`.
    pub async fn prepare(&self) -> ControlResult<bool> {
        let outcome = self.profiles.prepare().await?;
        self.refresh_status_feed();
        match outcome {
            PrepareOutcome::Granted => Ok(true),
            PrepareOutcome::Denied => {
                info!("tunnel authorization declined");
                Ok(false)
            }
        }
    }

    /// Reload an already-persisted profile without prompting. Returns
    /// whether one was found.
    pub async fn load(&self) -> ControlResult<bool> {
        let found = self.profiles.load().await?;
        if found {
            self.refresh_status_feed();
        }
        Ok(found)
    }

    /// Prepare, then activate. A failed or denied prepare short-circuits:
    /// no activation is attempted.
    pub async fn connect(&self) -> ControlResult<bool> {
        if !self.prepare().await? {
            return Ok(false);
        }
        let Some(profile) = self.profiles.active() else {
            return Err(ControlError::NotPrepared);
        };

        info!(name = %profile.name, "activating tunnel");
        self.activator.activate(&profile).await?;
        Ok(true)
    }

    /// Stop the tunnel. Idempotent: an absent profile or an
    /// already-stopped tunnel reports success.
    pub async fn disconnect(&self) -> ControlResult<()> {
        if self.profiles.active().is_none() {
            debug!("disconnect with no active profile; nothing to stop");
            return Ok(());
        }
        if self.status.current() == ConnectionState::Disconnected {
            debug!("tunnel already stopped");
            return Ok(());
        }

        info!("deactivating tunnel");
        self.activator.deactivate().await
    }

    /// Current normalized connection state. Never fails outward: unknown
    /// and not-running are indistinguishable, both read `Disconnected`.
    pub fn get_status(&self) -> ConnectionState {
        self.status.current()
    }

    /// Whether the tunnel is up or transitioning.
    pub fn is_running(&self) -> bool {
        self.status.current() != ConnectionState::Disconnected
    }

    /// Whether an authorized profile is in place.
    pub fn is_prepared(&self) -> bool {
        self.profiles.is_prepared()
    }

    /// Send one command to the tunnel worker and await its reply.
    pub async fn send_tunnel_command<I, K, V>(
        &self,
        name: &str,
        args: I,
    ) -> ControlResult<TunnelResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if !self.profiles.is_prepared() {
            return Err(ControlError::NotPrepared);
        }

        let mut command = TunnelCommand::new(name);
        for (key, value) in args {
            command = command.with_arg(key, value);
        }
        self.channel.send(&command, self.command_timeout).await
    }

    /// Subscribe to normalized status pushes; the current cached value is
    /// delivered immediately.
    pub fn subscribe_status(
        &self,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<ConnectionState>) {
        self.status.subscribe()
    }

    pub fn unsubscribe_status(&self, handle: &SubscriptionHandle) {
        self.status.unsubscribe(handle);
    }

    /// Subscribe to relayed diagnostic lines.
    pub fn subscribe_logs(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<String>) {
        self.logs.subscribe()
    }

    pub fn unsubscribe_logs(&self, handle: &SubscriptionHandle) {
        self.logs.unsubscribe(handle);
    }

    /// Re-subscribe the status observer to the (possibly new) active
    /// profile; the old feed is cancelled inside `attach`.
    fn refresh_status_feed(&self) {
        if let Some(profile) = self.profiles.active() {
            self.status.attach(self.source.subscribe(&profile));
        }
    }
}
