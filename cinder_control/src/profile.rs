//! Tunnel profile lifecycle.
//!
//! A profile is the persisted tunnel configuration recognized by the host
//! platform. The store is the only owner of the active profile; everyone
//! else holds a non-owning handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{ControlError, ControlResult};

/// Routing inclusion rule for a tunnel profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingRule {
    /// Route everything except local networks through the tunnel
    ExcludeLocalNetworks,
    /// Route all traffic through the tunnel
    IncludeAll,
}

/// One persisted tunnel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelProfile {
    /// Display name of the profile
    pub name: String,
    /// Identifier of the worker process/bundle providing the tunnel
    pub provider_id: String,
    /// Address the worker's local proxy binds to
    pub address: String,
    /// Port of the worker's local proxy
    pub port: u16,
    /// MTU for the tunnel interface
    pub mtu: u32,
    /// Routing inclusion rule
    pub routing: RoutingRule,
    /// Whether the profile is enabled in the registry
    pub enabled: bool,
}

impl Default for TunnelProfile {
    fn default() -> Self {
        TunnelProfile {
            name: "CinderVPN".to_string(),
            provider_id: "dev.cinder.cindervpn.worker".to_string(),
            address: "127.0.0.1".to_string(),
            port: 5000,
            mtu: 1280,
            routing: RoutingRule::ExcludeLocalNetworks,
            enabled: true,
        }
    }
}

/// The platform VPN-configuration registry.
#[async_trait]
pub trait ProfileRegistry: Send + Sync {
    /// Load the persisted profile, if one exists.
    async fn load(&self) -> ControlResult<Option<TunnelProfile>>;

    /// Persist the profile, replacing any previous record.
    async fn save(&self, profile: &TunnelProfile) -> ControlResult<()>;
}

/// File-backed registry standing in for the platform store.
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProfileRegistry for FileRegistry {
    async fn load(&self) -> ControlResult<Option<TunnelProfile>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ControlError::PersistenceFailure(format!(
                    "failed to read profile registry {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            ControlError::PersistenceFailure(format!(
                "failed to parse profile registry {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn save(&self, profile: &TunnelProfile) -> ControlResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ControlError::PersistenceFailure(format!(
                    "failed to create registry directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let serialized = serde_json::to_vec_pretty(profile)
            .map_err(|e| ControlError::EncodingFailure(e.to_string()))?;

        fs::write(&self.path, serialized).await.map_err(|e| {
            ControlError::PersistenceFailure(format!(
                "failed to write profile registry {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Platform/user consent gate awaited before a profile may be activated.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    /// Ask whether the profile may be activated. Declining is an expected
    /// user choice, not an error.
    async fn request_authorization(&self, profile: &TunnelProfile) -> ControlResult<bool>;
}

/// Gate that grants without prompting, for hosts where consent was obtained
/// out of band.
pub struct AutoGrantGate;

#[async_trait]
impl AuthorizationGate for AutoGrantGate {
    async fn request_authorization(&self, _profile: &TunnelProfile) -> ControlResult<bool> {
        Ok(true)
    }
}

/// Outcome of preparing the tunnel profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    Granted,
    Denied,
}

/// Loads, creates and persists the single tunnel profile and tracks the
/// authorization grant for it.
pub struct ProfileStore {
    registry: Box<dyn ProfileRegistry>,
    gate: Box<dyn AuthorizationGate>,
    active: Mutex<Option<Arc<TunnelProfile>>>,
    // Only positive grants are cached; a denial is re-asked on the next
    // prepare so the user can change their mind.
    granted: Mutex<bool>,
}

impl ProfileStore {
    pub fn new(registry: Box<dyn ProfileRegistry>, gate: Box<dyn AuthorizationGate>) -> Self {
        ProfileStore {
            registry,
            gate,
            active: Mutex::new(None),
            granted: Mutex::new(false),
        }
    }

    /// Ensure a usable profile exists and is authorized.
    ///
    /// Creates and persists a default profile when none is stored, then
    /// requests authorization. Idempotent: a second call without teardown
    /// reuses the profile and the recorded grant.
    pub async fn prepare(&self) -> ControlResult<PrepareOutcome> {
        let profile = match self.active() {
            Some(profile) => profile,
            None => {
                let profile = match self.registry.load().await? {
                    Some(profile) => {
                        info!(name = %profile.name, "loaded persisted tunnel profile");
                        Arc::new(profile)
                    }
                    None => {
                        let profile = TunnelProfile::default();
                        self.registry.save(&profile).await?;
                        info!(name = %profile.name, "created default tunnel profile");
                        Arc::new(profile)
                    }
                };
                *self.active.lock().unwrap() = Some(Arc::clone(&profile));
                profile
            }
        };

        if *self.granted.lock().unwrap() {
            return Ok(PrepareOutcome::Granted);
        }

        if self.gate.request_authorization(&profile).await? {
            *self.granted.lock().unwrap() = true;
            Ok(PrepareOutcome::Granted)
        } else {
            debug!(name = %profile.name, "authorization denied for tunnel profile");
            Ok(PrepareOutcome::Denied)
        }
    }

    /// Best-effort reload of an already-persisted profile, without
    /// prompting for authorization. Returns whether one was found.
    pub async fn load(&self) -> ControlResult<bool> {
        match self.registry.load().await? {
            Some(profile) => {
                // Replace the handle; the previous profile is never mutated
                // in place.
                *self.active.lock().unwrap() = Some(Arc::new(profile));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Non-owning handle to the active profile.
    pub fn active(&self) -> Option<Arc<TunnelProfile>> {
        self.active.lock().unwrap().clone()
    }

    /// Whether an authorized profile is in place.
    pub fn is_prepared(&self) -> bool {
        self.active.lock().unwrap().is_some() && *self.granted.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemoryRegistry {
        stored: Mutex<Option<TunnelProfile>>,
        saves: AtomicUsize,
    }

    impl MemoryRegistry {
        fn new(initial: Option<TunnelProfile>) -> Self {
            MemoryRegistry {
                stored: Mutex::new(initial),
                saves: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfileRegistry for &'static MemoryRegistry {
        async fn load(&self) -> ControlResult<Option<TunnelProfile>> {
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn save(&self, profile: &TunnelProfile) -> ControlResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.stored.lock().unwrap() = Some(profile.clone());
            Ok(())
        }
    }

    struct StaticGate(bool);

    #[async_trait]
    impl AuthorizationGate for StaticGate {
        async fn request_authorization(&self, _profile: &TunnelProfile) -> ControlResult<bool> {
            Ok(self.0)
        }
    }

    fn leak_registry(initial: Option<TunnelProfile>) -> &'static MemoryRegistry {
        Box::leak(Box::new(MemoryRegistry::new(initial)))
    }

    #[tokio::test]
    async fn test_prepare_creates_default_profile() {
        let registry = leak_registry(None);
        let store = ProfileStore::new(Box::new(registry), Box::new(StaticGate(true)));

        let outcome = store.prepare().await.unwrap();
        assert_eq!(outcome, PrepareOutcome::Granted);

        let profile = store.active().expect("active profile");
        assert_eq!(profile.address, "127.0.0.1");
        assert_eq!(profile.port, 5000);
        assert_eq!(profile.mtu, 1280);
        assert_eq!(profile.routing, RoutingRule::ExcludeLocalNetworks);
        assert!(store.is_prepared());
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let registry = leak_registry(None);
        let store = ProfileStore::new(Box::new(registry), Box::new(StaticGate(true)));

        assert_eq!(store.prepare().await.unwrap(), PrepareOutcome::Granted);
        let first = store.active().unwrap();
        assert_eq!(store.prepare().await.unwrap(), PrepareOutcome::Granted);
        let second = store.active().unwrap();

        // No duplicate profile is created or persisted.
        assert_eq!(registry.saves.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_prepare_reuses_persisted_profile() {
        let persisted = TunnelProfile {
            port: 6000,
            ..TunnelProfile::default()
        };
        let registry = leak_registry(Some(persisted));
        let store = ProfileStore::new(Box::new(registry), Box::new(StaticGate(true)));

        store.prepare().await.unwrap();
        assert_eq!(store.active().unwrap().port, 6000);
        assert_eq!(registry.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_denied_gate_leaves_store_unprepared() {
        let registry = leak_registry(None);
        let store = ProfileStore::new(Box::new(registry), Box::new(StaticGate(false)));

        assert_eq!(store.prepare().await.unwrap(), PrepareOutcome::Denied);
        assert!(store.active().is_some());
        assert!(!store.is_prepared());
    }

    #[tokio::test]
    async fn test_load_without_profile_reports_absence() {
        let registry = leak_registry(None);
        let store = ProfileStore::new(Box::new(registry), Box::new(StaticGate(true)));

        assert!(!store.load().await.unwrap());
        assert!(store.active().is_none());
    }

    #[tokio::test]
    async fn test_load_replaces_active_handle() {
        let registry = leak_registry(Some(TunnelProfile::default()));
        let store = ProfileStore::new(Box::new(registry), Box::new(StaticGate(true)));

        assert!(store.load().await.unwrap());
        let first = store.active().unwrap();
        assert!(store.load().await.unwrap());
        let second = store.active().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_file_registry_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(dir.path().join("profiles").join("cinder.json"));

        assert!(registry.load().await.unwrap().is_none());

        let profile = TunnelProfile::default();
        registry.save(&profile).await.unwrap();
        assert_eq!(registry.load().await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_file_registry_surfaces_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let registry = FileRegistry::new(&path);
        let err = registry.load().await.unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_FAILURE");
    }
}
