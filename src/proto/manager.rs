//! Unified entry point over all registered protocol backends
//!
//! The backend map is fixed after construction; only backend-internal
//! state changes at runtime. Lookup is case-insensitive on the protocol
//! name. Bulk operations run the backends concurrently and never let one
//! backend's failure touch another.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{SupervisorMode, VpnctlConfig};
use crate::error::{VpnctlError, VpnctlResult};
use crate::keys::{KeySource, UuidKeySource};
use crate::proto::backend::{ProtocolBackend, ProtocolStatus};
use crate::proto::{openvpn, wireguard};
use crate::store::DefinitionStore;
use crate::supervise::{DryRunSupervisor, ProcessSupervisor};

pub struct ProtocolManager {
    backends: HashMap<String, Arc<dyn ProtocolBackend>>,
}

impl ProtocolManager {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Build a manager with every enabled protocol from the configuration
    pub async fn from_config(config: &VpnctlConfig) -> VpnctlResult<Self> {
        Self::with_key_source(config, Arc::new(UuidKeySource::new())).await
    }

    /// Build from configuration with a caller-supplied key source
    pub async fn with_key_source(
        config: &VpnctlConfig,
        keys: Arc<dyn KeySource>,
    ) -> VpnctlResult<Self> {
        let store = DefinitionStore::new(config.state_dir.clone());
        let mut manager = Self::new();

        if config.wireguard.enabled {
            let supervisor = supervisor_for(config.supervisor, wireguard::exec_supervisor);
            manager.register(
                wireguard::create_backend(config, store.clone(), keys.clone(), supervisor).await?,
            );
        }
        if config.openvpn.enabled {
            let supervisor = supervisor_for(config.supervisor, openvpn::exec_supervisor);
            manager.register(
                openvpn::create_backend(config, store.clone(), keys.clone(), supervisor).await?,
            );
        }

        Ok(manager)
    }

    /// Register a backend under its lowercased name
    pub fn register(&mut self, backend: Arc<dyn ProtocolBackend>) {
        let key = backend.name().to_lowercase();
        info!("Registered {} backend on port {}", backend.name(), backend.port());
        self.backends.insert(key, backend);
    }

    /// Registered protocol names (display form), sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.values().map(|b| b.name().to_string()).collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Look up a backend by case-insensitive name
    pub fn get(&self, name: &str) -> VpnctlResult<&Arc<dyn ProtocolBackend>> {
        self.backends
            .get(&name.to_lowercase())
            .ok_or_else(|| VpnctlError::NotFound(name.to_string()))
    }

    pub async fn start(&self, name: &str) -> VpnctlResult<()> {
        self.get(name)?.start().await
    }

    pub async fn stop(&self, name: &str) -> VpnctlResult<()> {
        self.get(name)?.stop().await
    }

    pub async fn is_running(&self, name: &str) -> VpnctlResult<bool> {
        Ok(self.get(name)?.is_running().await)
    }

    pub async fn status(&self, name: &str) -> VpnctlResult<ProtocolStatus> {
        Ok(self.get(name)?.status().await)
    }

    /// Issue (or re-issue) a client document for one protocol
    pub async fn client_config(&self, name: &str, client_id: &str) -> VpnctlResult<String> {
        self.get(name)?.client_config(client_id).await
    }

    /// Status of every backend, sorted by name
    pub async fn status_all(&self) -> Vec<ProtocolStatus> {
        let mut statuses = join_all(self.backends.values().map(|b| b.status())).await;
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Start every backend concurrently; per-protocol outcome map
    ///
    /// A failing backend is reported as false and leaves the others alone.
    pub async fn start_all(&self) -> HashMap<String, bool> {
        let tasks = self.backends.values().map(|backend| {
            let backend = backend.clone();
            async move {
                let name = backend.name().to_string();
                match backend.start().await {
                    Ok(()) => (name, true),
                    Err(e) => {
                        warn!("Failed to start {}: {}", name, e);
                        (name, false)
                    }
                }
            }
        });
        join_all(tasks).await.into_iter().collect()
    }

    /// Stop every backend concurrently; per-protocol outcome map
    pub async fn stop_all(&self) -> HashMap<String, bool> {
        let tasks = self.backends.values().map(|backend| {
            let backend = backend.clone();
            async move {
                let name = backend.name().to_string();
                match backend.stop().await {
                    Ok(()) => (name, true),
                    Err(e) => {
                        warn!("Failed to stop {}: {}", name, e);
                        (name, false)
                    }
                }
            }
        });
        join_all(tasks).await.into_iter().collect()
    }
}

impl Default for ProtocolManager {
    fn default() -> Self {
        Self::new()
    }
}

fn supervisor_for(
    mode: SupervisorMode,
    exec: fn() -> Arc<dyn ProcessSupervisor>,
) -> Arc<dyn ProcessSupervisor> {
    match mode {
        SupervisorMode::DryRun => Arc::new(DryRunSupervisor::new()),
        SupervisorMode::Exec => exec(),
    }
}
