//! WireGuard protocol backend
//!
//! Peers live in the tunnel subnet 10.0.0.0/24 with hash-derived slots,
//! so a client keeps its address across restarts. The server definition
//! (wg0.conf) and every issued client document are projections of the
//! peer registry, rewritten wholesale after each enrollment. The registry
//! itself persists as a JSON snapshot and is restored at construction, so
//! enrollments survive across processes.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::VpnctlConfig;
use crate::error::VpnctlResult;
use crate::keys::{KeyMaterial, KeySource};
use crate::proto::backend::{
    self, ProtocolBackend, ProtocolKind, ProtocolState, ProtocolStatus,
};
use crate::proto::identity::{SlotSpace, SlotStrategy};
use crate::proto::peers::{PeerRecord, PeerRegistry};
use crate::proto::render;
use crate::store::DefinitionStore;
use crate::supervise::{ExecSupervisor, ProcessSupervisor, StopStrategy, SupervisorHandle};
use crate::validation;

pub const DEFAULT_PORT: u16 = 51820;

const PROTOCOL_NAME: &str = "WireGuard";
const DIR_NAME: &str = "wireguard";
const SERVER_DEFINITION: &str = "wg0.conf";
const SERVER_PRIVATE_KEY: &str = "privatekey";
const SERVER_PUBLIC_KEY: &str = "publickey";
const PEERS_FILE: &str = "peers.json";
const SUBNET_PREFIX: &str = "10.0.0";
const SLOT_BASE: u32 = 10;
const SLOT_CAPACITY: u32 = 240;

/// Placeholder endpoint used when no public server address is configured
const FALLBACK_ENDPOINT_HOST: &str = "server_ip_address";

const CLIENT_TEMPLATE: &str = "\
[Interface]
PrivateKey = {{CLIENT_PRIVATE_KEY}}
Address = {{CLIENT_ADDRESS}}/32
DNS = {{DNS}}

[Peer]
PublicKey = {{SERVER_PUBLIC_KEY}}
AllowedIPs = 0.0.0.0/0
Endpoint = {{ENDPOINT_HOST}}:{{SERVER_PORT}}
PersistentKeepalive = {{KEEPALIVE}}
";

struct Inner {
    state: ProtocolState,
    registry: PeerRegistry,
    handle: Option<SupervisorHandle>,
}

pub struct WireGuardBackend {
    port: u16,
    endpoint_host: String,
    dns: String,
    keepalive: u32,
    server_keys: KeyMaterial,
    store: DefinitionStore,
    keys: Arc<dyn KeySource>,
    supervisor: Arc<dyn ProcessSupervisor>,
    inner: Mutex<Inner>,
}

/// Build a WireGuard backend from configuration, bootstrapping the state
/// directory and server keys on first use
pub async fn create_backend(
    config: &VpnctlConfig,
    store: DefinitionStore,
    keys: Arc<dyn KeySource>,
    supervisor: Arc<dyn ProcessSupervisor>,
) -> VpnctlResult<Arc<dyn ProtocolBackend>> {
    let backend = WireGuardBackend::new(config, store, keys, supervisor).await?;
    Ok(Arc::new(backend))
}

/// Supervisor that drives wg-quick against the persisted definition
pub fn exec_supervisor() -> Arc<dyn ProcessSupervisor> {
    Arc::new(ExecSupervisor::new(
        vec!["wg-quick".to_string(), "up".to_string()],
        StopStrategy::Command(vec!["wg-quick".to_string(), "down".to_string()]),
    ))
}

impl WireGuardBackend {
    pub async fn new(
        config: &VpnctlConfig,
        store: DefinitionStore,
        keys: Arc<dyn KeySource>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> VpnctlResult<Self> {
        let settings = &config.wireguard;

        store.ensure_protocol_dirs(DIR_NAME).await?;
        let server_keys = load_or_create_server_keys(&store, keys.as_ref()).await?;
        let registry = load_registry(&store).await?;

        let backend = Self {
            port: settings.port,
            endpoint_host: config
                .server_address
                .clone()
                .unwrap_or_else(|| FALLBACK_ENDPOINT_HOST.to_string()),
            dns: settings.dns.join(", "),
            keepalive: settings.keepalive,
            server_keys,
            store,
            keys,
            supervisor,
            inner: Mutex::new(Inner {
                state: ProtocolState::Stopped,
                registry,
                handle: None,
            }),
        };

        if !backend.store.definition_exists(DIR_NAME, SERVER_DEFINITION) {
            let initial = {
                let inner = backend.inner.lock().await;
                backend.render_server_definition(&inner.registry)
            };
            backend
                .store
                .write_definition(DIR_NAME, SERVER_DEFINITION, &initial)
                .await?;
            info!("Created default WireGuard server definition");
        }

        Ok(backend)
    }

    /// Render wg0.conf from the current registry
    fn render_server_definition(&self, registry: &PeerRegistry) -> String {
        let mut cfg = String::new();
        cfg.push_str("[Interface]\n");
        cfg.push_str(&format!("PrivateKey = {}\n", self.server_keys.private_key));
        cfg.push_str(&format!("Address = {}.1/24\n", SUBNET_PREFIX));
        cfg.push_str(&format!("ListenPort = {}\n", self.port));
        cfg.push_str("PostUp = iptables -A FORWARD -i wg0 -j ACCEPT; iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE\n");
        cfg.push_str("PostDown = iptables -D FORWARD -i wg0 -j ACCEPT; iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE\n");

        for record in registry.iter() {
            cfg.push_str(&format!("\n# {}\n", record.client_id));
            cfg.push_str("[Peer]\n");
            cfg.push_str(&format!("PublicKey = {}\n", record.keys.public_key));
            cfg.push_str(&format!("AllowedIPs = {}.{}/32\n", SUBNET_PREFIX, record.slot));
        }
        cfg
    }

    fn render_client_document(&self, record: &PeerRecord) -> VpnctlResult<String> {
        render::render(
            CLIENT_TEMPLATE,
            &[
                ("CLIENT_PRIVATE_KEY", record.keys.private_key.clone()),
                ("CLIENT_ADDRESS", format!("{}.{}", SUBNET_PREFIX, record.slot)),
                ("DNS", self.dns.clone()),
                ("SERVER_PUBLIC_KEY", self.server_keys.public_key.clone()),
                ("ENDPOINT_HOST", self.endpoint_host.clone()),
                ("SERVER_PORT", self.port.to_string()),
                ("KEEPALIVE", self.keepalive.to_string()),
            ],
        )
    }
}

/// Rebuild the peer registry from its persisted snapshot, empty on first run
///
/// A snapshot that exists but fails to parse is an error: starting with
/// an empty registry would silently discard enrollments.
async fn load_registry(store: &DefinitionStore) -> VpnctlResult<PeerRegistry> {
    let space = SlotSpace::new(PROTOCOL_NAME, SLOT_BASE, SLOT_CAPACITY, SlotStrategy::Hashed);
    if store.definition_exists(DIR_NAME, PEERS_FILE) {
        let snapshot = store.read_definition(DIR_NAME, PEERS_FILE).await?;
        let registry = PeerRegistry::restore(space, &snapshot)?;
        debug!("Restored {} enrolled WireGuard peers", registry.len());
        return Ok(registry);
    }
    Ok(PeerRegistry::new(space))
}

/// Reuse persisted server keys, generating and persisting them on first run
async fn load_or_create_server_keys(
    store: &DefinitionStore,
    keys: &dyn KeySource,
) -> VpnctlResult<KeyMaterial> {
    if store.definition_exists(DIR_NAME, SERVER_PRIVATE_KEY)
        && store.definition_exists(DIR_NAME, SERVER_PUBLIC_KEY)
    {
        let private_key = store.read_definition(DIR_NAME, SERVER_PRIVATE_KEY).await?;
        let public_key = store.read_definition(DIR_NAME, SERVER_PUBLIC_KEY).await?;
        debug!("Loaded existing WireGuard server keys");
        return Ok(KeyMaterial {
            private_key: private_key.trim().to_string(),
            public_key: public_key.trim().to_string(),
        });
    }

    let material = keys.issue(ProtocolKind::WireGuard, "server");
    store
        .write_definition(DIR_NAME, SERVER_PRIVATE_KEY, &material.private_key)
        .await?;
    store
        .write_definition(DIR_NAME, SERVER_PUBLIC_KEY, &material.public_key)
        .await?;
    info!("Generated WireGuard server keys");
    Ok(material)
}

#[async_trait]
impl ProtocolBackend for WireGuardBackend {
    fn name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn default_port(&self) -> u16 {
        DEFAULT_PORT
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn is_running(&self) -> bool {
        self.inner.lock().await.state == ProtocolState::Running
    }

    async fn start(&self) -> VpnctlResult<()> {
        let mut inner = self.inner.lock().await;
        let Inner {
            state,
            registry,
            handle,
        } = &mut *inner;

        backend::transition(PROTOCOL_NAME, state, ProtocolState::Running, async {
            let content = self.render_server_definition(registry);
            let definition = self
                .store
                .write_definition(DIR_NAME, SERVER_DEFINITION, &content)
                .await?;
            *handle = Some(self.supervisor.spawn(&definition).await?);
            Ok(())
        })
        .await
    }

    async fn stop(&self) -> VpnctlResult<()> {
        let mut inner = self.inner.lock().await;
        let Inner { state, handle, .. } = &mut *inner;

        backend::transition(PROTOCOL_NAME, state, ProtocolState::Stopped, async {
            if let Some(h) = handle.take() {
                if let Err(e) = self.supervisor.terminate(h).await {
                    // Keep the handle so a later stop can retry
                    *handle = Some(h);
                    return Err(e);
                }
            }
            Ok(())
        })
        .await
    }

    async fn client_config(&self, client_id: &str) -> VpnctlResult<String> {
        validation::validate_client_id(client_id)?;

        let mut inner = self.inner.lock().await;
        let record = inner.registry.enroll_with(client_id, || {
            self.keys.issue(ProtocolKind::WireGuard, client_id)
        })?;

        let document = self.render_client_document(&record)?;
        let definition = self.render_server_definition(&inner.registry);
        let snapshot = inner.registry.snapshot()?;

        // Registry snapshot lands first: the projections can always be
        // regenerated from it, never the other way around
        self.store
            .write_definition(DIR_NAME, PEERS_FILE, &snapshot)
            .await?;
        self.store
            .write_definition(DIR_NAME, SERVER_DEFINITION, &definition)
            .await?;
        self.store
            .write_client_document(DIR_NAME, &format!("{}.conf", client_id), &document)
            .await?;

        debug!("Issued WireGuard client configuration for {}", client_id);
        Ok(document)
    }

    async fn status(&self) -> ProtocolStatus {
        ProtocolStatus {
            name: PROTOCOL_NAME.to_string(),
            running: self.is_running().await,
            port: self.port,
        }
    }
}
