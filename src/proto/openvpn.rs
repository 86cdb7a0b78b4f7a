//! OpenVPN protocol backend
//!
//! Peers live in 10.8.0.0/24 with sequentially allocated slots, projected
//! to the ifconfig-pool-persist file (ipp.txt) so the daemon hands every
//! client a stable address. The server definition itself does not depend
//! on the registry; only the pool file does. The registry persists as a
//! JSON snapshot and is restored at construction, so the sequential
//! allocator never re-hands a slot taken by an earlier process.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::VpnctlConfig;
use crate::error::VpnctlResult;
use crate::keys::KeySource;
use crate::proto::backend::{
    self, ProtocolBackend, ProtocolKind, ProtocolState, ProtocolStatus,
};
use crate::proto::identity::{SlotSpace, SlotStrategy};
use crate::proto::peers::{PeerRecord, PeerRegistry};
use crate::proto::render;
use crate::store::DefinitionStore;
use crate::supervise::{ExecSupervisor, ProcessSupervisor, StopStrategy, SupervisorHandle};
use crate::validation;

pub const DEFAULT_PORT: u16 = 1194;

const PROTOCOL_NAME: &str = "OpenVPN";
const DIR_NAME: &str = "openvpn";
const SERVER_DEFINITION: &str = "server.conf";
const POOL_FILE: &str = "ipp.txt";
const PEERS_FILE: &str = "peers.json";
const SUBNET_PREFIX: &str = "10.8.0";
const SLOT_BASE: u32 = 2;
const SLOT_CAPACITY: u32 = 252;

const FALLBACK_ENDPOINT_HOST: &str = "server_ip_address";

const CLIENT_TEMPLATE: &str = "\
client
dev {{DEV}}
proto {{PROTO}}
remote {{SERVER_ADDRESS}} {{SERVER_PORT}}
resolv-retry infinite
nobind
persist-key
persist-tun
remote-cert-tls server
cipher {{CIPHER}}
verb 3
key-direction 1
<ca>
{{CA_CERTIFICATE}}
</ca>
<cert>
{{CLIENT_CERTIFICATE}}
</cert>
<key>
{{CLIENT_KEY}}
</key>
<tls-auth>
{{TLS_AUTH_KEY}}
</tls-auth>
";

struct Inner {
    state: ProtocolState,
    registry: PeerRegistry,
    handle: Option<SupervisorHandle>,
}

pub struct OpenVpnBackend {
    port: u16,
    bind_address: Option<String>,
    proto: String,
    dev: String,
    cipher: String,
    dns: Vec<String>,
    endpoint_host: String,
    store: DefinitionStore,
    keys: Arc<dyn KeySource>,
    supervisor: Arc<dyn ProcessSupervisor>,
    inner: Mutex<Inner>,
}

/// Build an OpenVPN backend from configuration, bootstrapping its state
/// directory on first use
pub async fn create_backend(
    config: &VpnctlConfig,
    store: DefinitionStore,
    keys: Arc<dyn KeySource>,
    supervisor: Arc<dyn ProcessSupervisor>,
) -> VpnctlResult<Arc<dyn ProtocolBackend>> {
    let backend = OpenVpnBackend::new(config, store, keys, supervisor).await?;
    Ok(Arc::new(backend))
}

/// Supervisor that launches the openvpn daemon and retains its child
pub fn exec_supervisor() -> Arc<dyn ProcessSupervisor> {
    Arc::new(ExecSupervisor::new(
        vec!["openvpn".to_string(), "--config".to_string()],
        StopStrategy::KillChild,
    ))
}

impl OpenVpnBackend {
    pub async fn new(
        config: &VpnctlConfig,
        store: DefinitionStore,
        keys: Arc<dyn KeySource>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> VpnctlResult<Self> {
        let settings = &config.openvpn;

        store.ensure_protocol_dirs(DIR_NAME).await?;
        let registry = load_registry(&store).await?;

        let backend = Self {
            port: settings.port,
            bind_address: settings.bind_address.clone(),
            proto: settings.proto.clone(),
            dev: settings.dev.clone(),
            cipher: settings.cipher.clone(),
            dns: settings.dns.clone(),
            endpoint_host: config
                .server_address
                .clone()
                .unwrap_or_else(|| FALLBACK_ENDPOINT_HOST.to_string()),
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
            let initial = backend.render_server_definition();
            backend
                .store
                .write_definition(DIR_NAME, SERVER_DEFINITION, &initial)
                .await?;
            info!("Created default OpenVPN server definition");
        }

        Ok(backend)
    }

    /// Render server.conf from the backend identity
    fn render_server_definition(&self) -> String {
        let mut cfg = String::new();
        if let Some(bind) = &self.bind_address {
            cfg.push_str(&format!("local {}\n", bind));
        }
        cfg.push_str(&format!("port {}\n", self.port));
        cfg.push_str(&format!("proto {}\n", self.proto));
        cfg.push_str(&format!("dev {}\n", self.dev));
        cfg.push_str("ca ca.crt\n");
        cfg.push_str("cert server.crt\n");
        cfg.push_str("key server.key\n");
        cfg.push_str("dh dh.pem\n");
        cfg.push_str(&format!("server {}.0 255.255.255.0\n", SUBNET_PREFIX));
        cfg.push_str(&format!("ifconfig-pool-persist {}\n", POOL_FILE));
        cfg.push_str("push \"redirect-gateway def1 bypass-dhcp\"\n");
        for dns in &self.dns {
            cfg.push_str(&format!("push \"dhcp-option DNS {}\"\n", dns));
        }
        cfg.push_str("keepalive 10 120\n");
        cfg.push_str(&format!("cipher {}\n", self.cipher));
        cfg.push_str("user nobody\n");
        cfg.push_str("group nogroup\n");
        cfg.push_str("persist-key\n");
        cfg.push_str("persist-tun\n");
        cfg.push_str("status openvpn-status.log\n");
        cfg.push_str("verb 3\n");
        cfg
    }

    /// Render the ifconfig-pool-persist projection of the registry
    fn render_pool(registry: &PeerRegistry) -> String {
        let mut pool = String::new();
        for record in registry.iter() {
            pool.push_str(&format!(
                "{},{}.{}\n",
                record.client_id, SUBNET_PREFIX, record.slot
            ));
        }
        pool
    }

    fn render_client_document(&self, record: &PeerRecord) -> VpnctlResult<String> {
        render::render(
            CLIENT_TEMPLATE,
            &[
                ("DEV", self.dev.clone()),
                ("PROTO", self.proto.clone()),
                ("SERVER_ADDRESS", self.endpoint_host.clone()),
                ("SERVER_PORT", self.port.to_string()),
                ("CIPHER", self.cipher.clone()),
                ("CA_CERTIFICATE", "# ca certificate placeholder".to_string()),
                ("CLIENT_CERTIFICATE", record.keys.public_key.clone()),
                ("CLIENT_KEY", record.keys.private_key.clone()),
                ("TLS_AUTH_KEY", "# tls auth key placeholder".to_string()),
            ],
        )
    }
}

/// Rebuild the peer registry from its persisted snapshot, empty on first run
///
/// A snapshot that exists but fails to parse is an error: starting with
/// an empty registry would silently discard enrollments.
async fn load_registry(store: &DefinitionStore) -> VpnctlResult<PeerRegistry> {
    let space = SlotSpace::new(PROTOCOL_NAME, SLOT_BASE, SLOT_CAPACITY, SlotStrategy::Sequential);
    if store.definition_exists(DIR_NAME, PEERS_FILE) {
        let snapshot = store.read_definition(DIR_NAME, PEERS_FILE).await?;
        let registry = PeerRegistry::restore(space, &snapshot)?;
        debug!("Restored {} enrolled OpenVPN peers", registry.len());
        return Ok(registry);
    }
    Ok(PeerRegistry::new(space))
}

#[async_trait]
impl ProtocolBackend for OpenVpnBackend {
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
            let content = self.render_server_definition();
            let definition = self
                .store
                .write_definition(DIR_NAME, SERVER_DEFINITION, &content)
                .await?;
            self.store
                .write_definition(DIR_NAME, POOL_FILE, &Self::render_pool(registry))
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
            self.keys.issue(ProtocolKind::OpenVpn, client_id)
        })?;

        let document = self.render_client_document(&record)?;
        let pool = Self::render_pool(&inner.registry);
        let snapshot = inner.registry.snapshot()?;

        // Registry snapshot lands first: the pool can always be
        // regenerated from it, never the other way around
        self.store
            .write_definition(DIR_NAME, PEERS_FILE, &snapshot)
            .await?;
        self.store
            .write_definition(DIR_NAME, POOL_FILE, &pool)
            .await?;
        self.store
            .write_client_document(DIR_NAME, &format!("{}.ovpn", client_id), &document)
            .await?;

        debug!("Issued OpenVPN client configuration for {}", client_id);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::UuidKeySource;
    use crate::supervise::DryRunSupervisor;
    use tempfile::TempDir;

    async fn test_backend(server_address: Option<&str>) -> (OpenVpnBackend, TempDir) {
        let dir = TempDir::new().expect("tempdir failed");
        let mut config = VpnctlConfig::default();
        config.server_address = server_address.map(|s| s.to_string());

        let backend = OpenVpnBackend::new(
            &config,
            DefinitionStore::new(dir.path().to_path_buf()),
            Arc::new(UuidKeySource::new()),
            Arc::new(DryRunSupervisor::new()),
        )
        .await
        .expect("backend construction failed");
        (backend, dir)
    }

    #[tokio::test]
    async fn test_server_definition_layout() {
        let (backend, _dir) = test_backend(None).await;
        let definition = backend.render_server_definition();
        let lines: Vec<&str> = definition.lines().collect();

        assert_eq!(lines[0], "port 1194");
        assert_eq!(lines[1], "proto udp");
        assert_eq!(lines[2], "dev tun");
        assert_eq!(lines[3], "ca ca.crt");
        assert_eq!(lines[7], "server 10.8.0.0 255.255.255.0");
        assert_eq!(lines[8], "ifconfig-pool-persist ipp.txt");
        assert!(definition.contains("push \"dhcp-option DNS 8.8.8.8\""));
        assert!(definition.contains("cipher AES-256-GCM"));
        assert!(definition.ends_with("verb 3\n"));
    }

    #[tokio::test]
    async fn test_bind_address_renders_local_directive() {
        let dir = TempDir::new().expect("tempdir failed");
        let mut config = VpnctlConfig::default();
        config.openvpn.bind_address = Some("192.0.2.7".to_string());

        let backend = OpenVpnBackend::new(
            &config,
            DefinitionStore::new(dir.path().to_path_buf()),
            Arc::new(UuidKeySource::new()),
            Arc::new(DryRunSupervisor::new()),
        )
        .await
        .expect("backend construction failed");

        let definition = backend.render_server_definition();
        assert!(definition.starts_with("local 192.0.2.7\nport 1194\n"));
    }

    #[tokio::test]
    async fn test_client_document_layout() {
        let (backend, _dir) = test_backend(Some("vpn.example.com")).await;

        let doc = backend.client_config("alice").await.expect("client_config failed");
        let lines: Vec<&str> = doc.lines().collect();

        assert_eq!(lines[0], "client");
        assert_eq!(lines[1], "dev tun");
        assert_eq!(lines[2], "proto udp");
        assert_eq!(lines[3], "remote vpn.example.com 1194");
        assert!(doc.contains("remote-cert-tls server"));
        assert!(doc.contains("<ca>\n"));
        assert!(doc.contains("</tls-auth>\n"));
        assert!(!doc.contains("{{"));
    }

    #[tokio::test]
    async fn test_client_document_embeds_issued_material() {
        let (backend, _dir) = test_backend(None).await;

        let doc = backend.client_config("alice").await.expect("client_config failed");
        let record = {
            let inner = backend.inner.lock().await;
            inner.registry.get("alice").cloned().expect("no record")
        };

        assert!(doc.contains(&format!("<cert>\n{}\n</cert>", record.keys.public_key)));
        assert!(doc.contains(&format!("<key>\n{}\n</key>", record.keys.private_key)));
    }

    #[tokio::test]
    async fn test_pool_projection_is_sequential_and_sorted() {
        let (backend, dir) = test_backend(None).await;

        backend.client_config("carol").await.expect("client_config failed");
        backend.client_config("alice").await.expect("client_config failed");
        backend.client_config("bob").await.expect("client_config failed");

        let pool = tokio::fs::read_to_string(dir.path().join("openvpn/ipp.txt"))
            .await
            .expect("read failed");
        // First enrolled gets the lowest slot; projection stays id-sorted
        assert_eq!(pool, "alice,10.8.0.3\nbob,10.8.0.4\ncarol,10.8.0.2\n");
    }

    #[tokio::test]
    async fn test_client_config_is_idempotent() {
        let (backend, dir) = test_backend(None).await;

        let first = backend.client_config("alice").await.expect("client_config failed");
        let second = backend.client_config("alice").await.expect("client_config failed");
        assert_eq!(first, second);

        let pool = tokio::fs::read_to_string(dir.path().join("openvpn/ipp.txt"))
            .await
            .expect("read failed");
        assert_eq!(pool.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_slots_stay_distinct_across_reconstruction() {
        let dir = TempDir::new().expect("tempdir failed");
        let config = VpnctlConfig::default();
        let store = DefinitionStore::new(dir.path().to_path_buf());

        let first = OpenVpnBackend::new(
            &config,
            store.clone(),
            Arc::new(UuidKeySource::new()),
            Arc::new(DryRunSupervisor::new()),
        )
        .await
        .expect("backend construction failed");
        first.client_config("alice").await.expect("client_config failed");

        // A fresh backend over the same store must not re-hand alice's slot
        let second = OpenVpnBackend::new(
            &config,
            store,
            Arc::new(UuidKeySource::new()),
            Arc::new(DryRunSupervisor::new()),
        )
        .await
        .expect("backend construction failed");
        second.client_config("bob").await.expect("client_config failed");

        let pool = tokio::fs::read_to_string(dir.path().join("openvpn/ipp.txt"))
            .await
            .expect("read failed");
        assert_eq!(pool, "alice,10.8.0.2\nbob,10.8.0.3\n");
    }

    #[tokio::test]
    async fn test_start_writes_definition_and_pool() {
        let (backend, dir) = test_backend(None).await;

        backend.client_config("alice").await.expect("client_config failed");
        backend.start().await.expect("start failed");

        assert!(backend.is_running().await);
        assert!(dir.path().join("openvpn/server.conf").exists());
        assert!(dir.path().join("openvpn/ipp.txt").exists());
    }

    #[tokio::test]
    async fn test_client_documents_land_under_clients() {
        let (backend, dir) = test_backend(None).await;
        backend.client_config("alice").await.expect("client_config failed");

        assert!(dir.path().join("openvpn/clients/alice.ovpn").exists());
    }
}
