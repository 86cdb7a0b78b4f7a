//! Durable storage for server definitions and issued client bundles
//!
//! Layout under the state root: one directory per protocol holding its
//! server-side files, with issued client documents in a `clients/`
//! subdirectory. Every write lands in a temp sibling first and is moved
//! into place with an atomic rename, so a concurrent reader never
//! observes a half-written document.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{VpnctlError, VpnctlResult};

/// File mode for written definitions (contain key material)
const SECURE_MODE: u32 = 0o600;

#[derive(Debug, Clone)]
pub struct DefinitionStore {
    root: PathBuf,
}

impl DefinitionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one protocol's server-side files
    pub fn protocol_dir(&self, protocol: &str) -> PathBuf {
        self.root.join(protocol)
    }

    /// Path of a server-side file for one protocol
    pub fn definition_path(&self, protocol: &str, file_name: &str) -> PathBuf {
        self.protocol_dir(protocol).join(file_name)
    }

    /// Path of one issued client document
    pub fn client_document_path(&self, protocol: &str, file_name: &str) -> PathBuf {
        self.protocol_dir(protocol).join("clients").join(file_name)
    }

    /// Create the directory tree for one protocol
    pub async fn ensure_protocol_dirs(&self, protocol: &str) -> VpnctlResult<()> {
        let clients_dir = self.protocol_dir(protocol).join("clients");
        tokio::fs::create_dir_all(&clients_dir)
            .await
            .map_err(|e| VpnctlError::Synthesis(
                format!("Failed to create {:?}: {}", clients_dir, e)
            ))?;
        Ok(())
    }

    /// Atomically write a server-side file for one protocol
    pub async fn write_definition(
        &self,
        protocol: &str,
        file_name: &str,
        content: &str,
    ) -> VpnctlResult<PathBuf> {
        let path = self.definition_path(protocol, file_name);
        write_atomic(&path, content, SECURE_MODE).await?;
        Ok(path)
    }

    /// Atomically write one issued client document
    pub async fn write_client_document(
        &self,
        protocol: &str,
        file_name: &str,
        content: &str,
    ) -> VpnctlResult<PathBuf> {
        let path = self.client_document_path(protocol, file_name);
        write_atomic(&path, content, SECURE_MODE).await?;
        Ok(path)
    }

    /// Read a server-side file back
    pub async fn read_definition(&self, protocol: &str, file_name: &str) -> VpnctlResult<String> {
        let path = self.definition_path(protocol, file_name);
        Ok(tokio::fs::read_to_string(&path).await?)
    }

    /// Whether a server-side file exists
    pub fn definition_exists(&self, protocol: &str, file_name: &str) -> bool {
        self.definition_path(protocol, file_name).exists()
    }
}

/// Write content through a temp sibling, then rename into place
async fn write_atomic(path: &Path, content: &str, permissions: u32) -> VpnctlResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let parent = path.parent().ok_or_else(|| VpnctlError::Synthesis(
        format!("Path {:?} has no parent directory", path)
    ))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| VpnctlError::Synthesis(
            format!("Failed to create {:?}: {}", parent, e)
        ))?;

    let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        VpnctlError::Synthesis(format!("Path {:?} has no valid file name", path))
    })?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| VpnctlError::Synthesis(
            format!("Failed to write {:?}: {}", tmp_path, e)
        ))?;

    let perms = std::fs::Permissions::from_mode(permissions);
    tokio::fs::set_permissions(&tmp_path, perms)
        .await
        .map_err(|e| VpnctlError::Synthesis(
            format!("Failed to set permissions on {:?}: {}", tmp_path, e)
        ))?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| VpnctlError::Synthesis(
            format!("Failed to move {:?} into place: {}", tmp_path, e)
        ))?;

    debug!("Wrote {:?} with permissions {:o}", path, permissions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read_definition() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = DefinitionStore::new(dir.path().to_path_buf());

        store.ensure_protocol_dirs("wireguard").await.expect("ensure failed");
        let path = store
            .write_definition("wireguard", "wg0.conf", "[Interface]\n")
            .await
            .expect("write failed");

        assert!(path.ends_with("wireguard/wg0.conf"));
        assert!(store.definition_exists("wireguard", "wg0.conf"));
        let content = store.read_definition("wireguard", "wg0.conf").await.expect("read failed");
        assert_eq!(content, "[Interface]\n");

        // No temp sibling left behind
        assert!(!store.definition_path("wireguard", ".wg0.conf.tmp").exists());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = DefinitionStore::new(dir.path().to_path_buf());

        store.write_definition("openvpn", "server.conf", "port 1194\n").await.expect("write failed");
        store.write_definition("openvpn", "server.conf", "port 1195\n").await.expect("rewrite failed");

        let content = store.read_definition("openvpn", "server.conf").await.expect("read failed");
        assert_eq!(content, "port 1195\n");
    }

    #[tokio::test]
    async fn test_client_documents_live_under_clients_dir() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = DefinitionStore::new(dir.path().to_path_buf());

        let path = store
            .write_client_document("wireguard", "alice.conf", "[Interface]\n")
            .await
            .expect("write failed");

        assert!(path.ends_with("wireguard/clients/alice.conf"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_secure_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = DefinitionStore::new(dir.path().to_path_buf());

        let path = store
            .write_definition("wireguard", "privatekey", "secret")
            .await
            .expect("write failed");

        let mode = std::fs::metadata(&path).expect("metadata failed").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_write_fails_when_protocol_dir_is_a_file() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = DefinitionStore::new(dir.path().to_path_buf());

        // A regular file occupying the protocol directory slot
        std::fs::write(store.protocol_dir("wireguard"), "not a dir").expect("setup failed");

        let result = store.write_definition("wireguard", "wg0.conf", "x").await;
        assert!(matches!(result, Err(VpnctlError::Synthesis(_))));
    }
}
