//! Key material generation seam
//!
//! Backends never inspect key material; they embed it into rendered
//! documents as opaque strings. Real deployments plug in a source backed
//! by the protocol's own tooling (wg genkey, a PKI). The default source
//! mints random placeholder material, which keeps the orchestration
//! paths fully exercisable without any crypto tooling installed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::proto::ProtocolKind;

/// Opaque key pair issued for one peer or server identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub private_key: String,
    pub public_key: String,
}

/// Source of key material for peers and server identities
pub trait KeySource: Send + Sync {
    /// Issue fresh material for `owner` ("server", a client id, "ca")
    fn issue(&self, kind: ProtocolKind, owner: &str) -> KeyMaterial;
}

/// Default source: random placeholder material from UUIDv4
///
/// Each call returns fresh material; idempotence of client config
/// issuance comes from the peer registry storing the first issue.
#[derive(Debug, Default)]
pub struct UuidKeySource;

impl UuidKeySource {
    pub fn new() -> Self {
        Self
    }
}

impl KeySource for UuidKeySource {
    fn issue(&self, _kind: ProtocolKind, _owner: &str) -> KeyMaterial {
        KeyMaterial {
            private_key: Uuid::new_v4().simple().to_string(),
            public_key: Uuid::new_v4().simple().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_returns_distinct_material() {
        let source = UuidKeySource::new();

        let a = source.issue(ProtocolKind::WireGuard, "alice");
        let b = source.issue(ProtocolKind::WireGuard, "alice");

        assert!(!a.private_key.is_empty());
        assert!(!a.public_key.is_empty());
        assert_ne!(a.private_key, a.public_key);
        // Fresh material every call - dedup is the registry's job
        assert_ne!(a.private_key, b.private_key);
    }

    #[test]
    fn test_material_is_plain_text() {
        let source = UuidKeySource::new();
        let material = source.issue(ProtocolKind::OpenVpn, "bob");

        // Dashless UUID: 32 hex chars, safe to embed in config files
        assert_eq!(material.private_key.len(), 32);
        assert!(material.private_key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
