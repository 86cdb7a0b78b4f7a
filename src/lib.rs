//! vpnctl - VPN Server Control Library
//!
//! Async library for running VPN server backends and issuing client
//! configurations, providing:
//! - A unified lifecycle manager over protocol backends (WireGuard, OpenVPN)
//! - Idempotent client enrollment with deterministic address allocation
//! - Config synthesis from the in-memory peer registry to on-disk documents
//! - Pluggable process supervision (dry-run by default, exec for real use)

pub mod error;
pub mod validation;
pub mod config;
pub mod keys;
pub mod store;
pub mod supervise;
pub mod proto;

// Re-export commonly used types
pub use error::{VpnctlError, VpnctlResult};
pub use config::{OpenVpnSettings, SupervisorMode, VpnctlConfig, WireGuardSettings};
pub use keys::{KeyMaterial, KeySource, UuidKeySource};
pub use store::DefinitionStore;
pub use supervise::{
    DryRunSupervisor, ExecSupervisor, ProcessSupervisor, StopStrategy, SupervisorHandle,
};
pub use proto::{
    ActionReport, ProtocolBackend, ProtocolKind, ProtocolManager, ProtocolState, ProtocolStatus,
};
