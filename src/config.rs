//! Configuration management for vpnctl
//!
//! TOML-backed settings with an explicit, enumerated schema per protocol.
//! Every option maps to a typed field and unknown keys are rejected at
//! load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VpnctlError, VpnctlResult};
use crate::validation;

/// Supervision mode for started protocol servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupervisorMode {
    /// Log the launch that would happen and succeed without spawning
    DryRun,
    /// Launch the real server binary
    Exec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VpnctlConfig {
    /// Runtime state directory (server definitions, issued client bundles)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Public address clients dial; a placeholder is rendered when unset
    #[serde(default)]
    pub server_address: Option<String>,
    /// Start all enabled protocols when the daemon boots
    #[serde(default)]
    pub auto_start: bool,
    /// How started servers are supervised
    #[serde(default = "default_supervisor")]
    pub supervisor: SupervisorMode,
    /// WireGuard protocol settings
    #[serde(default)]
    pub wireguard: WireGuardSettings,
    /// OpenVPN protocol settings
    #[serde(default)]
    pub openvpn: OpenVpnSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireGuardSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// UDP listen port
    #[serde(default = "default_wireguard_port")]
    pub port: u16,
    /// DNS servers pushed to clients
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,
    /// PersistentKeepalive interval (seconds) in client configs
    #[serde(default = "default_keepalive")]
    pub keepalive: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenVpnSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Listen port
    #[serde(default = "default_openvpn_port")]
    pub port: u16,
    /// Local address to bind; all interfaces when unset
    #[serde(default)]
    pub bind_address: Option<String>,
    /// Transport protocol ("udp" or "tcp")
    #[serde(default = "default_proto")]
    pub proto: String,
    /// Tunnel device type ("tun" or "tap")
    #[serde(default = "default_dev")]
    pub dev: String,
    /// Data channel cipher
    #[serde(default = "default_cipher")]
    pub cipher: String,
    /// DNS servers pushed to clients
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/vpnctl")
}

fn default_supervisor() -> SupervisorMode {
    SupervisorMode::DryRun
}

fn default_enabled() -> bool {
    true
}

fn default_wireguard_port() -> u16 {
    crate::proto::wireguard::DEFAULT_PORT
}

fn default_openvpn_port() -> u16 {
    crate::proto::openvpn::DEFAULT_PORT
}

fn default_dns() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]
}

fn default_keepalive() -> u32 {
    25
}

fn default_proto() -> String {
    "udp".to_string()
}

fn default_dev() -> String {
    "tun".to_string()
}

fn default_cipher() -> String {
    "AES-256-GCM".to_string()
}

impl Default for VpnctlConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            server_address: None,
            auto_start: false,
            supervisor: default_supervisor(),
            wireguard: WireGuardSettings::default(),
            openvpn: OpenVpnSettings::default(),
        }
    }
}

impl Default for WireGuardSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_wireguard_port(),
            dns: default_dns(),
            keepalive: default_keepalive(),
        }
    }
}

impl Default for OpenVpnSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_openvpn_port(),
            bind_address: None,
            proto: default_proto(),
            dev: default_dev(),
            cipher: default_cipher(),
            dns: default_dns(),
        }
    }
}

impl VpnctlConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> VpnctlResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VpnctlError::ConfigError(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| VpnctlError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> VpnctlResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VpnctlError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| VpnctlError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration before any backend is built from it
    pub fn validate(&self) -> VpnctlResult<()> {
        if let Some(addr) = &self.server_address {
            validation::validate_endpoint_host(addr)?;
        }

        validation::validate_port(self.wireguard.port)?;
        validation::validate_port(self.openvpn.port)?;

        if self.wireguard.enabled && self.openvpn.enabled
            && self.wireguard.port == self.openvpn.port
        {
            return Err(VpnctlError::ConfigError(format!(
                "WireGuard and OpenVPN cannot share port {}",
                self.wireguard.port
            )));
        }

        if let Some(addr) = &self.openvpn.bind_address {
            validation::validate_ip_address(addr)?;
        }

        for dns in self.wireguard.dns.iter().chain(self.openvpn.dns.iter()) {
            validation::validate_ip_address(dns)?;
        }

        match self.openvpn.proto.as_str() {
            "udp" | "tcp" => {}
            other => {
                return Err(VpnctlError::ConfigError(format!(
                    "Invalid OpenVPN proto '{}' (expected 'udp' or 'tcp')",
                    other
                )));
            }
        }

        match self.openvpn.dev.as_str() {
            "tun" | "tap" => {}
            other => {
                return Err(VpnctlError::ConfigError(format!(
                    "Invalid OpenVPN dev '{}' (expected 'tun' or 'tap')",
                    other
                )));
            }
        }

        Ok(())
    }
}
