//! Input validation and sanitization
//!
//! Security module to prevent path traversal and other input-based attacks

use crate::error::{VpnctlError, VpnctlResult};
use std::net::IpAddr;

/// Maximum length for client identifiers
const MAX_CLIENT_ID_LEN: usize = 64;

/// Validate a client identifier to prevent path traversal
///
/// Client identifiers double as file stems for issued configuration
/// bundles, so they must be plain names: alphanumeric with optional
/// dashes, underscores, and interior dots. Anything path-like is a
/// fatal input error, never silently renamed.
pub fn validate_client_id(client_id: &str) -> VpnctlResult<()> {
    if client_id.is_empty() {
        return Err(VpnctlError::InvalidParameter(
            "Client identifier cannot be empty".to_string()
        ));
    }

    if client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(VpnctlError::InvalidParameter(
            format!("Client identifier too long (max {} characters)", MAX_CLIENT_ID_LEN)
        ));
    }

    // Only allow alphanumeric, dash, underscore, dot
    // This rules out path separators and shell metacharacters
    for c in client_id.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(VpnctlError::InvalidParameter(
                format!("Invalid client identifier '{}': contains invalid character '{}'", client_id, c)
            ));
        }
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if client_id.starts_with('-') {
        return Err(VpnctlError::InvalidParameter(
            "Client identifier cannot start with dash".to_string()
        ));
    }

    // Don't allow leading dots ("..", hidden files)
    if client_id.starts_with('.') {
        return Err(VpnctlError::InvalidParameter(
            "Client identifier cannot start with dot".to_string()
        ));
    }

    Ok(())
}

/// Validate an IP address
///
/// Uses Rust's built-in IP address parser to ensure valid format
pub fn validate_ip_address(addr: &str) -> VpnctlResult<IpAddr> {
    addr.parse::<IpAddr>()
        .map_err(|_| VpnctlError::InvalidParameter(
            format!("Invalid IP address: {}", addr)
        ))
}

/// Validate a listen port (zero is never a usable server port)
pub fn validate_port(port: u16) -> VpnctlResult<()> {
    if port == 0 {
        return Err(VpnctlError::InvalidParameter(
            "Port cannot be 0".to_string()
        ));
    }
    Ok(())
}

/// Validate a server endpoint host (hostname or IP address)
pub fn validate_endpoint_host(host: &str) -> VpnctlResult<()> {
    if host.is_empty() {
        return Err(VpnctlError::InvalidParameter(
            "Endpoint host cannot be empty".to_string()
        ));
    }

    if host.len() > 253 {
        return Err(VpnctlError::InvalidParameter(
            "Endpoint host too long".to_string()
        ));
    }

    // Try parsing as IP address first
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    // Otherwise validate as hostname
    // Hostnames can contain alphanumeric, dash, and dots
    for c in host.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '.' {
            return Err(VpnctlError::InvalidParameter(
                format!("Invalid endpoint host character: {}", c)
            ));
        }
    }

    // No leading/trailing dashes or dots
    if host.starts_with('-') || host.starts_with('.') ||
       host.ends_with('-') || host.ends_with('.') {
        return Err(VpnctlError::InvalidParameter(
            "Invalid endpoint host format".to_string()
        ));
    }

    Ok(())
}
