//! Error types for vpnctl

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VpnctlError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Protocol not found
    #[error("Protocol not found: {0}")]
    NotFound(String),
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Address space exhausted for a backend
    #[error("Allocation exhausted for {protocol}: all {capacity} slots in use")]
    AllocationExhausted { protocol: String, capacity: u32 },
    /// Config rendering or persistence failed
    #[error("Synthesis failed: {0}")]
    Synthesis(String),
    /// External process could not be spawned or terminated
    #[error("Supervision failed: {0}")]
    Supervision(String),
    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<serde_json::Error> for VpnctlError {
    fn from(error: serde_json::Error) -> Self {
        VpnctlError::ParseError(error.to_string())
    }
}

pub type VpnctlResult<T> = Result<T, VpnctlError>;
