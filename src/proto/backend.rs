//! Common backend interface and the shared lifecycle state machine
//!
//! Every protocol backend exposes the same contract: an explicit two-state
//! lifecycle plus client enrollment. The `transition` helper owns the
//! state-machine rules so each backend only supplies the side effects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::{debug, info};

use crate::error::VpnctlResult;

/// Lifecycle state of a protocol backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Stopped,
    Running,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolState::Stopped => write!(f, "stopped"),
            ProtocolState::Running => write!(f, "running"),
        }
    }
}

/// Which protocol family a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    WireGuard,
    OpenVpn,
}

/// Snapshot of one backend for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub name: String,
    pub running: bool,
    pub port: u16,
}

/// Outcome of one start/stop action, used by bulk operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub protocol: String,
    pub action: String,
    pub success: bool,
}

/// Common interface that all protocol backends implement
#[async_trait]
pub trait ProtocolBackend: Send + Sync {
    /// Get the display name of this backend (e.g., "WireGuard", "OpenVPN")
    fn name(&self) -> &str;

    /// Get the well-known port for this protocol family
    fn default_port(&self) -> u16;

    /// Get the port the server listens on
    fn port(&self) -> u16;

    /// Check whether the backend is currently running
    async fn is_running(&self) -> bool;

    /// Bring the server up; calling an already-running backend is a no-op
    async fn start(&self) -> VpnctlResult<()>;

    /// Bring the server down; calling a stopped backend is a no-op
    async fn stop(&self) -> VpnctlResult<()>;

    /// Enroll `client_id` (idempotently) and return its client document
    async fn client_config(&self, client_id: &str) -> VpnctlResult<String>;

    /// Get a status snapshot of this backend
    async fn status(&self) -> ProtocolStatus;
}

/// Drive `state` toward `target`, running `action` only when a move is due
///
/// Already at the target: the action future is dropped unpolled, so no
/// side effects run. The state commits only after the action succeeds;
/// on failure the previous state stays in place.
pub(crate) async fn transition<F>(
    name: &str,
    state: &mut ProtocolState,
    target: ProtocolState,
    action: F,
) -> VpnctlResult<()>
where
    F: Future<Output = VpnctlResult<()>>,
{
    if *state == target {
        debug!("{} is already {}", name, target);
        return Ok(());
    }

    action.await?;
    *state = target;
    info!("{} is now {}", name, target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VpnctlError;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_transition_commits_on_success() {
        let mut state = ProtocolState::Stopped;
        let result = transition("test", &mut state, ProtocolState::Running, async {
            Ok::<(), VpnctlError>(())
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(state, ProtocolState::Running);
    }

    #[tokio::test]
    async fn test_transition_failure_keeps_previous_state() {
        let mut state = ProtocolState::Stopped;
        let result = transition("test", &mut state, ProtocolState::Running, async {
            Err(VpnctlError::Supervision("launch failed".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(state, ProtocolState::Stopped);
    }

    #[tokio::test]
    async fn test_transition_to_current_state_skips_action() {
        let ran = AtomicBool::new(false);
        let mut state = ProtocolState::Running;

        let result = transition("test", &mut state, ProtocolState::Running, async {
            ran.store(true, Ordering::SeqCst);
            Ok::<(), VpnctlError>(())
        })
        .await;

        // The action future is never polled on the no-op path
        assert!(result.is_ok());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(state, ProtocolState::Running);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ProtocolState::Stopped.to_string(), "stopped");
        assert_eq!(ProtocolState::Running.to_string(), "running");
    }
}
