//! Process supervision seam
//!
//! Backends never launch server processes themselves; they hand the
//! persisted server definition to a `ProcessSupervisor` during start and
//! return the handle during stop. The dry-run implementation logs the
//! launch it would perform, which keeps every orchestration path
//! exercisable without the protocol binaries installed. The exec
//! implementation drives the real binaries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{VpnctlError, VpnctlResult};

/// How long terminate waits for a stopped server process to exit
const STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Opaque reference to one supervised server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SupervisorHandle(u64);

impl SupervisorHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// External process supervision for protocol servers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Bring up a server from its on-disk definition
    async fn spawn(&self, definition: &Path) -> VpnctlResult<SupervisorHandle>;

    /// Bring the referenced server back down
    ///
    /// Implementations must confirm termination: on failure the handle
    /// stays valid so the caller can retry.
    async fn terminate(&self, handle: SupervisorHandle) -> VpnctlResult<()>;
}

/// Supervisor that only logs what it would do
pub struct DryRunSupervisor {
    next_handle: AtomicU64,
}

impl DryRunSupervisor {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
        }
    }
}

impl Default for DryRunSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessSupervisor for DryRunSupervisor {
    async fn spawn(&self, definition: &Path) -> VpnctlResult<SupervisorHandle> {
        let handle = SupervisorHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        info!("Dry run: would launch server from {:?}", definition);
        Ok(handle)
    }

    async fn terminate(&self, handle: SupervisorHandle) -> VpnctlResult<()> {
        debug!("Dry run: would terminate server (handle {})", handle.id());
        Ok(())
    }
}

/// How an exec-launched server is later brought down
#[derive(Debug, Clone)]
pub enum StopStrategy {
    /// Kill the retained child process (long-running server binaries)
    KillChild,
    /// Run a companion command with the definition path appended
    /// (one-shot launchers that background themselves)
    Command(Vec<String>),
}

struct Launched {
    child: Option<Child>,
    definition: PathBuf,
}

/// Supervisor that launches the real server binary
///
/// `launch` is the program plus leading arguments; the definition path
/// is appended as the final argument.
pub struct ExecSupervisor {
    launch: Vec<String>,
    stop: StopStrategy,
    next_handle: AtomicU64,
    launched: Mutex<HashMap<u64, Launched>>,
}

impl ExecSupervisor {
    pub fn new(launch: Vec<String>, stop: StopStrategy) -> Self {
        Self {
            launch,
            stop,
            next_handle: AtomicU64::new(1),
            launched: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProcessSupervisor for ExecSupervisor {
    async fn spawn(&self, definition: &Path) -> VpnctlResult<SupervisorHandle> {
        let (program, args) = self.launch.split_first().ok_or_else(|| {
            VpnctlError::Supervision("No launch command configured".to_string())
        })?;
        let definition_str = definition.to_str().ok_or_else(|| {
            VpnctlError::InvalidParameter("Definition path contains invalid UTF-8".to_string())
        })?;

        let child = match &self.stop {
            StopStrategy::Command(_) => {
                // One-shot launcher: run to completion, check exit status
                let output = Command::new(program)
                    .args(args)
                    .arg(definition_str)
                    .output()
                    .await
                    .map_err(|e| VpnctlError::Supervision(
                        format!("Failed to run {}: {}", program, e)
                    ))?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(VpnctlError::Supervision(
                        format!("{} failed: {}", program, stderr)
                    ));
                }
                None
            }
            StopStrategy::KillChild => {
                let spawned = Command::new(program)
                    .args(args)
                    .arg(definition_str)
                    .stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::piped())
                    .spawn()
                    .map_err(|e| VpnctlError::Supervision(
                        format!("Failed to start {}: {}", program, e)
                    ))?;
                Some(spawned)
            }
        };

        let handle = SupervisorHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut launched = self.launched.lock().await;
        launched.insert(handle.id(), Launched {
            child,
            definition: definition.to_path_buf(),
        });

        info!("Launched {} for {:?} (handle {})", program, definition, handle.id());
        Ok(handle)
    }

    async fn terminate(&self, handle: SupervisorHandle) -> VpnctlResult<()> {
        let mut launched = self.launched.lock().await;
        let mut entry = launched.remove(&handle.id()).ok_or_else(|| {
            VpnctlError::Supervision(format!("Unknown supervisor handle {}", handle.id()))
        })?;

        match &self.stop {
            StopStrategy::Command(cmd) => {
                let (program, args) = cmd.split_first().ok_or_else(|| {
                    VpnctlError::Supervision("No stop command configured".to_string())
                })?;
                let definition_str = entry.definition.to_str().ok_or_else(|| {
                    VpnctlError::InvalidParameter(
                        "Definition path contains invalid UTF-8".to_string()
                    )
                })?;

                let result = Command::new(program)
                    .args(args)
                    .arg(definition_str)
                    .output()
                    .await;

                match result {
                    Ok(out) if out.status.success() => {}
                    Ok(out) => {
                        let err = VpnctlError::Supervision(format!(
                            "{} failed: {}",
                            program,
                            String::from_utf8_lossy(&out.stderr)
                        ));
                        // Keep the entry so the caller can retry
                        launched.insert(handle.id(), entry);
                        return Err(err);
                    }
                    Err(e) => {
                        let err = VpnctlError::Supervision(
                            format!("Failed to run {}: {}", program, e)
                        );
                        launched.insert(handle.id(), entry);
                        return Err(err);
                    }
                }
            }
            StopStrategy::KillChild => {
                if let Some(mut child) = entry.child.take() {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            debug!("Server process already exited with status: {}", status);
                        }
                        _ => {
                            // kill() delivers SIGKILL and reaps the child
                            match tokio::time::timeout(STOP_TIMEOUT, child.kill()).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    let err = VpnctlError::Supervision(
                                        format!("Failed to kill server process: {}", e)
                                    );
                                    entry.child = Some(child);
                                    launched.insert(handle.id(), entry);
                                    return Err(err);
                                }
                                Err(_) => {
                                    let err = VpnctlError::Supervision(format!(
                                        "Server process still running after {:?}",
                                        STOP_TIMEOUT
                                    ));
                                    entry.child = Some(child);
                                    launched.insert(handle.id(), entry);
                                    return Err(err);
                                }
                            }
                        }
                    }
                }
            }
        }

        info!("Stopped server for {:?} (handle {})", entry.definition, handle.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_hands_out_distinct_handles() {
        let supervisor = DryRunSupervisor::new();

        let a = supervisor.spawn(Path::new("/tmp/wg0.conf")).await.expect("spawn failed");
        let b = supervisor.spawn(Path::new("/tmp/server.conf")).await.expect("spawn failed");

        assert_ne!(a, b);
        assert!(supervisor.terminate(a).await.is_ok());
        assert!(supervisor.terminate(b).await.is_ok());
    }

    #[tokio::test]
    async fn test_exec_oneshot_success_and_failure() {
        // "true" exits 0 regardless of the appended path
        let supervisor = ExecSupervisor::new(
            vec!["true".to_string()],
            StopStrategy::Command(vec!["true".to_string()]),
        );
        let handle = supervisor.spawn(Path::new("/tmp/def.conf")).await.expect("spawn failed");
        supervisor.terminate(handle).await.expect("terminate failed");

        // "false" exits nonzero - spawn must surface that
        let failing = ExecSupervisor::new(
            vec!["false".to_string()],
            StopStrategy::Command(vec!["true".to_string()]),
        );
        let result = failing.spawn(Path::new("/tmp/def.conf")).await;
        assert!(matches!(result, Err(VpnctlError::Supervision(_))));
    }

    #[tokio::test]
    async fn test_exec_failed_stop_keeps_handle_alive() {
        let supervisor = ExecSupervisor::new(
            vec!["true".to_string()],
            StopStrategy::Command(vec!["false".to_string()]),
        );
        let handle = supervisor.spawn(Path::new("/tmp/def.conf")).await.expect("spawn failed");

        // Stop command fails; the handle must stay usable for a retry
        assert!(supervisor.terminate(handle).await.is_err());
        assert!(supervisor.terminate(handle).await.is_err());
    }

    #[tokio::test]
    async fn test_exec_kill_child() {
        // Appending the "definition path" as sleep's argument keeps the
        // child alive until terminate kills it
        let supervisor = ExecSupervisor::new(
            vec!["sleep".to_string()],
            StopStrategy::KillChild,
        );
        let handle = supervisor.spawn(Path::new("30")).await.expect("spawn failed");
        supervisor.terminate(handle).await.expect("terminate failed");
    }

    #[tokio::test]
    async fn test_exec_kill_child_already_exited() {
        // A child that exited on its own still counts as a clean stop
        let supervisor = ExecSupervisor::new(
            vec!["true".to_string()],
            StopStrategy::KillChild,
        );
        let handle = supervisor.spawn(Path::new("/tmp/def.conf")).await.expect("spawn failed");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        supervisor.terminate(handle).await.expect("terminate failed");
    }

    #[tokio::test]
    async fn test_terminate_unknown_handle() {
        let supervisor = ExecSupervisor::new(
            vec!["true".to_string()],
            StopStrategy::KillChild,
        );
        let result = supervisor.terminate(SupervisorHandle::new(42)).await;
        assert!(matches!(result, Err(VpnctlError::Supervision(_))));
    }
}
