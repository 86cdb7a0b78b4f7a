//! VPN Control Daemon (vpnctld)
//!
//! This daemon owns the configured VPN server backends: it bootstraps
//! their state directories, optionally starts them, and keeps them
//! supervised until shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (requires root/sudo for real deployments)
//! sudo vpnctld
//!
//! # Start with an explicit configuration file
//! sudo vpnctld --config /etc/vpnctl/config.toml
//!
//! # Start with verbose logging
//! sudo vpnctld --verbose
//! ```

use clap::Parser;
use libvpnctl::error::{VpnctlError, VpnctlResult};
use libvpnctl::{ProtocolManager, VpnctlConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// VPN Control Daemon
#[derive(Parser, Debug)]
#[command(name = "vpnctld")]
#[command(author = "vpnctl contributors")]
#[command(version)]
#[command(about = "VPN Control Daemon - runs and supervises VPN server backends", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/vpnctl/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Shared state for signal handling
struct DaemonState {
    /// Whether the daemon should continue running
    running: Arc<RwLock<bool>>,
}

impl DaemonState {
    fn new() -> Self {
        Self {
            running: Arc::new(RwLock::new(true)),
        }
    }

    async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Daemon stop requested");
    }
}

#[tokio::main]
async fn main() -> VpnctlResult<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting VPN Control Daemon (vpnctld)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Check if running as root
    #[cfg(target_os = "linux")]
    {
        let uid = unsafe { libc::getuid() };
        if uid != 0 {
            warn!("⚠️  Not running as root - some operations may fail");
            warn!("   Consider running with sudo for full functionality");
        }
    }

    // Load configuration, falling back to defaults when no file exists
    let config = if args.config.exists() {
        info!("Loading configuration from {:?}", args.config);
        VpnctlConfig::load(&args.config)?
    } else {
        info!("No configuration at {:?}, using defaults", args.config);
        VpnctlConfig::default()
    };
    config.validate()?;

    // Bootstrap every enabled backend (state directories, server keys,
    // initial definitions)
    let manager = ProtocolManager::from_config(&config).await?;
    if manager.is_empty() {
        warn!("⚠️  No protocols enabled - the daemon has nothing to manage");
    }

    // Create daemon state for signal handling
    let state = Arc::new(DaemonState::new());
    let state_clone = state.clone();

    // Setup signal handlers
    tokio::spawn(async move {
        if let Err(e) = handle_signals(state_clone).await {
            error!("Signal handler error: {}", e);
        }
    });

    // Bring the backends up when configured to
    if config.auto_start {
        info!("Auto-starting protocol backends...");
        let outcomes = manager.start_all().await;
        for name in manager.names() {
            match outcomes.get(&name) {
                Some(true) => info!("✓ {} started", name),
                _ => error!("✗ {} failed to start", name),
            }
        }
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  VPN Control Daemon is ready");
    info!("  State directory: {:?}", config.state_dir);
    info!("  Protocols:");
    for status in manager.status_all().await {
        info!(
            "    • {:<10} port {:<6} {}",
            status.name,
            status.port,
            if status.running { "running" } else { "stopped" }
        );
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Main daemon loop
    while state.is_running().await {
        // Sleep for a bit to avoid busy-waiting
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }

    // Cleanup: bring every running backend down before exiting
    info!("Shutting down VPN Control Daemon...");
    let outcomes = manager.stop_all().await;
    for name in manager.names() {
        match outcomes.get(&name) {
            Some(true) => info!("✓ {} stopped", name),
            _ => error!("✗ {} failed to stop", name),
        }
    }

    info!("VPN Control Daemon stopped");
    Ok(())
}

/// Initialize logging based on command-line arguments
fn init_logging(args: &Args) {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "vpnctl={},vpnctld={},libvpnctl={}",
            log_level, log_level, log_level
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .init();
}

/// Handle Unix signals (SIGTERM, SIGINT, SIGHUP)
async fn handle_signals(state: Arc<DaemonState>) -> VpnctlResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            VpnctlError::Supervision(format!("Failed to register SIGTERM handler: {}", e))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            VpnctlError::Supervision(format!("Failed to register SIGINT handler: {}", e))
        })?;
        let mut sighup = signal(SignalKind::hangup()).map_err(|e| {
            VpnctlError::Supervision(format!("Failed to register SIGHUP handler: {}", e))
        })?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    state.stop().await;
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    state.stop().await;
                    break;
                }
                _ = sighup.recv() => {
                    // Configuration is fixed at startup; keep listening
                    info!("Received SIGHUP, nothing to reload");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        use tokio::signal;

        // On non-Unix platforms, just wait for Ctrl+C
        signal::ctrl_c().await.map_err(|e| {
            VpnctlError::Supervision(format!("Failed to listen for Ctrl+C: {}", e))
        })?;
        info!("Received Ctrl+C, initiating graceful shutdown");
        state.stop().await;
    }

    Ok(())
}
