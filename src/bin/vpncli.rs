//! vpncli - VPN Control CLI Tool
//!
//! Command-line interface for the vpnctl backend: start and stop protocol
//! servers, inspect their status, and issue per-client configuration
//! bundles.

use clap::{Parser, Subcommand};
use libvpnctl::{ActionReport, ProtocolManager, VpnctlConfig, VpnctlResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "vpncli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "VPN Control CLI - manage VPN server backends and clients", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/vpnctl/config.toml")]
    config: PathBuf,

    /// Machine-readable JSON output
    #[arg(short, long)]
    json: bool,

    /// Terse output mode
    #[arg(short, long)]
    terse: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured protocols and their state
    List,

    /// Show status of one protocol
    Status {
        /// Protocol name (case-insensitive), e.g. wireguard
        name: String,
    },

    /// Start one protocol server
    Start {
        /// Protocol name (case-insensitive)
        name: String,
    },

    /// Stop one protocol server
    Stop {
        /// Protocol name (case-insensitive)
        name: String,
    },

    /// Start every configured protocol
    StartAll,

    /// Stop every configured protocol
    StopAll,

    /// Issue (or re-issue) a client configuration bundle
    ClientConfig {
        /// Protocol name (case-insensitive)
        name: String,

        /// Client identifier (also used as the document file stem)
        client_id: String,

        /// Write the bundle to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file without touching any backend
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::List => handle_list(&cli).await,
        Commands::Status { name } => handle_status(name, &cli).await,
        Commands::Start { name } => handle_action(name, "start", &cli).await,
        Commands::Stop { name } => handle_action(name, "stop", &cli).await,
        Commands::StartAll => handle_bulk("start", &cli).await,
        Commands::StopAll => handle_bulk("stop", &cli).await,
        Commands::ClientConfig {
            name,
            client_id,
            output,
        } => handle_client_config(name, client_id, output.as_deref(), &cli).await,
        Commands::CheckConfig => handle_check_config(&cli),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Load the configuration, falling back to defaults when no file exists
fn load_config(cli: &Cli) -> VpnctlResult<VpnctlConfig> {
    let config = if cli.config.exists() {
        VpnctlConfig::load(&cli.config)?
    } else {
        VpnctlConfig::default()
    };
    config.validate()?;
    Ok(config)
}

async fn manager(cli: &Cli) -> VpnctlResult<ProtocolManager> {
    let config = load_config(cli)?;
    ProtocolManager::from_config(&config).await
}

async fn handle_list(cli: &Cli) -> VpnctlResult<()> {
    let manager = manager(cli).await?;
    let statuses = manager.status_all().await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else if cli.terse {
        for status in &statuses {
            println!(
                "{}:{}:{}",
                status.name,
                status.port,
                if status.running { "running" } else { "stopped" }
            );
        }
    } else if statuses.is_empty() {
        println!("No protocols configured");
    } else {
        println!("Protocols:");
        for status in &statuses {
            println!(
                "  {:<10} port {:<6} {}",
                status.name,
                status.port,
                if status.running { "running" } else { "stopped" }
            );
        }
    }
    Ok(())
}

async fn handle_status(name: &str, cli: &Cli) -> VpnctlResult<()> {
    let manager = manager(cli).await?;
    let status = manager.status(name).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else if cli.terse {
        println!(
            "{}:{}:{}",
            status.name,
            status.port,
            if status.running { "running" } else { "stopped" }
        );
    } else {
        println!("Protocol: {}", status.name);
        println!("  Port:  {}", status.port);
        println!("  State: {}", if status.running { "running" } else { "stopped" });
    }
    Ok(())
}

async fn handle_action(name: &str, action: &str, cli: &Cli) -> VpnctlResult<()> {
    let manager = manager(cli).await?;

    match action {
        "start" => manager.start(name).await?,
        _ => manager.stop(name).await?,
    }

    let report = ActionReport {
        protocol: manager.status(name).await?.name,
        action: action.to_string(),
        success: true,
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.terse {
        let past = if action == "start" { "started" } else { "stopped" };
        println!("{} {}", report.protocol, past);
    }
    Ok(())
}

async fn handle_bulk(action: &str, cli: &Cli) -> VpnctlResult<()> {
    let manager = manager(cli).await?;

    let outcomes: HashMap<String, bool> = match action {
        "start" => manager.start_all().await,
        _ => manager.stop_all().await,
    };

    let mut reports: Vec<ActionReport> = outcomes
        .into_iter()
        .map(|(protocol, success)| ActionReport {
            protocol,
            action: action.to_string(),
            success,
        })
        .collect();
    reports.sort_by(|a, b| a.protocol.cmp(&b.protocol));

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!(
                "{} {} {}",
                if report.success { "✓" } else { "✗" },
                report.protocol,
                if report.success { "ok" } else { "failed" }
            );
        }
    }

    // Partial failure still exits non-zero so scripts notice
    if reports.iter().any(|r| !r.success) {
        process::exit(1);
    }
    Ok(())
}

async fn handle_client_config(
    name: &str,
    client_id: &str,
    output: Option<&std::path::Path>,
    cli: &Cli,
) -> VpnctlResult<()> {
    let manager = manager(cli).await?;
    let document = manager.client_config(name, client_id).await?;
    let protocol = manager.status(name).await?.name;

    if let Some(path) = output {
        std::fs::write(path, &document)?;
        if !cli.terse {
            println!("Wrote {} client configuration for {} to {}", protocol, client_id, path.display());
        }
    } else if cli.json {
        let payload = serde_json::json!({
            "protocol": protocol,
            "username": client_id,
            "config": document,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print!("{}", document);
    }
    Ok(())
}

fn handle_check_config(cli: &Cli) -> VpnctlResult<()> {
    let config = VpnctlConfig::load(&cli.config)?;
    config.validate()?;

    if cli.json {
        let payload = serde_json::json!({
            "path": cli.config.display().to_string(),
            "valid": true,
            "wireguard": config.wireguard.enabled,
            "openvpn": config.openvpn.enabled,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Configuration OK: {}", cli.config.display());
        println!("  WireGuard: {}", if config.wireguard.enabled { "enabled" } else { "disabled" });
        println!("  OpenVPN:   {}", if config.openvpn.enabled { "enabled" } else { "disabled" });
    }
    Ok(())
}
