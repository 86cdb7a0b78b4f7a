//! Protocol subsystem for vpnctl
//!
//! This module provides a unified interface for running VPN server
//! backends and enrolling their clients, currently covering WireGuard
//! and OpenVPN.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     Protocol Manager (Unified API)  │
//! └──────────────┬──────────────────────┘
//!                │  case-insensitive dispatch
//!        ┌───────┴───────┐
//!        ▼               ▼
//!   ┌─────────┐     ┌─────────┐
//!   │   WG    │     │  OVPN   │   <- Protocol Backends
//!   └────┬────┘     └────┬────┘
//!        │               │
//!   peer registry + slot space
//!        │               │
//!        ▼               ▼
//!   server definition / client documents (projections on disk)
//! ```
//!
//! Each backend implements the `ProtocolBackend` trait: an explicit
//! stopped/running lifecycle plus idempotent client enrollment. The
//! in-memory peer registry is authoritative; everything written to disk
//! is re-renderable from it.

pub mod backend;
pub mod identity;
pub mod manager;
pub mod openvpn;
pub mod peers;
pub mod render;
pub mod wireguard;

pub use backend::{ActionReport, ProtocolBackend, ProtocolKind, ProtocolState, ProtocolStatus};
pub use identity::{SlotSpace, SlotStrategy};
pub use manager::ProtocolManager;
pub use peers::{PeerRecord, PeerRegistry};
