//! Bluetooth Module
//!
//! BLE central-role session core: scanning, connection state, GATT
//! resolution, and correlation of native completion events with the caller
//! futures waiting on them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Central                          │
//! │  (public API, session state, single native event loop)   │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │
//!        ┌─────────────┬───────┴──────┬──────────────┐
//!        │             │              │              │
//!        ▼             ▼              ▼              ▼
//! ┌───────────┐ ┌────────────┐ ┌────────────┐ ┌──────────┐
//! │  Scanner  │ │ Connection │ │ Operations │ │  Events  │
//! │           │ │            │ │            │ │          │
//! │ - session │ │ - connect  │ │ - read     │ │ - named  │
//! │ - timer   │ │ - teardown │ │ - write    │ │   notices│
//! │           │ │            │ │ - notify   │ │          │
//! └─────┬─────┘ └─────┬──────┘ └─────┬──────┘ └──────────┘
//!       │             │              │
//!       ▼             ▼              ▼
//! ┌──────────────────────────────────────────┐  ┌──────────┐
//! │   Registry  +  GATT resolver  +  Codec   │  │  Stack   │
//! └──────────────────────────────────────────┘  │ (native) │
//!                                               └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`stack`] - Native stack trait, event variants and the event sink
//! - [`registry`] - Discovered and connected peripherals
//! - [`gatt`] - Identifier parsing and service/characteristic resolution
//! - [`codec`] - Write value encoding
//! - [`scanner`] - Discovery sessions and the auto-stop timer
//! - [`connection`] - Connect, disconnect and link teardown
//! - [`operations`] - Read, write and notification requests
//! - [`events`] - Named state-change notices
//! - [`permissions`] - Permission prompt collaborator
//! - [`simulated`] - In-process native stack
//! - [`service`] - The `Central` entry point

pub mod codec;
pub mod connection;
pub mod events;
pub mod gatt;
pub mod operations;
pub mod permissions;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod simulated;
pub mod stack;

// Re-export main service for convenience
pub use service::Central;
