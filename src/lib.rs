//! Connectivity cores for a Lightning Network wallet.
//!
//! This library implements the three event-driven state machines that tie
//! a wallet to the outside world:
//!
//! - [`TrampolineBroadcaster`]: recomputes per-peer trampoline routing
//!   advertisements from channel balances every 10 seconds and sends only
//!   the entries that changed
//! - [`ElectrumClientPool`]: multiplexes several Electrum server
//!   connections, elects a master chain-tip source with switch hysteresis,
//!   and republishes connection events
//! - [`SwapOutFeeratesHandler`]: solicits swap-out fee offers from channel
//!   peers under a two-phase timeout
//!
//! Each machine runs on its own task and is driven purely by enqueued
//! messages, so handlers never race and never block. Collaborators (the
//! comms tower, the channel manager, Electrum clients) are injected behind
//! traits; the machines hold no references to each other.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lnwallet_net::config::PoolConfig;
//! use lnwallet_net::electrum::{ElectrumClientFactory, ElectrumClientPool};
//! use lnwallet_net::event_bus::EventBus;
//!
//! # fn connect_factory() -> Arc<dyn ElectrumClientFactory> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::default();
//!     let pool = ElectrumClientPool::new(PoolConfig::mainnet(), connect_factory(), bus.clone())?;
//!
//!     let mut events = bus.subscribe();
//!     pool.init_connect();
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("chain event: {:?}, height {}", event, pool.block_count());
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod channels;
pub mod comms;
pub mod config;
pub mod electrum;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod swap;
pub mod trampoline;
pub mod types;

// Re-export main types for convenience
pub use channels::{ChannelSnapshot, ChannelSource};
pub use comms::{CommsTower, PeerEvent, PeerListener, TrampolineOn, TrampolineStatus, WireMessage};
pub use config::PoolConfig;
pub use electrum::{ElectrumClientPool, ElectrumEvent};
pub use error::{ElectrumError, LoggingError, WalletError};
pub use event_bus::EventBus;
pub use logging::{init_console_logging, init_logging, LogFileConfig, LoggingConfig, LoggingGuard};
pub use swap::SwapOutFeeratesHandler;
pub use trampoline::TrampolineBroadcaster;
pub use types::{ChainHash, FeatureFlags, MilliSat, Network, NodeId, RemoteNodeInfo, Satoshi};

/// Current version of the lnwallet-net library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
