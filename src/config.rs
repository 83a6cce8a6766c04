//! Configuration for the Electrum client pool.

use std::time::Duration;

use crate::electrum::servers::ServerAddress;
use crate::error::WalletError;
use crate::types::{ChainHash, Network};

/// Configuration for [`ElectrumClientPool`](crate::electrum::ElectrumClientPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Genesis hash selecting the server-list resource to load.
    pub chain_hash: ChainHash,

    /// Maximum number of concurrent Electrum connections.
    pub max_chain_connections: usize,

    /// Whether `.onion` hostnames from the server list may be used.
    pub use_onion: bool,

    /// Single caller-supplied server overriding the whole list.
    pub custom_address: Option<ServerAddress>,

    /// Explicit server list overriding the bundled resources. Used by
    /// tests and bespoke deployments; `custom_address` takes precedence.
    pub servers: Option<Vec<ServerAddress>>,

    /// Delay before retrying a different server after a disconnect.
    pub reconnect_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chain_hash: ChainHash::MAINNET,
            max_chain_connections: 3,
            use_onion: false,
            custom_address: None,
            servers: None,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            chain_hash: network.chain_hash(),
            ..Self::default()
        }
    }

    pub fn mainnet() -> Self {
        Self::new(Network::Mainnet)
    }

    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    pub fn signet() -> Self {
        Self::new(Network::Signet)
    }

    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    /// Set the maximum number of concurrent connections.
    pub fn with_max_chain_connections(mut self, max: usize) -> Self {
        self.max_chain_connections = max;
        self
    }

    /// Allow or forbid `.onion` servers.
    pub fn with_onion(mut self, use_onion: bool) -> Self {
        self.use_onion = use_onion;
        self
    }

    /// Pin the pool to a single caller-supplied server.
    pub fn with_custom_address(mut self, address: ServerAddress) -> Self {
        self.custom_address = Some(address);
        self
    }

    /// Replace the bundled server list.
    pub fn with_servers(mut self, servers: Vec<ServerAddress>) -> Self {
        self.servers = Some(servers);
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.max_chain_connections == 0 {
            return Err(WalletError::Config("max_chain_connections must be > 0".to_string()));
        }

        if self.reconnect_delay.is_zero() {
            return Err(WalletError::Config("reconnect_delay must be > 0".to_string()));
        }

        Ok(())
    }
}
