//! Bundled Electrum server lists, keyed by chain hash.
//!
//! Each resource is a JSON object whose keys are hostnames and whose values
//! carry the SSL port as a decimal string under `"s"` (0 when absent).
//! Hostnames stay unresolved until connect time; certificate checking is
//! hard-coded to [`SslMode::Loose`] for bundled entries.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::error::{ElectrumError, ElectrumResult};
use crate::types::ChainHash;

const MAINNET_SERVERS: &str = include_str!("servers/servers_mainnet.json");
const TESTNET_SERVERS: &str = include_str!("servers/servers_testnet.json");
const SIGNET_SERVERS: &str = include_str!("servers/servers_signet.json");
const REGTEST_SERVERS: &str = include_str!("servers/servers_regtest.json");

/// Certificate checking behavior for an SSL connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SslMode {
    /// Verify the certificate chain.
    Strict,
    /// Accept any certificate.
    Loose,
    /// Let the transport decide based on the address kind.
    Decide,
}

/// An Electrum server endpoint, unresolved until connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub ssl: SslMode,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16, ssl: SslMode) -> Self {
        Self {
            host: host.into(),
            port,
            ssl,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(default)]
    s: Option<String>,
}

/// Load the bundled server list for the given chain.
///
/// Unknown chain hashes are a programmer error and fail loudly; a corrupt
/// resource surfaces as [`ElectrumError::ServerList`]. With `use_onion`
/// unset, `.onion` hostnames are filtered out.
pub fn read_server_addresses(
    chain_hash: ChainHash,
    use_onion: bool,
) -> ElectrumResult<Vec<ServerAddress>> {
    let raw = if chain_hash == ChainHash::MAINNET {
        MAINNET_SERVERS
    } else if chain_hash == ChainHash::TESTNET {
        TESTNET_SERVERS
    } else if chain_hash == ChainHash::SIGNET {
        SIGNET_SERVERS
    } else if chain_hash == ChainHash::REGTEST {
        REGTEST_SERVERS
    } else {
        return Err(ElectrumError::UnknownChainHash(chain_hash));
    };

    let entries: HashMap<String, ServerEntry> =
        serde_json::from_str(raw).map_err(|e| ElectrumError::ServerList(e.to_string()))?;

    let mut servers = Vec::with_capacity(entries.len());
    for (host, entry) in entries {
        if !use_onion && host.ends_with(".onion") {
            continue;
        }
        let port = match entry.s {
            Some(s) => s
                .parse::<u16>()
                .map_err(|e| ElectrumError::ServerList(format!("bad ssl port for {}: {}", host, e)))?,
            None => 0,
        };
        servers.push(ServerAddress::new(host, port, SslMode::Loose));
    }

    Ok(servers)
}
