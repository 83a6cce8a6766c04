//! Electrum server connectivity: the supervised client pool, the consumed
//! client interface, and server-list resources.

pub mod client;
pub mod pool;
pub mod servers;


pub use client::{
    ClientEvent, ClientId, ElectrumClient, ElectrumClientFactory, ElectrumRequest,
    ElectrumResponse, HeaderNotification, ScriptHashNotification,
};
pub use pool::{ElectrumClientPool, ElectrumEvent, MASTER_SWITCH_HYSTERESIS_BLOCKS};
pub use servers::{read_server_addresses, ServerAddress, SslMode};
