//! Interface to a single Electrum client connection.
//!
//! The JSON-RPC framing lives outside this crate; the pool only consumes a
//! client's events and delegates subscriptions and requests to it. Clients
//! are produced by an injected [`ElectrumClientFactory`] so tests can
//! script connection behavior.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ElectrumResult;
use crate::types::{BlockHeader, Satoshi, ScriptHash};

use super::servers::ServerAddress;

/// Identifier of one supervised client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "electrum_{}", self.0)
    }
}

/// Chain-tip notification from a header subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderNotification {
    pub height: u32,
    pub header: BlockHeader,
}

/// Status notification for a subscribed script hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHashNotification {
    pub script_hash: ScriptHash,
    /// Electrum status hash of the script's history, None when unused.
    pub status: Option<String>,
}

/// Events a supervised client reports to its pool.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection and protocol negotiation completed; the server's current
    /// chain tip is known.
    Ready { source: ClientId, height: u32, tip: BlockHeader },
    /// The server announced a new chain tip.
    HeaderSubscription { source: ClientId, height: u32, tip: BlockHeader },
    /// The connection failed or was closed.
    Disconnected { source: ClientId },
}

/// Requests the pool delegates to its master client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectrumRequest {
    BroadcastTransaction { raw_tx: Vec<u8> },
    GetScriptHashHistory { script_hash: ScriptHash },
    GetHeader { height: u32 },
    EstimateFee { block_target: u32 },
}

/// Responses to [`ElectrumRequest`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectrumResponse {
    Broadcasted { txid: String },
    ScriptHashHistory { txids: Vec<String> },
    Header { height: u32, header: BlockHeader },
    FeeEstimate { fee_per_kb: Satoshi },
}

/// A connected Electrum client.
#[async_trait]
pub trait ElectrumClient: Send + Sync {
    /// Subscribe the given listener to the server's chain-tip announcements.
    fn subscribe_headers(&self, listener: UnboundedSender<HeaderNotification>);

    /// Subscribe the given listener to status changes of a script hash.
    fn subscribe_script_hash(
        &self,
        script_hash: ScriptHash,
        listener: UnboundedSender<ScriptHashNotification>,
    );

    /// Issue a request on this connection.
    async fn request(&self, request: ElectrumRequest) -> ElectrumResult<ElectrumResponse>;
}

/// Produces client connections for the pool.
///
/// Implementations deliver the connection's [`ClientEvent`]s on the channel
/// handed in here, tagged with the given id. A returned error is treated by
/// the pool the same way as an immediate disconnect.
#[async_trait]
pub trait ElectrumClientFactory: Send + Sync {
    async fn connect(
        &self,
        id: ClientId,
        address: &ServerAddress,
        events: UnboundedSender<ClientEvent>,
    ) -> ElectrumResult<Arc<dyn ElectrumClient>>;
}
