//! Interface to the comms tower, the wallet's peer dispatch layer.
//!
//! The tower itself lives outside this crate; the state machines here only
//! need to register per-peer listeners, receive connection events, and emit
//! outbound wire messages. Listener callbacks are modeled as a closed
//! [`PeerEvent`] enum delivered over a channel handle, so every consumer
//! enumerates exactly the inputs it handles and drops the rest.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::types::{FeatureFlags, MilliSat, NodeId, RemoteNodeInfo, Satoshi};

/// Identifier of a registered per-peer listener, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl ListenerId {
    /// Allocate a process-unique listener id.
    pub fn next() -> ListenerId {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to a connected peer, as exposed by the tower in callbacks.
#[derive(Debug, Clone)]
pub struct Worker {
    pub info: RemoteNodeInfo,
}

impl Worker {
    pub fn new(info: RemoteNodeInfo) -> Self {
        Self {
            info,
        }
    }
}

/// Connection events delivered to a registered peer listener.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The peer connection is established and its `Init` features are known.
    Operational { worker: Worker, their_init: FeatureFlags },
    /// The peer connection went away.
    Disconnected { worker: Worker },
    /// The peer answered a swap-out solicitation.
    SwapOutMessage { worker: Worker, message: SwapOutResponse },
}

/// A per-peer listener registration: an id for later removal plus the
/// channel the tower delivers [`PeerEvent`]s on.
#[derive(Debug, Clone)]
pub struct PeerListener {
    pub id: ListenerId,
    pub events: UnboundedSender<PeerEvent>,
}

/// Dispatch capabilities consumed from the comms tower.
///
/// Registration and removal must be thread-safe; `send_many` is
/// fire-and-forget and failures are swallowed by the tower.
pub trait CommsTower: Send + Sync {
    /// Register a listener for connection events of the given peer. If the
    /// peer is already connected the tower synthesises an immediate
    /// [`PeerEvent::Operational`].
    fn listen(&self, listener: PeerListener, remote: &RemoteNodeInfo);

    /// Unregister a previously registered listener without touching the
    /// underlying connection.
    fn remove_listener(&self, remote: &RemoteNodeInfo, listener: ListenerId);

    /// Emit zero or one wire message to the given peer.
    fn send_many(&self, message: Option<WireMessage>, to: NodeId);
}

/// Outbound protocol messages produced by this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Trampoline(TrampolineStatus),
    SwapOutRequest,
}

/// Template advertisement of this node's willingness and capacity to act
/// as a trampoline router for one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct TrampolineOn {
    pub min_msat: MilliSat,
    pub max_msat: MilliSat,
    pub fee_base_msat: MilliSat,
    pub fee_proportional_millionths: u64,
    pub cltv_expiry_delta: u16,
}

impl TrampolineOn {
    /// Copy of the template with the routable capacity replaced.
    pub fn with_max(&self, max_msat: MilliSat) -> TrampolineOn {
        TrampolineOn {
            max_msat,
            ..self.clone()
        }
    }
}

/// Per-peer trampoline advertisement, also the wire form sent to peers.
///
/// `Init` is the first non-undesired advertisement to a peer, `Update` a
/// refresh of an earlier one; receivers use the distinction to tell fresh
/// availability from a parameter change. The routing-table collections are
/// always empty when emitted by the broadcaster; only the enclosed status
/// participates in delta detection (see [`TrampolineStatus::offer`]).
#[derive(Debug, Clone, PartialEq)]
pub enum TrampolineStatus {
    Undesired,
    Init {
        updates: Vec<(NodeId, TrampolineOn)>,
        status: TrampolineOn,
    },
    Update {
        removed: Vec<NodeId>,
        changed: HashMap<NodeId, TrampolineOn>,
        status: Option<TrampolineOn>,
    },
}

impl TrampolineStatus {
    pub fn init(status: TrampolineOn) -> TrampolineStatus {
        TrampolineStatus::Init {
            updates: Vec::new(),
            status,
        }
    }

    pub fn update(status: TrampolineOn) -> TrampolineStatus {
        TrampolineStatus::Update {
            removed: Vec::new(),
            changed: HashMap::new(),
            status: Some(status),
        }
    }

    /// The advertised routing offer, if any.
    pub fn offer(&self) -> Option<&TrampolineOn> {
        match self {
            TrampolineStatus::Undesired => None,
            TrampolineStatus::Init {
                status, ..
            } => Some(status),
            TrampolineStatus::Update {
                status, ..
            } => status.as_ref(),
        }
    }
}

/// A provider's fee quote for confirming a swap-out within a block target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTargetFeerate {
    pub block_target: u32,
    pub fee: Satoshi,
}

/// A peer's answer to a [`WireMessage::SwapOutRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutResponse {
    pub feerates: Vec<BlockTargetFeerate>,
}
