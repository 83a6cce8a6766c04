//! Periodic broadcaster of per-peer trampoline routing advertisements.
//!
//! The broadcaster recomputes every connected peer's advertisement from
//! current channel balances on a fixed tick and sends only the entries
//! whose offer actually changed, so peers with stable balances produce no
//! traffic. All handling is serialised on a private task; [`process`]
//! merely enqueues.
//!
//! [`process`]: TrampolineBroadcaster::process

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::channels::{ChannelSnapshot, ChannelSource};
use crate::comms::{
    CommsTower, ListenerId, PeerEvent, PeerListener, TrampolineOn, TrampolineStatus, WireMessage,
};
use crate::types::{FeatureFlags, MilliSat, NodeId, RemoteNodeInfo};

/// Interval between advertisement recomputations.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

/// Share of a channel's send capacity offered for routing by default.
pub const DEFAULT_MAX_ROUTABLE_RATIO: f64 = 0.9;

/// Whether the user has routing enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BroadcasterState {
    RoutingDisabled,
    RoutingEnabled,
}

/// User-selected routing parameters carried alongside the state.
///
/// After the user turns routing off the state machine stays in
/// `RoutingEnabled` and only the data reverts to `RoutingOff`; the next
/// `RoutingOn` re-enables through the any-state arm.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastStatus {
    RoutingOff,
    RoutingOn(TrampolineOn),
}

/// The advertisement last sent to one peer, plus what is needed to
/// recompute the next one.
#[derive(Debug, Clone)]
pub struct LastBroadcast {
    pub last: TrampolineStatus,
    pub info: RemoteNodeInfo,
    pub max_routable_ratio: f64,
}

impl LastBroadcast {
    /// Fresh entry for a peer that just became operational. Nothing has
    /// been advertised yet, so the first recomputation produces an `Init`.
    pub fn seed(info: RemoteNodeInfo) -> LastBroadcast {
        LastBroadcast {
            last: TrampolineStatus::Undesired,
            info,
            max_routable_ratio: DEFAULT_MAX_ROUTABLE_RATIO,
        }
    }

    /// Recompute this peer's advertisement from current channel balances.
    ///
    /// What we can route towards the peer is bounded by what the peer's own
    /// channels can receive and by what every other channel can send, the
    /// latter discounted by `max_routable_ratio` to leave headroom for the
    /// wallet's own payments.
    pub fn updated(&self, usable: &[ChannelSnapshot], params: &TrampolineOn) -> LastBroadcast {
        let peer = self.info.node_id;

        let can_receive_from_peer: MilliSat = usable
            .iter()
            .filter(|chan| chan.remote_node_id == peer)
            .map(|chan| chan.available_for_receive)
            .sum();

        let can_send_out: MilliSat = usable
            .iter()
            .filter(|chan| chan.remote_node_id != peer)
            .map(|chan| chan.available_for_send.scaled(self.max_routable_ratio))
            .sum();

        let status = params.with_max(can_send_out.min(can_receive_from_peer));

        let last = if status.min_msat > status.max_msat {
            TrampolineStatus::Undesired
        } else if matches!(self.last, TrampolineStatus::Undesired) {
            TrampolineStatus::init(status)
        } else {
            TrampolineStatus::update(status)
        };

        LastBroadcast {
            last,
            info: self.info.clone(),
            max_routable_ratio: self.max_routable_ratio,
        }
    }
}

/// Inputs accepted by the broadcaster.
#[derive(Debug)]
pub enum BroadcasterMsg {
    /// Periodic tick; recompute and dispatch deltas.
    CmdBroadcast,
    /// User enabled or reconfigured routing.
    RoutingOn(TrampolineOn),
    /// User disabled routing.
    RoutingOff,
    /// A peer supporting private routing became operational.
    LastBroadcast(LastBroadcast),
    /// A peer connection went away.
    PeerDisconnected(NodeId),
    /// Tear down the processing task.
    Shutdown,
}

/// Handle to the broadcaster state machine.
pub struct TrampolineBroadcaster {
    tx: UnboundedSender<BroadcasterMsg>,
    peer_events: UnboundedSender<PeerEvent>,
    listener_id: ListenerId,
    tick_task: JoinHandle<()>,
    forward_task: JoinHandle<()>,
}

impl TrampolineBroadcaster {
    /// Spawn the broadcaster with its periodic tick. Initially routing is
    /// disabled and no peers are tracked.
    pub fn start(channels: Arc<dyn ChannelSource>, tower: Arc<dyn CommsTower>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        let core = BroadcasterCore {
            state: BroadcasterState::RoutingDisabled,
            data: BroadcastStatus::RoutingOff,
            broadcasters: HashMap::new(),
            channels,
            tower,
        };
        tokio::spawn(core.run(rx));

        let forward_task = tokio::spawn(forward_peer_events(peer_rx, tx.clone()));

        let tick_tx = tx.clone();
        let tick_task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + BROADCAST_INTERVAL;
            let mut interval = tokio::time::interval_at(start, BROADCAST_INTERVAL);
            loop {
                interval.tick().await;
                if tick_tx.send(BroadcasterMsg::CmdBroadcast).is_err() {
                    break;
                }
            }
        });

        Self {
            tx,
            peer_events: peer_tx,
            listener_id: ListenerId::next(),
            tick_task,
            forward_task,
        }
    }

    /// Enqueue a message; non-blocking, silently dropped after shutdown.
    pub fn process(&self, msg: BroadcasterMsg) {
        let _ = self.tx.send(msg);
    }

    /// The listener to register with the comms tower for every peer. Only
    /// peers advertising private routing support enter the working set.
    pub fn connection_listener(&self) -> PeerListener {
        PeerListener {
            id: self.listener_id,
            events: self.peer_events.clone(),
        }
    }

    /// Cancel the periodic tick and stop processing.
    pub fn become_shut_down(&self) {
        self.tick_task.abort();
        self.forward_task.abort();
        let _ = self.tx.send(BroadcasterMsg::Shutdown);
    }
}

/// Translate tower connection events into broadcaster inputs.
async fn forward_peer_events(
    mut rx: UnboundedReceiver<PeerEvent>,
    tx: UnboundedSender<BroadcasterMsg>,
) {
    while let Some(event) = rx.recv().await {
        let msg = match event {
            PeerEvent::Operational {
                worker,
                their_init,
            } if their_init.has(FeatureFlags::PRIVATE_ROUTING) => {
                BroadcasterMsg::LastBroadcast(LastBroadcast::seed(worker.info))
            }
            PeerEvent::Disconnected {
                worker,
            } => BroadcasterMsg::PeerDisconnected(worker.info.node_id),
            _ => continue,
        };
        if tx.send(msg).is_err() {
            break;
        }
    }
}

struct BroadcasterCore {
    state: BroadcasterState,
    data: BroadcastStatus,
    broadcasters: HashMap<NodeId, LastBroadcast>,
    channels: Arc<dyn ChannelSource>,
    tower: Arc<dyn CommsTower>,
}

impl BroadcasterCore {
    async fn run(mut self, mut rx: UnboundedReceiver<BroadcasterMsg>) {
        while let Some(msg) = rx.recv().await {
            if !self.handle(msg) {
                break;
            }
        }
    }

    fn handle(&mut self, msg: BroadcasterMsg) -> bool {
        match msg {
            BroadcasterMsg::RoutingOn(params) => {
                tracing::info!("Trampoline routing enabled");
                self.data = BroadcastStatus::RoutingOn(params);
                self.state = BroadcasterState::RoutingEnabled;
            }

            BroadcasterMsg::RoutingOff
                if self.state == BroadcasterState::RoutingEnabled
                    && matches!(self.data, BroadcastStatus::RoutingOn(_)) =>
            {
                tracing::info!("Trampoline routing disabled, informing {} peers", self.broadcasters.len());
                for (node_id, entry) in self.broadcasters.iter_mut() {
                    entry.last = TrampolineStatus::Undesired;
                    self.tower
                        .send_many(Some(WireMessage::Trampoline(TrampolineStatus::Undesired)), *node_id);
                }
                // State stays RoutingEnabled; only the data latches off.
                self.data = BroadcastStatus::RoutingOff;
            }

            BroadcasterMsg::LastBroadcast(seed) => {
                tracing::debug!("Tracking routing peer {}", seed.info.node_id);
                self.broadcasters.insert(seed.info.node_id, seed);
            }

            BroadcasterMsg::PeerDisconnected(node_id) => {
                self.broadcasters.remove(&node_id);
            }

            BroadcasterMsg::CmdBroadcast => self.broadcast(),

            BroadcasterMsg::Shutdown => return false,

            // Unmatched inputs leave the state untouched.
            _ => {}
        }
        true
    }

    fn broadcast(&mut self) {
        let params = match (&self.state, &self.data) {
            (BroadcasterState::RoutingEnabled, BroadcastStatus::RoutingOn(params)) => params.clone(),
            _ => return,
        };

        let usable: Vec<ChannelSnapshot> =
            self.channels.channels().into_iter().filter(|chan| chan.operational_and_open).collect();

        let mut sent = 0usize;
        let mut next = HashMap::with_capacity(self.broadcasters.len());
        for (node_id, prev) in &self.broadcasters {
            let fresh = prev.updated(&usable, &params);
            if fresh.last.offer() != prev.last.offer() {
                self.tower.send_many(Some(WireMessage::Trampoline(fresh.last.clone())), *node_id);
                sent += 1;
            }
            next.insert(*node_id, fresh);
        }
        self.broadcasters = next;

        if sent > 0 {
            tracing::debug!("Broadcast routing updates to {} of {} peers", sent, self.broadcasters.len());
        }
    }
}
