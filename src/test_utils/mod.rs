//! Shared test fixtures: mock collaborators and deterministic data
//! constructors.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::channels::{ChannelSnapshot, ChannelSource};
use crate::comms::{CommsTower, ListenerId, PeerEvent, PeerListener, WireMessage, Worker};
use crate::electrum::client::{
    ClientEvent, ClientId, ElectrumClient, ElectrumClientFactory, ElectrumRequest,
    ElectrumResponse, HeaderNotification, ScriptHashNotification,
};
use crate::electrum::servers::{ServerAddress, SslMode};
use crate::error::{ElectrumError, ElectrumResult};
use crate::swap::{SwapOutListener, SwapOutResponseExt};
use crate::types::{BlockHeader, FeatureFlags, MilliSat, NodeId, RemoteNodeInfo, Satoshi, ScriptHash};

/// Deterministic node id; distinct inputs give distinct keys.
pub fn node_id(n: u8) -> NodeId {
    let mut key = [n; 33];
    key[0] = 0x02;
    NodeId(key)
}

/// Deterministic peer info on a loopback address.
pub fn remote_info(n: u8) -> RemoteNodeInfo {
    let address: SocketAddr = format!("127.0.0.1:{}", 9735 + n as u16).parse().unwrap();
    RemoteNodeInfo::new(node_id(n), address)
}

/// Header whose nonce encodes the height, so assertions can tell tips apart.
pub fn header_at(height: u32) -> BlockHeader {
    BlockHeader {
        version: 0x2000_0000,
        time: 1_700_000_000 + height,
        bits: 0x1703_2acd,
        nonce: height,
        ..BlockHeader::default()
    }
}

/// Deterministic server address.
pub fn server(n: u8) -> ServerAddress {
    ServerAddress::new(format!("electrum{}.test", n), 50_002, SslMode::Loose)
}

/// Channel snapshot usable for routing.
pub fn channel(remote: NodeId, send_msat: u64, receive_msat: u64) -> ChannelSnapshot {
    ChannelSnapshot {
        remote_node_id: remote,
        available_for_send: MilliSat(send_msat),
        available_for_receive: MilliSat(receive_msat),
        operational_and_open: true,
    }
}

/// Yield repeatedly so spawned tasks drain their mailboxes.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Poll `cond` between yields until it holds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..2048 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not satisfied in time");
}

/// Comms tower double recording outbound traffic and listener churn.
///
/// Like the real tower, registering a listener for a peer that is already
/// connected synthesises an immediate `Operational` callback carrying the
/// peer's configured features.
#[derive(Default)]
pub struct MockCommsTower {
    pub sent: Mutex<Vec<(NodeId, WireMessage)>>,
    pub listeners: Mutex<HashMap<NodeId, Vec<PeerListener>>>,
    pub removed: Mutex<Vec<(NodeId, ListenerId)>>,
    pub peer_features: Mutex<HashMap<NodeId, FeatureFlags>>,
}

impl MockCommsTower {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a peer as connected with the given features.
    pub fn set_peer_features(&self, info: &RemoteNodeInfo, features: FeatureFlags) {
        self.peer_features.lock().unwrap().insert(info.node_id, features);
    }

    /// Deliver an event to every listener registered for the peer.
    pub fn deliver(&self, info: &RemoteNodeInfo, event: PeerEvent) {
        let listeners = self.listeners.lock().unwrap();
        if let Some(registered) = listeners.get(&info.node_id) {
            for listener in registered {
                let _ = listener.events.send(event.clone());
            }
        }
    }

    pub fn sent_to(&self, node: NodeId) -> Vec<WireMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == node)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn take_sent(&self) -> Vec<(NodeId, WireMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.lock().unwrap().len()
    }
}

impl CommsTower for MockCommsTower {
    fn listen(&self, listener: PeerListener, remote: &RemoteNodeInfo) {
        if let Some(features) = self.peer_features.lock().unwrap().get(&remote.node_id) {
            let _ = listener.events.send(PeerEvent::Operational {
                worker: Worker::new(remote.clone()),
                their_init: *features,
            });
        }
        self.listeners.lock().unwrap().entry(remote.node_id).or_default().push(listener);
    }

    fn remove_listener(&self, remote: &RemoteNodeInfo, listener: ListenerId) {
        if let Some(registered) = self.listeners.lock().unwrap().get_mut(&remote.node_id) {
            registered.retain(|l| l.id != listener);
        }
        self.removed.lock().unwrap().push((remote.node_id, listener));
    }

    fn send_many(&self, message: Option<WireMessage>, to: NodeId) {
        if let Some(msg) = message {
            self.sent.lock().unwrap().push((to, msg));
        }
    }
}

/// Channel manager double with swappable balances.
#[derive(Default)]
pub struct MockChannelSource {
    channels: Mutex<Vec<ChannelSnapshot>>,
}

impl MockChannelSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_channels(&self, channels: Vec<ChannelSnapshot>) {
        *self.channels.lock().unwrap() = channels;
    }
}

impl ChannelSource for MockChannelSource {
    fn channels(&self) -> Vec<ChannelSnapshot> {
        self.channels.lock().unwrap().clone()
    }
}

/// Electrum client double recording subscriptions and requests.
pub struct MockElectrumClient {
    pub id: ClientId,
    pub header_listeners: Mutex<Vec<UnboundedSender<HeaderNotification>>>,
    pub script_listeners: Mutex<Vec<(ScriptHash, UnboundedSender<ScriptHashNotification>)>>,
    pub requests: Mutex<Vec<ElectrumRequest>>,
}

impl MockElectrumClient {
    fn new(id: ClientId) -> Self {
        Self {
            id,
            header_listeners: Mutex::new(Vec::new()),
            script_listeners: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn header_listener_count(&self) -> usize {
        self.header_listeners.lock().unwrap().len()
    }
}

#[async_trait]
impl ElectrumClient for MockElectrumClient {
    fn subscribe_headers(&self, listener: UnboundedSender<HeaderNotification>) {
        self.header_listeners.lock().unwrap().push(listener);
    }

    fn subscribe_script_hash(
        &self,
        script_hash: ScriptHash,
        listener: UnboundedSender<ScriptHashNotification>,
    ) {
        self.script_listeners.lock().unwrap().push((script_hash, listener));
    }

    async fn request(&self, request: ElectrumRequest) -> ElectrumResult<ElectrumResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(ElectrumResponse::FeeEstimate {
            fee_per_kb: Satoshi(1_000),
        })
    }
}

/// Client factory double. Tests drive the pool by emitting [`ClientEvent`]s
/// through the events channel captured on the first connect.
#[derive(Default)]
pub struct ScriptedFactory {
    pub connects: Mutex<Vec<(ClientId, ServerAddress)>>,
    pub clients: Mutex<HashMap<ClientId, Arc<MockElectrumClient>>>,
    pub events: Mutex<Option<UnboundedSender<ClientEvent>>>,
    pub fail_hosts: Mutex<HashSet<String>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make connect attempts against this host fail at the factory level.
    pub fn fail_host(&self, host: &str) {
        self.fail_hosts.lock().unwrap().insert(host.to_string());
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connected_ids(&self) -> Vec<ClientId> {
        self.connects.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn client(&self, id: ClientId) -> Arc<MockElectrumClient> {
        self.clients.lock().unwrap().get(&id).cloned().expect("no such client")
    }

    pub fn emit(&self, event: ClientEvent) {
        let events = self.events.lock().unwrap();
        let sender = events.as_ref().expect("no connect happened yet");
        let _ = sender.send(event);
    }

    pub fn ready(&self, id: ClientId, height: u32) {
        self.emit(ClientEvent::Ready {
            source: id,
            height,
            tip: header_at(height),
        });
    }

    pub fn announce(&self, id: ClientId, height: u32) {
        self.emit(ClientEvent::HeaderSubscription {
            source: id,
            height,
            tip: header_at(height),
        });
    }

    pub fn disconnect(&self, id: ClientId) {
        self.emit(ClientEvent::Disconnected {
            source: id,
        });
    }
}

#[async_trait]
impl ElectrumClientFactory for ScriptedFactory {
    async fn connect(
        &self,
        id: ClientId,
        address: &ServerAddress,
        events: UnboundedSender<ClientEvent>,
    ) -> ElectrumResult<Arc<dyn ElectrumClient>> {
        *self.events.lock().unwrap() = Some(events);
        self.connects.lock().unwrap().push((id, address.clone()));

        if self.fail_hosts.lock().unwrap().contains(&address.host) {
            return Err(ElectrumError::Connection(format!("refused by {}", address)));
        }

        let client = Arc::new(MockElectrumClient::new(id));
        self.clients.lock().unwrap().insert(id, client.clone());
        Ok(client)
    }
}

/// Swap-out outcome as observed through the callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Pending,
    Found(Vec<SwapOutResponseExt>),
    NoProvider,
    Timeout,
}

/// Callback recorder for swap-out searches.
#[derive(Clone)]
pub struct RecordingSwapListener {
    outcome: Arc<Mutex<SwapOutcome>>,
}

impl RecordingSwapListener {
    pub fn new() -> Self {
        Self {
            outcome: Arc::new(Mutex::new(SwapOutcome::Pending)),
        }
    }

    pub fn outcome(&self) -> SwapOutcome {
        self.outcome.lock().unwrap().clone()
    }

    pub fn is_decided(&self) -> bool {
        self.outcome() != SwapOutcome::Pending
    }
}

impl Default for RecordingSwapListener {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapOutListener for RecordingSwapListener {
    fn on_found(&mut self, offers: Vec<SwapOutResponseExt>) {
        let mut outcome = self.outcome.lock().unwrap();
        assert_eq!(*outcome, SwapOutcome::Pending, "callback fired twice");
        *outcome = SwapOutcome::Found(offers);
    }

    fn on_no_provider_swap_out_support(&mut self) {
        let mut outcome = self.outcome.lock().unwrap();
        assert_eq!(*outcome, SwapOutcome::Pending, "callback fired twice");
        *outcome = SwapOutcome::NoProvider;
    }

    fn on_timeout_and_no_response(&mut self) {
        let mut outcome = self.outcome.lock().unwrap();
        assert_eq!(*outcome, SwapOutcome::Pending, "callback fired twice");
        *outcome = SwapOutcome::Timeout;
    }
}
