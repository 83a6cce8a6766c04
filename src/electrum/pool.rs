//! Supervisor over a pool of Electrum client connections.
//!
//! The pool keeps up to `max_chain_connections` clients alive against
//! randomly picked servers, elects a single master that is authoritative
//! for the chain tip and serves requests, and republishes connection
//! events to registered status listeners and onto the event bus. A
//! disconnect schedules a deferred retry against a fresh address; losing
//! the master promotes the connection with the highest tip.
//!
//! All state lives on a private task draining the pool's mailbox; the
//! public handle only enqueues.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::prelude::*;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;

use crate::config::PoolConfig;
use crate::error::{ElectrumError, ElectrumResult, Result};
use crate::event_bus::EventBus;
use crate::types::{BlockHeader, ScriptHash};

use super::client::{
    ClientEvent, ClientId, ElectrumClient, ElectrumClientFactory, ElectrumRequest,
    ElectrumResponse, HeaderNotification, ScriptHashNotification,
};
use super::servers::{read_server_addresses, ServerAddress};

/// A new tip must exceed the master's height by more than this many blocks
/// before the pool switches master, so peers learning blocks slightly out
/// of order do not cause flapping.
pub const MASTER_SWITCH_HYSTERESIS_BLOCKS: u32 = 2;

/// Connection events delivered to status listeners and the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectrumEvent {
    /// A master connection is available at the given chain tip.
    Ready { source: ClientId, height: u32, tip: BlockHeader, address: ServerAddress },
    /// The pool lost its connections, or the master is being replaced.
    Disconnected { source: ClientId },
}

#[derive(Debug, Clone)]
enum PoolState {
    Disconnected,
    Connected { master: ClientId, tips: HashMap<ClientId, (u32, BlockHeader)> },
}

enum PoolMsg {
    InitConnect,
    Connect,
    ClientConnected { id: ClientId, client: Arc<dyn ElectrumClient> },
    Client(ClientEvent),
    AddStatusListener(UnboundedSender<ElectrumEvent>),
    SubscribeHeaders {
        listener: UnboundedSender<HeaderNotification>,
        reply: oneshot::Sender<ElectrumResult<()>>,
    },
    SubscribeScriptHash {
        script_hash: ScriptHash,
        listener: UnboundedSender<ScriptHashNotification>,
        reply: oneshot::Sender<ElectrumResult<()>>,
    },
    Request {
        request: ElectrumRequest,
        reply: oneshot::Sender<ElectrumResult<ElectrumResponse>>,
    },
}

/// Handle to the Electrum client pool.
#[derive(Clone)]
pub struct ElectrumClientPool {
    tx: UnboundedSender<PoolMsg>,
    block_count: Arc<AtomicU64>,
}

impl ElectrumClientPool {
    /// Create the pool and its processing task. Must run inside a tokio
    /// runtime. Fails on invalid configuration or an unknown chain hash;
    /// a corrupt bundled server list is tolerated and leaves the pool
    /// with nothing to connect to.
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn ElectrumClientFactory>,
        bus: EventBus<ElectrumEvent>,
    ) -> Result<Self> {
        config.validate()?;

        let server_addresses = if let Some(custom) = config.custom_address.clone() {
            vec![custom]
        } else if let Some(servers) = config.servers.clone() {
            servers
        } else {
            match read_server_addresses(config.chain_hash, config.use_onion) {
                Ok(list) => list,
                Err(e @ ElectrumError::UnknownChainHash(_)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Failed to load Electrum server list: {}", e);
                    Vec::new()
                }
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let block_count = Arc::new(AtomicU64::new(0));

        let core = PoolCore {
            config,
            server_addresses,
            state: PoolState::Disconnected,
            addresses: HashMap::new(),
            clients: HashMap::new(),
            status_listeners: Vec::new(),
            block_count: block_count.clone(),
            bus,
            factory,
            next_client_id: 0,
            self_tx: tx.downgrade(),
            client_events: client_tx,
        };
        tokio::spawn(core.run(rx));
        tokio::spawn(forward_client_events(client_rx, tx.downgrade()));

        Ok(Self {
            tx,
            block_count,
        })
    }

    /// Launch the initial connection attempts.
    pub fn init_connect(&self) {
        let _ = self.tx.send(PoolMsg::InitConnect);
    }

    /// Register a status listener. If the pool is already connected the
    /// listener immediately receives a synthetic [`ElectrumEvent::Ready`]
    /// reflecting the current master.
    pub fn add_status_listener(&self, listener: UnboundedSender<ElectrumEvent>) {
        let _ = self.tx.send(PoolMsg::AddStatusListener(listener));
    }

    /// Subscribe to chain-tip announcements of the master connection.
    pub async fn subscribe_to_headers(
        &self,
        listener: UnboundedSender<HeaderNotification>,
    ) -> ElectrumResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::SubscribeHeaders {
                listener,
                reply,
            })
            .map_err(|_| ElectrumError::NotConnected)?;
        rx.await.map_err(|_| ElectrumError::NotConnected)?
    }

    /// Subscribe to status changes of a script hash on the master connection.
    pub async fn subscribe_to_script_hash(
        &self,
        script_hash: ScriptHash,
        listener: UnboundedSender<ScriptHashNotification>,
    ) -> ElectrumResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::SubscribeScriptHash {
                script_hash,
                listener,
                reply,
            })
            .map_err(|_| ElectrumError::NotConnected)?;
        rx.await.map_err(|_| ElectrumError::NotConnected)?
    }

    /// Issue a request on the master connection.
    pub async fn request(&self, request: ElectrumRequest) -> ElectrumResult<ElectrumResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::Request {
                request,
                reply,
            })
            .map_err(|_| ElectrumError::NotConnected)?;
        rx.await.map_err(|_| ElectrumError::NotConnected)?
    }

    /// The published chain height. Never decreases.
    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::SeqCst)
    }

    /// Shared counter handle for downstream subsystems.
    pub fn block_count_handle(&self) -> Arc<AtomicU64> {
        self.block_count.clone()
    }
}

async fn forward_client_events(
    mut rx: UnboundedReceiver<ClientEvent>,
    tx: WeakUnboundedSender<PoolMsg>,
) {
    while let Some(event) = rx.recv().await {
        let Some(tx) = tx.upgrade() else { break };
        if tx.send(PoolMsg::Client(event)).is_err() {
            break;
        }
    }
}

struct PoolCore {
    config: PoolConfig,
    server_addresses: Vec<ServerAddress>,
    state: PoolState,
    addresses: HashMap<ClientId, ServerAddress>,
    clients: HashMap<ClientId, Arc<dyn ElectrumClient>>,
    status_listeners: Vec<UnboundedSender<ElectrumEvent>>,
    block_count: Arc<AtomicU64>,
    bus: EventBus<ElectrumEvent>,
    factory: Arc<dyn ElectrumClientFactory>,
    next_client_id: u64,
    self_tx: WeakUnboundedSender<PoolMsg>,
    client_events: UnboundedSender<ClientEvent>,
}

impl PoolCore {
    async fn run(mut self, mut rx: UnboundedReceiver<PoolMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
        }
    }

    fn handle(&mut self, msg: PoolMsg) {
        match msg {
            PoolMsg::InitConnect => {
                let attempts = self.config.max_chain_connections.min(self.server_addresses.len());
                tracing::info!("Starting {} Electrum connections", attempts);
                for _ in 0..attempts {
                    self.connect();
                }
            }

            PoolMsg::Connect => self.connect(),

            PoolMsg::ClientConnected {
                id,
                client,
            } => {
                // The address entry may be gone if the client already
                // disconnected while the handle was in flight.
                if self.addresses.contains_key(&id) {
                    self.clients.insert(id, client);
                }
            }

            PoolMsg::AddStatusListener(listener) => {
                if let PoolState::Connected {
                    master,
                    tips,
                } = &self.state
                {
                    if let (Some(&(height, tip)), Some(address)) =
                        (tips.get(master), self.addresses.get(master))
                    {
                        let _ = listener.send(ElectrumEvent::Ready {
                            source: *master,
                            height,
                            tip,
                            address: address.clone(),
                        });
                    }
                }
                self.status_listeners.push(listener);
            }

            PoolMsg::SubscribeHeaders {
                listener,
                reply,
            } => {
                let result = self.master_client().map(|client| client.subscribe_headers(listener));
                let _ = reply.send(result);
            }

            PoolMsg::SubscribeScriptHash {
                script_hash,
                listener,
                reply,
            } => {
                let result = self
                    .master_client()
                    .map(|client| client.subscribe_script_hash(script_hash, listener));
                let _ = reply.send(result);
            }

            PoolMsg::Request {
                request,
                reply,
            } => match self.master_client() {
                Ok(client) => {
                    tokio::spawn(async move {
                        let _ = reply.send(client.request(request).await);
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },

            PoolMsg::Client(event) => self.handle_client_event(event),
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Ready {
                source,
                height,
                tip,
            } if self.addresses.contains_key(&source) => {
                self.subscribe_pool_headers(source);
                self.handle_header(source, height, tip);
            }

            ClientEvent::HeaderSubscription {
                source,
                height,
                tip,
            } if self.addresses.contains_key(&source)
                && matches!(self.state, PoolState::Connected { .. }) =>
            {
                self.handle_header(source, height, tip);
            }

            ClientEvent::Disconnected {
                source,
            } => self.handle_disconnected(source),

            // Events from clients we no longer track are stale.
            _ => {}
        }
    }

    /// Fold a chain-tip report into the pool state. Installs the first
    /// reporting connection as master; afterwards a non-master connection
    /// takes over only when its tip exceeds the master's by more than
    /// [`MASTER_SWITCH_HYSTERESIS_BLOCKS`].
    fn handle_header(&mut self, conn: ClientId, height: u32, tip: BlockHeader) {
        let Some(address) = self.addresses.get(&conn).cloned() else { return };
        self.update_block_count(height);

        let next = match self.state.clone() {
            PoolState::Disconnected => {
                tracing::info!("Electrum master is {} at height {}", address, height);
                self.publish(ElectrumEvent::Ready {
                    source: conn,
                    height,
                    tip,
                    address,
                });
                PoolState::Connected {
                    master: conn,
                    tips: HashMap::from([(conn, (height, tip))]),
                }
            }

            PoolState::Connected {
                master,
                mut tips,
            } => {
                let master_height = tips.get(&master).map(|&(h, _)| h).unwrap_or(0);
                tips.insert(conn, (height, tip));

                if conn != master && height > master_height + MASTER_SWITCH_HYSTERESIS_BLOCKS {
                    tracing::info!(
                        "Electrum master switched to {} at height {} (was at {})",
                        address,
                        height,
                        master_height
                    );
                    self.publish(ElectrumEvent::Disconnected {
                        source: master,
                    });
                    // The source names the outgoing master; pool listeners
                    // ignore the field and reset their subscriptions.
                    self.publish(ElectrumEvent::Ready {
                        source: master,
                        height,
                        tip,
                        address,
                    });
                    PoolState::Connected {
                        master: conn,
                        tips,
                    }
                } else {
                    PoolState::Connected {
                        master,
                        tips,
                    }
                }
            }
        };

        self.state = next;
    }

    fn handle_disconnected(&mut self, source: ClientId) {
        let Some(address) = self.addresses.remove(&source) else { return };
        self.clients.remove(&source);
        tracing::debug!("Electrum server {} ({}) disconnected", address, source);
        self.schedule_reconnect();

        match self.state.clone() {
            PoolState::Disconnected => {}

            PoolState::Connected {
                master,
                mut tips,
            } => {
                tips.remove(&source);

                if tips.is_empty() {
                    tracing::warn!("Lost all Electrum connections");
                    self.publish(ElectrumEvent::Disconnected {
                        source,
                    });
                    self.state = PoolState::Disconnected;
                } else if master != source {
                    self.state = PoolState::Connected {
                        master,
                        tips,
                    };
                } else {
                    let mut candidates: Vec<(ClientId, u32, BlockHeader)> =
                        tips.iter().map(|(&id, &(height, tip))| (id, height, tip)).collect();
                    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
                    let (best, height, tip) = candidates[0];

                    if let Some(best_address) = self.addresses.get(&best).cloned() {
                        tracing::info!(
                            "Electrum master is now {} at height {}",
                            best_address,
                            height
                        );
                        self.publish(ElectrumEvent::Ready {
                            source: best,
                            height,
                            tip,
                            address: best_address,
                        });
                    }
                    self.state = PoolState::Connected {
                        master: best,
                        tips,
                    };
                }
            }
        }
    }

    /// Start one connection attempt against an unused random address.
    fn connect(&mut self) {
        if self.addresses.len() >= self.config.max_chain_connections {
            return;
        }

        let Some(address) = self.pick_address() else {
            tracing::debug!("No unused Electrum server addresses left");
            return;
        };

        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;
        self.addresses.insert(id, address.clone());
        tracing::debug!("Connecting to Electrum server {} as {}", address, id);

        let factory = self.factory.clone();
        let events = self.client_events.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            match factory.connect(id, &address, events.clone()).await {
                Ok(client) => {
                    if let Some(tx) = self_tx.upgrade() {
                        let _ = tx.send(PoolMsg::ClientConnected {
                            id,
                            client,
                        });
                    }
                }
                Err(e) => {
                    tracing::debug!("Electrum connect to {} failed: {}", address, e);
                    let _ = events.send(ClientEvent::Disconnected {
                        source: id,
                    });
                }
            }
        });
    }

    /// A uniform random server address not currently attempted or active.
    fn pick_address(&self) -> Option<ServerAddress> {
        let used: HashSet<&ServerAddress> = self.addresses.values().collect();
        let candidates: Vec<&ServerAddress> =
            self.server_addresses.iter().filter(|address| !used.contains(address)).collect();
        candidates.choose(&mut thread_rng()).map(|address| (*address).clone())
    }

    fn schedule_reconnect(&self) {
        let delay = self.config.reconnect_delay;
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = self_tx.upgrade() {
                let _ = tx.send(PoolMsg::Connect);
            }
        });
    }

    /// Register the pool itself for the client's chain-tip announcements.
    fn subscribe_pool_headers(&self, source: ClientId) {
        let Some(client) = self.clients.get(&source) else { return };
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.subscribe_headers(tx);

        let events = self.client_events.clone();
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let forwarded = events.send(ClientEvent::HeaderSubscription {
                    source,
                    height: notification.height,
                    tip: notification.header,
                });
                if forwarded.is_err() {
                    break;
                }
            }
        });
    }

    fn master_client(&self) -> ElectrumResult<Arc<dyn ElectrumClient>> {
        match &self.state {
            PoolState::Connected {
                master, ..
            } => self.clients.get(master).cloned().ok_or(ElectrumError::NotConnected),
            PoolState::Disconnected => Err(ElectrumError::NotConnected),
        }
    }

    fn update_block_count(&self, height: u32) {
        // Monotonic; a report below the published height is dropped.
        self.block_count.fetch_max(height as u64, Ordering::SeqCst);
    }

    fn publish(&mut self, event: ElectrumEvent) {
        self.status_listeners.retain(|listener| listener.send(event.clone()).is_ok());
        self.bus.publish(event);
    }
}
