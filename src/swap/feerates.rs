//! One-shot collection of swap-out fee offers from channel peers.
//!
//! For each swap-out attempt a fresh handler is started. It solicits every
//! capable channel counterparty, waits up to 30 seconds for the first
//! usable offer and a further 5 seconds for stragglers after that, then
//! reports the collected offers through caller-supplied callbacks and
//! detaches its peer listeners. The instance is finished after exactly one
//! callback has fired.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::comms::{
    CommsTower, ListenerId, PeerEvent, PeerListener, SwapOutResponse, WireMessage,
};
use crate::types::{FeatureFlags, NodeId, RemoteNodeInfo, Satoshi};

/// Offers whose every feerate falls below this are unusable: such a
/// transaction could never relay.
pub const MIN_CHAIN_FEE: Satoshi = Satoshi(253);

/// Patience for the first usable offer.
pub const FIRST_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Latency tolerance for additional offers once one has arrived.
pub const REST_OF_RESPONSES_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwapState {
    Initial,
    WaitingFirstResponse,
    WaitingRestOfResponses,
    Finalized,
}

/// A peer's offer bundled with who made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutResponseExt {
    pub response: SwapOutResponse,
    pub info: RemoteNodeInfo,
}

/// The channel counterparties to solicit.
#[derive(Debug, Clone)]
pub struct CmdStartSwapOutSearch {
    pub capable: Vec<RemoteNodeInfo>,
}

/// Outcome callbacks supplied by the caller. Exactly one fires, once.
pub trait SwapOutListener: Send + 'static {
    /// At least one usable offer was collected.
    fn on_found(&mut self, offers: Vec<SwapOutResponseExt>);

    /// Every solicited peer rejected or lacks swap-out support.
    fn on_no_provider_swap_out_support(&mut self);

    /// Nobody answered within the patience window.
    fn on_timeout_and_no_response(&mut self);
}

/// Inputs accepted by the handler.
#[derive(Debug)]
pub enum SwapMsg {
    /// Seed the search and register peer listeners.
    CmdStart(CmdStartSwapOutSearch),
    /// Connection event from one of the solicited peers.
    Peer(PeerEvent),
    /// Detach listeners and finish without further callbacks.
    CmdCancel,
    /// A patience window elapsed; conclude with whatever arrived.
    SearchTimeout,
}

/// Handle to a single swap-out fee search.
pub struct SwapOutFeeratesHandler {
    tx: UnboundedSender<SwapMsg>,
}

impl SwapOutFeeratesHandler {
    /// Spawn the handler. Nothing happens until [`SwapMsg::CmdStart`] is
    /// processed.
    pub fn start(tower: Arc<dyn CommsTower>, callbacks: Box<dyn SwapOutListener>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let listener_id = ListenerId::next();

        let core = SwapCore {
            state: SwapState::Initial,
            results: HashMap::new(),
            cmd_start: None,
            tower,
            callbacks,
            listener_id,
            peer_events: peer_tx.clone(),
            self_tx: tx.clone(),
        };
        tokio::spawn(core.run(rx));
        tokio::spawn(forward_peer_events(peer_rx, tx.clone()));

        Self {
            tx,
        }
    }

    /// Enqueue a message; silently dropped once the search has finished.
    pub fn process(&self, msg: SwapMsg) {
        let _ = self.tx.send(msg);
    }
}

async fn forward_peer_events(mut rx: UnboundedReceiver<PeerEvent>, tx: UnboundedSender<SwapMsg>) {
    while let Some(event) = rx.recv().await {
        if tx.send(SwapMsg::Peer(event)).is_err() {
            break;
        }
    }
}

struct SwapCore {
    state: SwapState,
    /// One entry per solicited peer: `None` while outstanding, `Some`
    /// once answered; removal means unsupported or rejected.
    results: HashMap<NodeId, Option<SwapOutResponseExt>>,
    cmd_start: Option<CmdStartSwapOutSearch>,
    tower: Arc<dyn CommsTower>,
    callbacks: Box<dyn SwapOutListener>,
    listener_id: ListenerId,
    peer_events: UnboundedSender<PeerEvent>,
    self_tx: UnboundedSender<SwapMsg>,
}

impl SwapCore {
    async fn run(mut self, mut rx: UnboundedReceiver<SwapMsg>) {
        while let Some(msg) = rx.recv().await {
            if !self.handle(msg) {
                break;
            }
        }
    }

    fn handle(&mut self, msg: SwapMsg) -> bool {
        let waiting = matches!(
            self.state,
            SwapState::WaitingFirstResponse | SwapState::WaitingRestOfResponses
        );

        match msg {
            SwapMsg::CmdStart(cmd) if self.state == SwapState::Initial => {
                tracing::debug!("Soliciting swap-out offers from {} peers", cmd.capable.len());
                for info in &cmd.capable {
                    self.results.insert(info.node_id, None);
                    let listener = PeerListener {
                        id: self.listener_id,
                        events: self.peer_events.clone(),
                    };
                    self.tower.listen(listener, info);
                }
                self.cmd_start = Some(cmd);
                self.state = SwapState::WaitingFirstResponse;
                self.schedule_timeout(FIRST_RESPONSE_TIMEOUT);
                self.do_search(false)
            }

            SwapMsg::Peer(PeerEvent::Operational {
                worker,
                their_init,
            }) if waiting => {
                if !self.results.contains_key(&worker.info.node_id) {
                    return true;
                }
                if their_init.has(FeatureFlags::CHAIN_SWAP) {
                    self.tower.send_many(Some(WireMessage::SwapOutRequest), worker.info.node_id);
                    true
                } else {
                    self.results.remove(&worker.info.node_id);
                    self.do_search(false)
                }
            }

            SwapMsg::Peer(PeerEvent::SwapOutMessage {
                worker,
                message,
            }) if waiting => {
                let node_id = worker.info.node_id;
                if !self.results.contains_key(&node_id) {
                    return true;
                }

                if message.feerates.iter().all(|quote| quote.fee < MIN_CHAIN_FEE) {
                    // An offer that could never relay counts as no answer.
                    self.results.remove(&node_id);
                } else {
                    let ext = SwapOutResponseExt {
                        response: message,
                        info: worker.info,
                    };
                    self.results.insert(node_id, Some(ext));
                    if self.state == SwapState::WaitingFirstResponse {
                        self.state = SwapState::WaitingRestOfResponses;
                        self.schedule_timeout(REST_OF_RESPONSES_TIMEOUT);
                    }
                }
                self.do_search(false)
            }

            SwapMsg::SearchTimeout if waiting => self.do_search(true),

            SwapMsg::CmdCancel if waiting => self.cancel(),

            // Everything else, including inputs after finalization.
            _ => true,
        }
    }

    /// Conclude the search if its outcome is decided; `force` concludes
    /// with whatever has arrived so far.
    fn do_search(&mut self, force: bool) -> bool {
        let responses: Vec<SwapOutResponseExt> =
            self.results.values().filter_map(|slot| slot.clone()).collect();

        if !self.results.is_empty() && responses.len() == self.results.len() {
            self.callbacks.on_found(responses);
            self.cancel()
        } else if self.results.is_empty() {
            self.callbacks.on_no_provider_swap_out_support();
            self.cancel()
        } else if force && !responses.is_empty() {
            self.callbacks.on_found(responses);
            self.cancel()
        } else if force {
            self.callbacks.on_timeout_and_no_response();
            self.cancel()
        } else {
            true
        }
    }

    /// Detach the peer listeners without touching the channels themselves
    /// and finish the state machine.
    fn cancel(&mut self) -> bool {
        if let Some(cmd) = &self.cmd_start {
            for info in &cmd.capable {
                self.tower.remove_listener(info, self.listener_id);
            }
        }
        self.state = SwapState::Finalized;
        false
    }

    fn schedule_timeout(&self, delay: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SwapMsg::SearchTimeout);
        });
    }
}
