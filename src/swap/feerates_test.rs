use std::time::Duration;

use crate::comms::{BlockTargetFeerate, PeerEvent, SwapOutResponse, WireMessage, Worker};
use crate::test_utils::{
    remote_info, settle, wait_for, MockCommsTower, RecordingSwapListener, SwapOutcome,
};
use crate::types::{FeatureFlags, RemoteNodeInfo, Satoshi};

use super::feerates::{CmdStartSwapOutSearch, SwapMsg, SwapOutFeeratesHandler};

fn usable_response() -> SwapOutResponse {
    SwapOutResponse {
        feerates: vec![
            BlockTargetFeerate {
                block_target: 6,
                fee: Satoshi(1_500),
            },
            BlockTargetFeerate {
                block_target: 36,
                fee: Satoshi(400),
            },
        ],
    }
}

fn dust_response() -> SwapOutResponse {
    SwapOutResponse {
        feerates: vec![
            BlockTargetFeerate {
                block_target: 6,
                fee: Satoshi(252),
            },
            BlockTargetFeerate {
                block_target: 36,
                fee: Satoshi(100),
            },
        ],
    }
}

fn reply(tower: &MockCommsTower, peer: &RemoteNodeInfo, response: SwapOutResponse) {
    tower.deliver(
        peer,
        PeerEvent::SwapOutMessage {
            worker: Worker::new(peer.clone()),
            message: response,
        },
    );
}

#[tokio::test(start_paused = true)]
async fn test_one_offer_then_grace_period_elapses() {
    let tower = MockCommsTower::new();
    let peers = [remote_info(1), remote_info(2), remote_info(3)];
    for peer in &peers {
        tower.set_peer_features(peer, FeatureFlags::CHAIN_SWAP);
    }

    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));
    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: peers.to_vec(),
    }));

    // Every capable peer is solicited.
    wait_for(|| tower.sent_count() == 3).await;
    assert!(tower
        .take_sent()
        .iter()
        .all(|(_, msg)| matches!(msg, WireMessage::SwapOutRequest)));

    // One usable offer arrives early; the search keeps waiting for more.
    tokio::time::advance(Duration::from_secs(1)).await;
    reply(&tower, &peers[0], usable_response());
    settle().await;
    assert!(!callbacks.is_decided());

    // Five seconds after the first offer the search concludes with it.
    tokio::time::advance(Duration::from_secs(5)).await;
    wait_for(|| callbacks.is_decided()).await;
    match callbacks.outcome() {
        SwapOutcome::Found(offers) => {
            assert_eq!(offers.len(), 1);
            assert_eq!(offers[0].info, peers[0]);
        }
        other => panic!("expected Found, got {:?}", other),
    }

    // The private listeners were removed from every solicited peer.
    assert_eq!(tower.removed_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hard_timeout_without_any_response() {
    let tower = MockCommsTower::new();
    let peers = [remote_info(1), remote_info(2), remote_info(3)];
    for peer in &peers {
        tower.set_peer_features(peer, FeatureFlags::CHAIN_SWAP);
    }

    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));
    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: peers.to_vec(),
    }));
    wait_for(|| tower.sent_count() == 3).await;

    tokio::time::advance(Duration::from_secs(30)).await;
    wait_for(|| callbacks.is_decided()).await;
    assert_eq!(callbacks.outcome(), SwapOutcome::Timeout);
    assert_eq!(tower.removed_count(), 3);
}

#[tokio::test]
async fn test_all_offers_in_concludes_without_waiting() {
    let tower = MockCommsTower::new();
    let peers = [remote_info(1), remote_info(2)];
    for peer in &peers {
        tower.set_peer_features(peer, FeatureFlags::CHAIN_SWAP);
    }

    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));
    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: peers.to_vec(),
    }));
    wait_for(|| tower.sent_count() == 2).await;

    reply(&tower, &peers[0], usable_response());
    reply(&tower, &peers[1], usable_response());
    wait_for(|| callbacks.is_decided()).await;

    match callbacks.outcome() {
        SwapOutcome::Found(offers) => assert_eq!(offers.len(), 2),
        other => panic!("expected Found, got {:?}", other),
    }
}

#[tokio::test]
async fn test_no_peer_supports_swap_out() {
    let tower = MockCommsTower::new();
    let peers = [remote_info(1), remote_info(2)];
    for peer in &peers {
        tower.set_peer_features(peer, FeatureFlags::NONE);
    }

    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));
    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: peers.to_vec(),
    }));

    wait_for(|| callbacks.is_decided()).await;
    assert_eq!(callbacks.outcome(), SwapOutcome::NoProvider);
    assert_eq!(tower.sent_count(), 0);
    assert_eq!(tower.removed_count(), 2);
}

#[tokio::test]
async fn test_unusable_offer_counts_as_rejection() {
    let tower = MockCommsTower::new();
    let peers = [remote_info(1), remote_info(2)];
    for peer in &peers {
        tower.set_peer_features(peer, FeatureFlags::CHAIN_SWAP);
    }

    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));
    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: peers.to_vec(),
    }));
    wait_for(|| tower.sent_count() == 2).await;

    // Every quote below the relay floor: the peer is dropped, not stored.
    reply(&tower, &peers[0], dust_response());
    settle().await;
    assert!(!callbacks.is_decided());

    // The remaining peer answers and the search completes with one offer.
    reply(&tower, &peers[1], usable_response());
    wait_for(|| callbacks.is_decided()).await;
    match callbacks.outcome() {
        SwapOutcome::Found(offers) => {
            assert_eq!(offers.len(), 1);
            assert_eq!(offers[0].info, peers[1]);
        }
        other => panic!("expected Found, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_capable_list_reports_no_provider() {
    let tower = MockCommsTower::new();
    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));

    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: Vec::new(),
    }));

    wait_for(|| callbacks.is_decided()).await;
    assert_eq!(callbacks.outcome(), SwapOutcome::NoProvider);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_detaches_without_callbacks() {
    let tower = MockCommsTower::new();
    let peer = remote_info(1);
    tower.set_peer_features(&peer, FeatureFlags::CHAIN_SWAP);

    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));
    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: vec![peer.clone()],
    }));
    wait_for(|| tower.sent_count() == 1).await;

    handler.process(SwapMsg::CmdCancel);
    wait_for(|| tower.removed_count() == 1).await;

    // Repeated cancels and the eventual hard timeout are no-ops.
    handler.process(SwapMsg::CmdCancel);
    tokio::time::advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(tower.removed_count(), 1);
    assert_eq!(callbacks.outcome(), SwapOutcome::Pending);
}

#[tokio::test]
async fn test_responses_after_finalization_are_dropped() {
    let tower = MockCommsTower::new();
    let peer = remote_info(1);
    tower.set_peer_features(&peer, FeatureFlags::CHAIN_SWAP);

    let callbacks = RecordingSwapListener::new();
    let handler = SwapOutFeeratesHandler::start(tower.clone(), Box::new(callbacks.clone()));
    handler.process(SwapMsg::CmdStart(CmdStartSwapOutSearch {
        capable: vec![peer.clone()],
    }));
    wait_for(|| tower.sent_count() == 1).await;

    reply(&tower, &peer, usable_response());
    wait_for(|| callbacks.is_decided()).await;
    assert!(matches!(callbacks.outcome(), SwapOutcome::Found(_)));

    // The recorder panics on a second callback, so delivering more input
    // after finalization must leave the outcome untouched.
    reply(&tower, &peer, usable_response());
    handler.process(SwapMsg::SearchTimeout);
    settle().await;
    assert!(matches!(callbacks.outcome(), SwapOutcome::Found(_)));
}
