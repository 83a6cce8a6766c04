use std::time::Duration;

use crate::comms::{CommsTower, PeerEvent, TrampolineOn, TrampolineStatus, WireMessage, Worker};
use crate::test_utils::{channel, remote_info, settle, wait_for, MockChannelSource, MockCommsTower};
use crate::types::{FeatureFlags, MilliSat};

use super::broadcaster::{BroadcasterMsg, LastBroadcast, TrampolineBroadcaster};

fn params(min_msat: u64) -> TrampolineOn {
    TrampolineOn {
        min_msat: MilliSat(min_msat),
        max_msat: MilliSat::ZERO,
        fee_base_msat: MilliSat(1_000),
        fee_proportional_millionths: 1_000,
        cltv_expiry_delta: 144,
    }
}

fn offer_of(msg: &WireMessage) -> &TrampolineOn {
    match msg {
        WireMessage::Trampoline(status) => status.offer().expect("expected a routing offer"),
        other => panic!("expected trampoline status, got {:?}", other),
    }
}

#[test]
fn test_updated_capacity_formula() {
    let a = remote_info(1);
    let b = remote_info(2);
    let usable = vec![
        channel(a.node_id, 300_000, 450_000),
        channel(a.node_id, 0, 50_000),
        channel(b.node_id, 1_000_000, 200_000),
    ];

    let seed = LastBroadcast::seed(a.clone());
    let fresh = seed.updated(&usable, &params(10_000));

    // receive over the peer's channels: 450k + 50k; send over others: 1M * 0.9
    match &fresh.last {
        TrampolineStatus::Init {
            status, ..
        } => assert_eq!(status.max_msat, MilliSat(500_000)),
        other => panic!("expected Init, got {:?}", other),
    }
}

#[test]
fn test_updated_progression_init_then_update() {
    let a = remote_info(1);
    let b = remote_info(2);
    let usable =
        vec![channel(a.node_id, 100_000, 400_000), channel(b.node_id, 1_000_000, 100_000)];
    let template = params(10_000);

    let first = LastBroadcast::seed(a).updated(&usable, &template);
    assert!(matches!(first.last, TrampolineStatus::Init { .. }));

    let second = first.updated(&usable, &template);
    assert!(matches!(second.last, TrampolineStatus::Update { .. }));
    assert_eq!(first.last.offer(), second.last.offer());
}

#[test]
fn test_updated_undesired_when_min_exceeds_capacity() {
    let a = remote_info(1);
    let b = remote_info(2);
    let usable = vec![channel(a.node_id, 0, 800_000), channel(b.node_id, 2_000_000, 0)];

    let fresh = LastBroadcast::seed(a).updated(&usable, &params(1_000_000));
    assert_eq!(fresh.last, TrampolineStatus::Undesired);
}

#[tokio::test]
async fn test_tick_sends_only_deltas() {
    let tower = MockCommsTower::new();
    let source = MockChannelSource::new();
    let a = remote_info(1);
    let b = remote_info(2);
    source.set_channels(vec![
        channel(a.node_id, 1_000_000, 500_000),
        channel(b.node_id, 1_000_000, 500_000),
    ]);

    let broadcaster = TrampolineBroadcaster::start(source.clone(), tower.clone());
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(a.clone())));
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(b.clone())));
    broadcaster.process(BroadcasterMsg::RoutingOn(params(10_000)));

    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    wait_for(|| tower.sent_count() == 2).await;

    for info in [&a, &b] {
        let messages = tower.sent_to(info.node_id);
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], WireMessage::Trampoline(TrampolineStatus::Init { .. })));
        assert_eq!(offer_of(&messages[0]).max_msat, MilliSat(500_000));
    }
    tower.take_sent();

    // Unchanged balances: the tick is suppressed entirely.
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    settle().await;
    assert_eq!(tower.sent_count(), 0);

    // A payment shifts balances and both peers get an Update.
    source.set_channels(vec![
        channel(a.node_id, 1_100_000, 400_000),
        channel(b.node_id, 900_000, 600_000),
    ]);
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    wait_for(|| tower.sent_count() == 2).await;

    for (info, expected) in [(&a, 400_000), (&b, 600_000)] {
        let messages = tower.sent_to(info.node_id);
        assert!(matches!(&messages[0], WireMessage::Trampoline(TrampolineStatus::Update { .. })));
        assert_eq!(offer_of(&messages[0]).max_msat, MilliSat(expected));
    }

    broadcaster.become_shut_down();
}

#[tokio::test]
async fn test_undesired_gate_and_recovery() {
    let tower = MockCommsTower::new();
    let source = MockChannelSource::new();
    let a = remote_info(1);
    let b = remote_info(2);

    // Capacity below the advertised minimum from the start.
    source.set_channels(vec![
        channel(a.node_id, 0, 800_000),
        channel(b.node_id, 2_000_000, 0),
    ]);

    let broadcaster = TrampolineBroadcaster::start(source.clone(), tower.clone());
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(a.clone())));
    broadcaster.process(BroadcasterMsg::RoutingOn(params(1_000_000)));

    // A peer that never heard from us stays silent while undesired.
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    settle().await;
    assert_eq!(tower.sent_count(), 0);

    // Capacity recovers above the minimum: the peer gets an Init.
    source.set_channels(vec![
        channel(a.node_id, 0, 2_000_000),
        channel(b.node_id, 2_000_000, 0),
    ]);
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    wait_for(|| tower.sent_count() == 1).await;
    assert!(matches!(
        &tower.sent_to(a.node_id)[0],
        WireMessage::Trampoline(TrampolineStatus::Init { .. })
    ));
    tower.take_sent();

    // Capacity drops under the minimum again: the peer is told Undesired.
    source.set_channels(vec![
        channel(a.node_id, 0, 800_000),
        channel(b.node_id, 2_000_000, 0),
    ]);
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    wait_for(|| tower.sent_count() == 1).await;
    assert_eq!(
        tower.sent_to(a.node_id),
        vec![WireMessage::Trampoline(TrampolineStatus::Undesired)]
    );

    broadcaster.become_shut_down();
}

#[tokio::test]
async fn test_routing_off_latches_and_broadcasts_undesired() {
    let tower = MockCommsTower::new();
    let source = MockChannelSource::new();
    let a = remote_info(1);
    let b = remote_info(2);
    source.set_channels(vec![
        channel(a.node_id, 1_000_000, 500_000),
        channel(b.node_id, 1_000_000, 500_000),
    ]);

    let broadcaster = TrampolineBroadcaster::start(source.clone(), tower.clone());
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(a.clone())));
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(b.clone())));
    broadcaster.process(BroadcasterMsg::RoutingOn(params(10_000)));
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    wait_for(|| tower.sent_count() == 2).await;
    tower.take_sent();

    // Turning routing off notifies every peer unconditionally.
    broadcaster.process(BroadcasterMsg::RoutingOff);
    wait_for(|| tower.sent_count() == 2).await;
    for info in [&a, &b] {
        assert_eq!(
            tower.sent_to(info.node_id),
            vec![WireMessage::Trampoline(TrampolineStatus::Undesired)]
        );
    }
    tower.take_sent();

    // Latched off: ticks are ignored even though balances allow routing.
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    settle().await;
    assert_eq!(tower.sent_count(), 0);

    // A second RoutingOff is ignored too.
    broadcaster.process(BroadcasterMsg::RoutingOff);
    settle().await;
    assert_eq!(tower.sent_count(), 0);

    // Re-enabling starts over with Init advertisements.
    broadcaster.process(BroadcasterMsg::RoutingOn(params(10_000)));
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    wait_for(|| tower.sent_count() == 2).await;
    for info in [&a, &b] {
        assert!(matches!(
            &tower.sent_to(info.node_id)[0],
            WireMessage::Trampoline(TrampolineStatus::Init { .. })
        ));
    }

    broadcaster.become_shut_down();
}

#[tokio::test]
async fn test_only_private_routing_peers_are_tracked() {
    let tower = MockCommsTower::new();
    let source = MockChannelSource::new();
    let a = remote_info(1);
    let b = remote_info(2);
    source.set_channels(vec![
        channel(a.node_id, 1_000_000, 500_000),
        channel(b.node_id, 1_000_000, 500_000),
    ]);

    let broadcaster = TrampolineBroadcaster::start(source.clone(), tower.clone());

    tower.set_peer_features(&a, FeatureFlags::PRIVATE_ROUTING);
    tower.set_peer_features(&b, FeatureFlags::NONE);
    tower.listen(broadcaster.connection_listener(), &a);
    tower.listen(broadcaster.connection_listener(), &b);

    broadcaster.process(BroadcasterMsg::RoutingOn(params(10_000)));
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    wait_for(|| tower.sent_count() == 1).await;
    assert_eq!(tower.sent_to(b.node_id).len(), 0);
    assert_eq!(tower.sent_to(a.node_id).len(), 1);
    tower.take_sent();

    // Disconnecting drops the peer from the working set.
    tower.deliver(
        &a,
        PeerEvent::Disconnected {
            worker: Worker::new(a.clone()),
        },
    );
    settle().await;
    source.set_channels(vec![
        channel(a.node_id, 500_000, 700_000),
        channel(b.node_id, 500_000, 700_000),
    ]);
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    settle().await;
    assert_eq!(tower.sent_count(), 0);

    broadcaster.become_shut_down();
}

#[tokio::test]
async fn test_ticks_ignored_while_routing_disabled() {
    let tower = MockCommsTower::new();
    let source = MockChannelSource::new();
    let a = remote_info(1);
    let b = remote_info(2);
    source.set_channels(vec![
        channel(a.node_id, 1_000_000, 500_000),
        channel(b.node_id, 1_000_000, 500_000),
    ]);

    let broadcaster = TrampolineBroadcaster::start(source, tower.clone());
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(a)));
    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    settle().await;
    assert_eq!(tower.sent_count(), 0);

    broadcaster.become_shut_down();
}

#[tokio::test]
async fn test_shutdown_stops_processing() {
    let tower = MockCommsTower::new();
    let source = MockChannelSource::new();
    let a = remote_info(1);
    let b = remote_info(2);
    source.set_channels(vec![
        channel(a.node_id, 1_000_000, 500_000),
        channel(b.node_id, 1_000_000, 500_000),
    ]);

    let broadcaster = TrampolineBroadcaster::start(source, tower.clone());
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(a)));
    broadcaster.process(BroadcasterMsg::RoutingOn(params(10_000)));
    broadcaster.become_shut_down();

    broadcaster.process(BroadcasterMsg::CmdBroadcast);
    settle().await;
    assert_eq!(tower.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_tick_drives_broadcast() {
    let tower = MockCommsTower::new();
    let source = MockChannelSource::new();
    let a = remote_info(1);
    let b = remote_info(2);
    source.set_channels(vec![
        channel(a.node_id, 1_000_000, 500_000),
        channel(b.node_id, 1_000_000, 500_000),
    ]);

    let broadcaster = TrampolineBroadcaster::start(source, tower.clone());
    broadcaster.process(BroadcasterMsg::LastBroadcast(LastBroadcast::seed(a.clone())));
    broadcaster.process(BroadcasterMsg::RoutingOn(params(10_000)));
    settle().await;
    assert_eq!(tower.sent_count(), 0);

    tokio::time::advance(Duration::from_secs(10)).await;
    wait_for(|| tower.sent_count() == 1).await;
    assert!(matches!(
        &tower.sent_to(a.node_id)[0],
        WireMessage::Trampoline(TrampolineStatus::Init { .. })
    ));

    broadcaster.become_shut_down();
}
