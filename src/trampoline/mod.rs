//! Trampoline routing advertisement broadcasting.

pub mod broadcaster;

#[cfg(test)]
mod broadcaster_test;

pub use broadcaster::{
    BroadcastStatus, BroadcasterMsg, LastBroadcast, TrampolineBroadcaster, BROADCAST_INTERVAL,
    DEFAULT_MAX_ROUTABLE_RATIO,
};
