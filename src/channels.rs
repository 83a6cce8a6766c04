//! Read-only view of the channel manager.
//!
//! The broadcaster only needs per-channel balances and the remote node id;
//! the channel manager itself is an external collaborator injected behind
//! the [`ChannelSource`] trait.

use crate::types::{MilliSat, NodeId};

/// Point-in-time balances of one channel.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub remote_node_id: NodeId,
    pub available_for_send: MilliSat,
    pub available_for_receive: MilliSat,
    /// Whether the channel is operational and open, i.e. usable for routing.
    pub operational_and_open: bool,
}

/// Read-only access to the wallet's channels.
pub trait ChannelSource: Send + Sync {
    fn channels(&self) -> Vec<ChannelSnapshot>;
}
