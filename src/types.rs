//! Common type definitions for the wallet connectivity layer.

use std::fmt;
use std::iter::Sum;
use std::net::SocketAddr;
use std::ops::{Add, AddAssign, BitOr};

use serde::{Deserialize, Serialize};

/// Compressed public key identifying a Lightning peer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; 33]);

impl NodeId {
    /// Hex representation of the underlying key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Address and public key of a Lightning peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteNodeInfo {
    pub node_id: NodeId,
    pub address: SocketAddr,
}

impl RemoteNodeInfo {
    pub fn new(node_id: NodeId, address: SocketAddr) -> Self {
        Self {
            node_id,
            address,
        }
    }
}

/// Feature bits a peer advertises in its `Init` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags(pub u64);

impl FeatureFlags {
    /// Peer relays payments for us as a private trampoline router.
    pub const PRIVATE_ROUTING: FeatureFlags = FeatureFlags(1 << 0);
    /// Peer offers on-chain swap-out service over hosted channels.
    pub const CHAIN_SWAP: FeatureFlags = FeatureFlags(1 << 1);

    pub const NONE: FeatureFlags = FeatureFlags(0);

    /// Whether every bit in `flags` is set in `self`.
    pub fn has(self, flags: FeatureFlags) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl BitOr for FeatureFlags {
    type Output = FeatureFlags;

    fn bitor(self, rhs: FeatureFlags) -> FeatureFlags {
        FeatureFlags(self.0 | rhs.0)
    }
}

/// Millisatoshi amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MilliSat(pub u64);

impl MilliSat {
    pub const ZERO: MilliSat = MilliSat(0);

    /// Scale the amount by a ratio in `[0, 1]`, truncating to whole msat.
    pub fn scaled(self, ratio: f64) -> MilliSat {
        MilliSat((self.0 as f64 * ratio) as u64)
    }
}

impl Add for MilliSat {
    type Output = MilliSat;

    fn add(self, rhs: MilliSat) -> MilliSat {
        MilliSat(self.0 + rhs.0)
    }
}

impl AddAssign for MilliSat {
    fn add_assign(&mut self, rhs: MilliSat) {
        self.0 += rhs.0;
    }
}

impl Sum for MilliSat {
    fn sum<I: Iterator<Item = MilliSat>>(iter: I) -> MilliSat {
        iter.fold(MilliSat::ZERO, Add::add)
    }
}

impl fmt::Display for MilliSat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}msat", self.0)
    }
}

/// Satoshi amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Satoshi(pub u64);

impl Satoshi {
    pub fn to_msat(self) -> MilliSat {
        MilliSat(self.0 * 1000)
    }
}

impl fmt::Display for Satoshi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}sat", self.0)
    }
}

/// 32-byte genesis-block hash identifying a Bitcoin network.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainHash(pub [u8; 32]);

impl ChainHash {
    pub const MAINNET: ChainHash = ChainHash([
        0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7,
        0x4f, 0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ]);

    pub const TESTNET: ChainHash = ChainHash([
        0x43, 0x49, 0x7f, 0xd7, 0xf8, 0x26, 0x95, 0x71, 0x08, 0xf4, 0xa3, 0x0f, 0xd9, 0xce, 0xc3,
        0xae, 0xba, 0x79, 0x97, 0x20, 0x84, 0xe9, 0x0e, 0xad, 0x01, 0xea, 0x33, 0x09, 0x00, 0x00,
        0x00, 0x00,
    ]);

    pub const SIGNET: ChainHash = ChainHash([
        0xf6, 0x1e, 0xee, 0x3b, 0x63, 0xa3, 0x80, 0xa4, 0x77, 0xa0, 0x63, 0xaf, 0x32, 0xb2, 0xbb,
        0xc9, 0x7c, 0x9f, 0xf9, 0xf0, 0x1f, 0x2c, 0x42, 0x25, 0xe9, 0x73, 0x98, 0x81, 0x08, 0x00,
        0x00, 0x00,
    ]);

    pub const REGTEST: ChainHash = ChainHash([
        0x06, 0x22, 0x6e, 0x46, 0x11, 0x1a, 0x0b, 0x59, 0xca, 0xaf, 0x12, 0x60, 0x43, 0xeb, 0x5b,
        0xbf, 0x28, 0xc3, 0x4f, 0x3a, 0x5e, 0x33, 0x2a, 0x1f, 0xc7, 0xb2, 0xb7, 0x3c, 0xf1, 0x88,
        0x91, 0x0f,
    ]);
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({})", self)
    }
}

/// Bitcoin network flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    /// The genesis-block hash for this network.
    pub fn chain_hash(self) -> ChainHash {
        match self {
            Network::Mainnet => ChainHash::MAINNET,
            Network::Testnet => ChainHash::TESTNET,
            Network::Signet => ChainHash::SIGNET,
            Network::Regtest => ChainHash::REGTEST,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        };
        write!(f, "{}", name)
    }
}

/// Double-SHA256 block hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; 32]);

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

/// Bitcoin block header as reported by Electrum header subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: BlockHash,
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// SHA256 of an output script, as used by Electrum subscriptions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHash(pub [u8; 32]);

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptHash({})", self)
    }
}
