use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BenchError, BenchResult};
use crate::fetch::StrategyKind;

/// A remote node the benchmark targets, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PeerSpec", into = "PeerSpec")]
pub struct PeerDescriptor {
    nickname: String,
    multiaddr: String,
    peer_id: String,
}

/// Serialized form of a peer as it appears in config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSpec {
    pub nickname: String,
    pub multiaddr: String,
}

impl PeerDescriptor {
    pub fn new(nickname: impl Into<String>, multiaddr: impl Into<String>) -> BenchResult<Self> {
        let nickname = nickname.into();
        let multiaddr = multiaddr.into();

        if nickname.is_empty()
            || nickname == "."
            || nickname == ".."
            || nickname.contains(['/', '\\'])
        {
            return Err(BenchError::Config(format!(
                "peer nickname must be a plain path component: {nickname:?}"
            )));
        }

        let peer_id = multiaddr
            .rsplit_once("/p2p/")
            .or_else(|| multiaddr.rsplit_once("/ipfs/"))
            .map(|(_, id)| id.to_string())
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .ok_or_else(|| {
                BenchError::Config(format!("multiaddr has no /p2p/<peer-id> suffix: {multiaddr}"))
            })?;

        Ok(Self {
            nickname,
            multiaddr,
            peer_id,
        })
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn multiaddr(&self) -> &str {
        &self.multiaddr
    }

    /// Node identifier, the last `/p2p/` component of the multiaddr.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Address that names the peer without a transport, so a disconnect
    /// closes every connection to it.
    pub fn p2p_addr(&self) -> String {
        format!("/p2p/{}", self.peer_id)
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.nickname, self.multiaddr)
    }
}

impl TryFrom<PeerSpec> for PeerDescriptor {
    type Error = BenchError;

    fn try_from(spec: PeerSpec) -> Result<Self, Self::Error> {
        Self::new(spec.nickname, spec.multiaddr)
    }
}

impl From<PeerDescriptor> for PeerSpec {
    fn from(peer: PeerDescriptor) -> Self {
        Self {
            nickname: peer.nickname,
            multiaddr: peer.multiaddr,
        }
    }
}

/// One (peer, strategy) combination of the sweep; owns one ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchPair {
    pub peer: PeerDescriptor,
    pub strategy: StrategyKind,
}

impl BenchPair {
    pub fn new(peer: PeerDescriptor, strategy: StrategyKind) -> Self {
        Self { peer, strategy }
    }
}

impl fmt::Display for BenchPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} peer {}", self.peer.nickname(), self.strategy)
    }
}
