use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{BenchError, BenchResult};
use crate::peer::PeerDescriptor;
use crate::transport::{join_url, HttpResponse, Transport, TransportError};

/// Result of an idempotent connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    AlreadyConnected,
    Connected,
}

/// Result of an idempotent disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    NotConnected,
    Disconnected,
}

#[derive(Debug, Deserialize)]
struct SwarmPeers {
    #[serde(rename = "Peers", default)]
    peers: Option<Vec<SwarmPeer>>,
}

#[derive(Debug, Deserialize)]
struct SwarmPeer {
    #[serde(rename = "Peer")]
    peer: String,
}

/// Control client for the local node: swarm membership, garbage collection
/// and gateway configuration.
///
/// Single writer: nothing here guards against two clients driving the same
/// node at once.
pub struct NodeClient<'a> {
    transport: &'a dyn Transport,
    api: String,
}

impl<'a> NodeClient<'a> {
    pub fn new(transport: &'a dyn Transport, api: impl Into<String>) -> Self {
        Self {
            transport,
            api: api.into(),
        }
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    fn call(&self, method: &str, args: &[&str]) -> Result<HttpResponse, TransportError> {
        let url = join_url(&self.api, method);
        debug!("node call: {url} {args:?}");
        self.transport.post(&url, args)
    }

    /// Peer identifiers currently in the node's swarm.
    pub fn connected_peers(&self) -> BenchResult<Vec<String>> {
        self.swarm_listing()
            .map_err(|(status, reason)| BenchError::Maintenance { status, reason })
    }

    /// Membership check for one peer; failures are reported against it.
    pub fn is_connected(&self, peer: &PeerDescriptor) -> BenchResult<bool> {
        let listing = self
            .swarm_listing()
            .map_err(|(status, reason)| connectivity(peer, status, reason))?;
        Ok(listing.iter().any(|id| id == peer.peer_id()))
    }

    fn swarm_listing(&self) -> Result<Vec<String>, (Option<u16>, String)> {
        let resp = self
            .call("swarm/peers", &[])
            .map_err(|e| (None, format!("swarm/peers: {e}")))?;
        if !resp.is_success() {
            return Err((
                Some(resp.status),
                format!("swarm/peers: {}", resp.body_excerpt()),
            ));
        }
        let listing: SwarmPeers = resp
            .json()
            .map_err(|e| (None, format!("swarm/peers: unreadable listing: {e}")))?;
        Ok(listing
            .peers
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.peer)
            .collect())
    }

    pub fn ensure_connected(&self, peer: &PeerDescriptor) -> BenchResult<ConnectOutcome> {
        if self.is_connected(peer)? {
            info!("peer already in swarm: {peer}");
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        let resp = self
            .call("swarm/connect", &[peer.multiaddr()])
            .map_err(|e| connectivity(peer, None, e.to_string()))?;
        if !resp.is_success() {
            return Err(connectivity(peer, Some(resp.status), resp.body_excerpt()));
        }
        info!("peer connected: {peer}");
        Ok(ConnectOutcome::Connected)
    }

    pub fn disconnect(&self, peer: &PeerDescriptor) -> BenchResult<DisconnectOutcome> {
        if !self.is_connected(peer)? {
            info!("peer not in swarm: {peer}");
            return Ok(DisconnectOutcome::NotConnected);
        }
        let target = peer.p2p_addr();
        let resp = self
            .call("swarm/disconnect", &[target.as_str()])
            .map_err(|e| connectivity(peer, None, e.to_string()))?;
        if !resp.is_success() {
            return Err(connectivity(peer, Some(resp.status), resp.body_excerpt()));
        }
        info!("peer disconnected: {peer}");
        Ok(DisconnectOutcome::Disconnected)
    }

    /// Drops unpinned blocks from the local repo so the next fetch has to go
    /// to the network.
    pub fn collect_garbage(&self) -> BenchResult<()> {
        let resp = self.call("repo/gc", &[]).map_err(|e| BenchError::Maintenance {
            status: None,
            reason: format!("repo/gc: {e}"),
        })?;
        if !resp.is_success() {
            return Err(BenchError::Maintenance {
                status: Some(resp.status),
                reason: format!("repo/gc: {}", resp.body_excerpt()),
            });
        }
        info!("garbage collected");
        Ok(())
    }

    /// Points the node's HTTP gateway at `address` (a multiaddr).
    pub fn set_gateway_address(&self, address: &str) -> BenchResult<()> {
        let resp = self
            .call("config", &["Addresses.Gateway", address])
            .map_err(|e| BenchError::Maintenance {
                status: None,
                reason: format!("config: {e}"),
            })?;
        if !resp.is_success() {
            return Err(BenchError::Maintenance {
                status: Some(resp.status),
                reason: format!("config: {}", resp.body_excerpt()),
            });
        }
        info!("gateway address set: {}", String::from_utf8_lossy(&resp.body).trim());
        Ok(())
    }
}

fn connectivity(peer: &PeerDescriptor, status: Option<u16>, reason: String) -> BenchError {
    BenchError::Connectivity {
        peer: peer.multiaddr().to_string(),
        status,
        reason,
    }
}
