//! Scripted in-process node for tests.
//!
//! Answers the node-control and retrieval calls the harness makes, with a
//! configurable per-request retrieval latency, injected failures, a simulated
//! swarm and a log of every request it saw.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::address::ContentAddress;
use crate::transport::{HttpResponse, Transport, TransportError};

type Request = (String, Vec<String>);

pub struct MockTransport {
    latency: Duration,
    block_size: usize,
    blocks: HashMap<String, Vec<u8>>,
    address_failures: HashMap<String, u16>,
    method_overrides: Mutex<HashMap<String, HttpResponse>>,
    swarm: Mutex<HashSet<String>>,
    requests: Mutex<Vec<Request>>,
    unreachable: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            block_size: 1000,
            blocks: HashMap::new(),
            address_failures: HashMap::new(),
            method_overrides: Mutex::new(HashMap::new()),
            swarm: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            unreachable: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay applied to every `cat` / `block/get` request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Length of the zero-filled body served for addresses without an
    /// explicit block.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_block(mut self, addr: &ContentAddress, bytes: Vec<u8>) -> Self {
        self.blocks.insert(addr.to_string(), bytes);
        self
    }

    pub fn fail_address(mut self, addr: &ContentAddress, status: u16) -> Self {
        self.address_failures.insert(addr.to_string(), status);
        self
    }

    /// Makes every call whose path ends with `method` (e.g. `repo/gc`)
    /// answer `status`.
    pub fn fail_method(self, method: &str, status: u16) -> Self {
        self.set_method_failure(method, Some(status));
        self
    }

    pub fn set_method_failure(&self, method: &str, status: Option<u16>) {
        match status {
            Some(code) => self.set_method_response(
                method,
                HttpResponse::new(code, "{\"Message\":\"injected failure\"}"),
            ),
            None => {
                self.method_overrides
                    .lock()
                    .expect("mock lock")
                    .remove(method);
            }
        }
    }

    /// Answers every call whose path ends with `method` with `resp`.
    pub fn set_method_response(&self, method: &str, resp: HttpResponse) {
        self.method_overrides
            .lock()
            .expect("mock lock")
            .insert(method.to_string(), resp);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Puts a peer in the swarm without a connect request.
    pub fn with_connected(self, peer_id: &str) -> Self {
        self.swarm
            .lock()
            .expect("mock lock")
            .insert(peer_id.to_string());
        self
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.swarm.lock().expect("mock lock").contains(peer_id)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("mock lock").clone()
    }

    /// Number of requests whose path ends with `method`.
    pub fn count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .expect("mock lock")
            .iter()
            .filter(|(url, _)| url.ends_with(method))
            .count()
    }

    /// Number of retrieval requests (`cat` plus `block/get`).
    pub fn fetch_count(&self) -> usize {
        self.count("/cat") + self.count("/block/get")
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn method_override(&self, url: &str) -> Option<HttpResponse> {
        self.method_overrides
            .lock()
            .expect("mock lock")
            .iter()
            .find(|(method, _)| url.ends_with(method.as_str()))
            .map(|(_, resp)| resp.clone())
    }

    fn serve_block(&self, arg: &str) -> HttpResponse {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(status) = self.address_failures.get(arg) {
            return HttpResponse::new(*status, format!("{{\"Message\":\"block {arg} unavailable\"}}"));
        }
        let body = self
            .blocks
            .get(arg)
            .cloned()
            .unwrap_or_else(|| vec![0u8; self.block_size]);
        HttpResponse::new(200, body)
    }

    fn serve_swarm(&self, url: &str, arg: Option<&str>) -> HttpResponse {
        let mut swarm = self.swarm.lock().expect("mock lock");
        if url.ends_with("/swarm/peers") {
            let peers: Vec<_> = swarm
                .iter()
                .map(|id| json!({ "Addr": "/ip4/10.0.0.1/tcp/4001", "Peer": id }))
                .collect();
            let body = if peers.is_empty() {
                json!({ "Peers": null })
            } else {
                json!({ "Peers": peers })
            };
            return HttpResponse::new(200, body.to_string());
        }

        let Some(id) = arg.and_then(|a| a.rsplit_once("/p2p/")).map(|(_, id)| id.to_string())
        else {
            return HttpResponse::new(400, "{\"Message\":\"invalid peer address\"}");
        };
        if url.ends_with("/swarm/connect") {
            swarm.insert(id.clone());
            HttpResponse::new(200, json!({ "Strings": [format!("connect {id} success")] }).to_string())
        } else {
            swarm.remove(&id);
            HttpResponse::new(200, json!({ "Strings": [format!("disconnect {id} success")] }).to_string())
        }
    }
}

impl Transport for MockTransport {
    fn post(&self, url: &str, args: &[&str]) -> Result<HttpResponse, TransportError> {
        self.requests.lock().expect("mock lock").push((
            url.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError("connection refused".into()));
        }
        if let Some(resp) = self.method_override(url) {
            return Ok(resp);
        }

        let arg = args.first().copied();
        if url.ends_with("/cat") || url.ends_with("/block/get") {
            return Ok(self.serve_block(arg.unwrap_or_default()));
        }
        if url.contains("/swarm/") {
            return Ok(self.serve_swarm(url, arg));
        }
        if url.ends_with("/repo/gc") {
            return Ok(HttpResponse::new(200, ""));
        }
        if url.ends_with("/config") {
            let key = args.first().copied().unwrap_or_default();
            let value = args.get(1).copied().unwrap_or_default();
            return Ok(HttpResponse::new(
                200,
                json!({ "Key": key, "Value": value }).to_string(),
            ));
        }
        Ok(HttpResponse::new(404, "404 page not found"))
    }
}
