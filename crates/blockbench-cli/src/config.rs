//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `$BLOCKBENCH_CONFIG` environment variable
//! 2. `~/.config/blockbench/config.toml`
//! 3. Built-in defaults (everything is optional)

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use blockbench_core::{ContentAddress, PeerDescriptor, PeerSpec, StrategyKind, ThroughputMode};

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub fetch: FetchConfig,
    pub sweep: SweepConfig,
    pub results: ResultsConfig,
    pub peers: Vec<PeerSpec>,
    pub universe: UniverseConfig,
}

/// Local node control API.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Base URL of the node's HTTP API.
    pub api: String,
    /// Multiaddr the node's gateway listens on.
    pub gateway_address: String,
    /// Push `gateway_address` into the node config before a sweep.
    pub set_gateway: bool,
    /// Per-request transport timeout.
    pub timeout_secs: u64,
}

/// Block retrieval settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retrieval API base URL. Default: the node API.
    pub endpoint: Option<String>,
    /// Check raw blocks against their sha2-256 digest.
    pub verify_blocks: bool,
}

/// Trial loop settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Trials per (peer, strategy) segment.
    pub trials: usize,
    /// Persist the ledger every N recorded trials as well as at segment end.
    pub checkpoint_every: Option<usize>,
    /// Seed for batch sampling. Default: OS entropy.
    pub seed: Option<u64>,
    pub strategies: Vec<StrategyKind>,
    /// Record throughput with per-block truncation, as legacy ledgers did.
    pub legacy_truncated_throughput: bool,
}

/// Ledger and chart output.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    pub dir: PathBuf,
}

/// Addresses trials sample from.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub addresses: Vec<String>,
}

// --- Defaults ---

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            fetch: FetchConfig::default(),
            sweep: SweepConfig::default(),
            results: ResultsConfig::default(),
            peers: default_peers(),
            universe: UniverseConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api: "http://127.0.0.1:5001/api/v0".into(),
            gateway_address: "/ip4/127.0.0.1/tcp/8082".into(),
            set_gateway: false,
            timeout_secs: 120,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            trials: 1,
            checkpoint_every: None,
            seed: None,
            strategies: StrategyKind::ALL.to_vec(),
            legacy_truncated_throughput: false,
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            addresses: DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn default_peers() -> Vec<PeerSpec> {
    vec![
        PeerSpec {
            nickname: "new".into(),
            multiaddr: "/ip4/172.31.94.153/tcp/4001/p2p/12D3KooWLuXsYf5sKz9ewuz5SF2WLwex6ervC4wQ5UUssQmscMWA".into(),
        },
        PeerSpec {
            nickname: "old".into(),
            multiaddr: "/ip4/167.71.180.28/tcp/4001/p2p/12D3KooWFqzYkjofVzvo7MdYy4h3cZwixJC1f6NFWGYPELU7yBNy".into(),
        },
    ]
}

/// dag-pb chunks of the benchmark dataset.
const DEFAULT_UNIVERSE: &[&str] = &[
    "QmSVpVmx3zQN9iZqgHu4iSDpeEzVbchTpYKTCKoMLUvYuH",
    "QmXv6jUdFf8ATKST3ibVFNw6FUFhnZ9AUJ5MaeZTZ6QXy8",
    "QmVUdeTeKQuVJtwQEURiDdN3qYmBCugNk1LYU9VC5QbuGd",
    "QmdUrZSVKGCDuNM6ykRZ3jACVE3kATbzVFKziFERntrd8B",
    "QmXsLDN94kBCSp7pZkEJMbKK2U5ofN8HA5T9stXfSzRfEE",
    "Qme8yMzfHAdMRjXv1WAXfyY1WwfjbiPSQkSxBPg1hGqKcz",
    "QmTcBMAfwjg6NQqMNfCNjpNcFCJL5UGgB55Hnfhbn1ZmF3",
    "QmUtUvPCtPzRSK4jJWahLUSm4bvfH4VWKc2AA6wBqx7f6a",
    "QmW7cTjvA4WKE3ockTCfyhhT2uqX4vfY9ucdyUMLB8jDpx",
    "QmS6SHRT1FXmAvqGkPC6SssmwjRFqMur9qMdtdGqumrYy8",
    "QmaDmZ8iQzX2bvVX5cAtqG9CtvHN4yVMqugC71MJ8DtdqM",
    "QmeAuE35LraSgVSQpkcbFCxvBvooALxFFKoQN9qPK9oxLE",
];

// --- Resolution ---

impl Config {
    pub fn peer_descriptors(&self) -> Result<Vec<PeerDescriptor>> {
        let peers = self
            .peers
            .iter()
            .map(|spec| PeerDescriptor::try_from(spec.clone()))
            .collect::<Result<Vec<_>, _>>()
            .context("invalid [[peers]] entry")?;
        for (i, peer) in peers.iter().enumerate() {
            if peers[..i].iter().any(|p| p.nickname() == peer.nickname()) {
                bail!("duplicate peer nickname: {}", peer.nickname());
            }
        }
        Ok(peers)
    }

    pub fn universe(&self) -> Result<Vec<ContentAddress>> {
        let mut addresses: Vec<ContentAddress> = Vec::with_capacity(self.universe.addresses.len());
        for raw in &self.universe.addresses {
            let addr: ContentAddress = raw
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("invalid address in [universe]: {raw}"))?;
            if !addresses.contains(&addr) {
                addresses.push(addr);
            }
        }
        if addresses.is_empty() {
            bail!("[universe] addresses is empty");
        }
        Ok(addresses)
    }

    pub fn fetch_endpoint(&self) -> &str {
        self.fetch.endpoint.as_deref().unwrap_or(&self.node.api)
    }

    pub fn throughput_mode(&self) -> ThroughputMode {
        if self.sweep.legacy_truncated_throughput {
            ThroughputMode::LegacyTruncated
        } else {
            ThroughputMode::Exact
        }
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config() -> Result<Config> {
    let path = config_path();

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("BLOCKBENCH_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Some(home) = dirs_home() {
        let p = home.join(".config").join("blockbench").join("config.toml");
        return Some(p);
    }

    None
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Show the active config path (for `blockbench config`).
pub fn show_config_path() -> String {
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
