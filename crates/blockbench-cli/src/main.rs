mod config;
mod http;
mod report;
mod trial;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;

use blockbench_core::{
    ConnectOutcome, DisconnectOutcome, NodeClient, PeerDescriptor, StrategyKind,
};
use blockbench_store::JsonLedgerStore;

use config::Config;
use http::UreqTransport;
use report::Reporter;
use trial::{sweep_pairs, TrialOrchestrator, TrialSettings};

#[derive(Parser)]
#[command(
    name = "blockbench",
    version,
    about = "Compare concurrent and sequential block retrieval through an IPFS node"
)]
struct Cli {
    /// Results directory (overrides [results] dir)
    #[arg(long, global = true)]
    results: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run trials for every (peer, strategy) pair and record them
    Run {
        /// Trials per pair (overrides [sweep] trials)
        #[arg(short = 'n', long)]
        trials: Option<usize>,

        /// Seed for batch sampling (overrides [sweep] seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Only benchmark this peer nickname (repeatable)
        #[arg(short, long = "peer")]
        peers: Vec<String>,

        /// Only run this strategy (repeatable)
        #[arg(short, long = "strategy")]
        strategies: Vec<CliStrategy>,

        /// Skip chart rendering after the sweep
        #[arg(long)]
        no_report: bool,
    },

    /// Render charts and print a summary of the recorded ledgers
    Report {
        /// Print the summary table only
        #[arg(long)]
        no_charts: bool,
    },

    /// Run garbage collection on the node
    Gc,

    /// Connect the node to a configured peer
    Connect {
        /// Peer nickname
        nickname: String,
    },

    /// Disconnect the node from a configured peer
    Disconnect {
        /// Peer nickname
        nickname: String,
    },

    /// List peers currently in the node's swarm
    Peers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the node's gateway address
    SetGateway {
        /// Multiaddr (default: [node] gateway_address)
        address: Option<String>,
    },

    /// Show active configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliStrategy {
    Concurrent,
    Sequential,
}

impl From<CliStrategy> for StrategyKind {
    fn from(val: CliStrategy) -> Self {
        match val {
            CliStrategy::Concurrent => StrategyKind::Concurrent,
            CliStrategy::Sequential => StrategyKind::Sequential,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config()?;
    if let Some(dir) = cli.results {
        cfg.results.dir = dir;
    }

    match cli.command {
        Commands::Run {
            trials,
            seed,
            peers,
            strategies,
            no_report,
        } => cmd_run(&cfg, trials, seed, &peers, &strategies, no_report),
        Commands::Report { no_charts } => cmd_report(&cfg, no_charts),
        Commands::Gc => cmd_gc(&cfg),
        Commands::Connect { nickname } => cmd_connect(&cfg, &nickname),
        Commands::Disconnect { nickname } => cmd_disconnect(&cfg, &nickname),
        Commands::Peers { json } => cmd_peers(&cfg, json),
        Commands::SetGateway { address } => cmd_set_gateway(&cfg, address.as_deref()),
        Commands::Config => cmd_config(&cfg),
    }
}

fn transport(cfg: &Config) -> UreqTransport {
    UreqTransport::new(Duration::from_secs(cfg.node.timeout_secs))
}

fn find_peer(cfg: &Config, nickname: &str) -> Result<PeerDescriptor> {
    cfg.peer_descriptors()?
        .into_iter()
        .find(|p| p.nickname() == nickname)
        .with_context(|| format!("no configured peer named {nickname:?}"))
}

/// Configured peers, narrowed to `only` when it is non-empty.
fn select_peers(all: &[PeerDescriptor], only: &[String]) -> Result<Vec<PeerDescriptor>> {
    if only.is_empty() {
        return Ok(all.to_vec());
    }
    let mut selected = Vec::with_capacity(only.len());
    for nickname in only {
        let Some(peer) = all.iter().find(|p| p.nickname() == nickname.as_str()) else {
            bail!("no configured peer named {nickname:?}");
        };
        if !selected.contains(peer) {
            selected.push(peer.clone());
        }
    }
    Ok(selected)
}

fn select_strategies(cfg: &Config, only: &[CliStrategy]) -> Vec<StrategyKind> {
    let mut selected: Vec<StrategyKind> = if only.is_empty() {
        cfg.sweep.strategies.clone()
    } else {
        only.iter().map(|s| StrategyKind::from(*s)).collect()
    };
    let mut seen = Vec::with_capacity(selected.len());
    selected.retain(|s| {
        let fresh = !seen.contains(s);
        seen.push(*s);
        fresh
    });
    selected
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_run(
    cfg: &Config,
    trials: Option<usize>,
    seed: Option<u64>,
    peer_filter: &[String],
    strategy_filter: &[CliStrategy],
    no_report: bool,
) -> Result<()> {
    let all_peers = cfg.peer_descriptors()?;
    let peers = select_peers(&all_peers, peer_filter)?;
    let strategies = select_strategies(cfg, strategy_filter);
    if peers.is_empty() || strategies.is_empty() {
        bail!("nothing to run: no peers or no strategies selected");
    }
    let universe = cfg.universe()?;

    let transport = transport(cfg);
    if cfg.node.set_gateway {
        NodeClient::new(&transport, cfg.node.api.as_str())
            .set_gateway_address(&cfg.node.gateway_address)?;
    }

    let settings = TrialSettings {
        trials: trials.unwrap_or(cfg.sweep.trials),
        checkpoint_every: cfg.sweep.checkpoint_every,
        endpoint: cfg.fetch_endpoint().to_string(),
        throughput: cfg.throughput_mode(),
        verify_blocks: cfg.fetch.verify_blocks,
    };
    let store = JsonLedgerStore::new(&cfg.results.dir);
    let orchestrator = TrialOrchestrator::new(
        &transport,
        &cfg.node.api,
        &store,
        &universe,
        &all_peers,
        &settings,
    );

    let mut rng = match seed.or(cfg.sweep.seed) {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let pairs = sweep_pairs(&peers, &strategies);
    println!(
        "Running {} trial(s) for {} pair(s) over {} addresses",
        settings.trials,
        pairs.len(),
        universe.len()
    );
    let t0 = Instant::now();
    let sweep = orchestrator.run_sweep(&pairs, &mut rng);
    let elapsed = t0.elapsed();

    println!();
    println!(
        "{:<28} {:>9} {:>9} {:>6} {:>8}",
        "Pair", "Attempted", "Recorded", "Lost", "Ledger"
    );
    println!("{}", "-".repeat(64));
    for segment in &sweep.segments {
        println!(
            "{:<28} {:>9} {:>9} {:>6} {:>8}",
            segment.pair.to_string(),
            segment.attempted,
            segment.recorded,
            segment.lost.len(),
            segment.ledger_trials
        );
    }
    for (pair, err) in &sweep.aborted {
        println!("{:<28} aborted: {err}", pair.to_string());
    }
    println!();
    println!(
        "Total time: {}",
        report::format_duration(elapsed.as_secs_f64() * 1000.0)
    );

    // charts still reflect whatever was persisted before a failure
    if !no_report {
        match Reporter::default().render_all(&store, &all_peers, &strategies) {
            Ok(files) => {
                for f in files {
                    println!("Wrote {}", f.display());
                }
            }
            Err(e) => eprintln!("Chart rendering failed: {e:#}"),
        }
    }

    if !sweep.is_complete() {
        bail!("{} of {} pair(s) aborted", sweep.aborted.len(), pairs.len());
    }
    Ok(())
}

fn cmd_report(cfg: &Config, no_charts: bool) -> Result<()> {
    let peers = cfg.peer_descriptors()?;
    let strategies = select_strategies(cfg, &[]);
    let store = JsonLedgerStore::new(&cfg.results.dir);

    let ledgers = report::load_all(&store, &peers, &strategies)?;
    report::print_summary_header();
    for (pair, ledger) in &ledgers {
        report::print_summary_rows(pair, ledger);
    }

    if !no_charts {
        println!();
        for f in Reporter::default().render_all(&store, &peers, &strategies)? {
            println!("Wrote {}", f.display());
        }
    }
    Ok(())
}

fn cmd_gc(cfg: &Config) -> Result<()> {
    let transport = transport(cfg);
    NodeClient::new(&transport, cfg.node.api.as_str()).collect_garbage()?;
    println!("Garbage collected.");
    Ok(())
}

fn cmd_connect(cfg: &Config, nickname: &str) -> Result<()> {
    let peer = find_peer(cfg, nickname)?;
    let transport = transport(cfg);
    match NodeClient::new(&transport, cfg.node.api.as_str()).ensure_connected(&peer)? {
        ConnectOutcome::AlreadyConnected => println!("Already connected: {peer}"),
        ConnectOutcome::Connected => println!("Connected: {peer}"),
    }
    Ok(())
}

fn cmd_disconnect(cfg: &Config, nickname: &str) -> Result<()> {
    let peer = find_peer(cfg, nickname)?;
    let transport = transport(cfg);
    match NodeClient::new(&transport, cfg.node.api.as_str()).disconnect(&peer)? {
        DisconnectOutcome::NotConnected => println!("Not connected: {peer}"),
        DisconnectOutcome::Disconnected => println!("Disconnected: {peer}"),
    }
    Ok(())
}

fn cmd_peers(cfg: &Config, json: bool) -> Result<()> {
    let transport = transport(cfg);
    let connected = NodeClient::new(&transport, cfg.node.api.as_str()).connected_peers()?;
    let known = cfg.peer_descriptors()?;

    if json {
        let entries: Vec<serde_json::Value> = connected
            .iter()
            .map(|id| {
                let nickname = known
                    .iter()
                    .find(|p| p.peer_id() == id)
                    .map(|p| p.nickname());
                serde_json::json!({ "peer": id, "nickname": nickname })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if connected.is_empty() {
        println!("No peers connected.");
        return Ok(());
    }
    for id in &connected {
        match known.iter().find(|p| p.peer_id() == id) {
            Some(peer) => println!("{id}  ({})", peer.nickname()),
            None => println!("{id}"),
        }
    }
    println!("\n{} peer(s)", connected.len());
    Ok(())
}

fn cmd_set_gateway(cfg: &Config, address: Option<&str>) -> Result<()> {
    let address = address.unwrap_or(&cfg.node.gateway_address);
    let transport = transport(cfg);
    NodeClient::new(&transport, cfg.node.api.as_str()).set_gateway_address(address)?;
    println!("Gateway address set to {address}");
    Ok(())
}

fn cmd_config(cfg: &Config) -> Result<()> {
    println!("Config: {}", config::show_config_path());
    println!();
    println!("[node]");
    println!("  api = {}", cfg.node.api);
    println!("  gateway_address = {}", cfg.node.gateway_address);
    println!("  set_gateway = {}", cfg.node.set_gateway);
    println!("  timeout_secs = {}", cfg.node.timeout_secs);
    println!();
    println!("[fetch]");
    println!("  endpoint = {}", cfg.fetch_endpoint());
    println!("  verify_blocks = {}", cfg.fetch.verify_blocks);
    println!();
    println!("[sweep]");
    println!("  trials = {}", cfg.sweep.trials);
    println!(
        "  checkpoint_every = {}",
        cfg.sweep
            .checkpoint_every
            .map_or_else(|| "(segment end only)".into(), |n| n.to_string())
    );
    println!(
        "  seed = {}",
        cfg.sweep
            .seed
            .map_or_else(|| "(entropy)".into(), |s| s.to_string())
    );
    let strategies: Vec<_> = cfg.sweep.strategies.iter().map(|s| s.tag()).collect();
    println!("  strategies = {}", strategies.join(", "));
    println!(
        "  legacy_truncated_throughput = {}",
        cfg.sweep.legacy_truncated_throughput
    );
    println!();
    println!("[results]");
    println!("  dir = {}", cfg.results.dir.display());
    println!();
    println!("[[peers]]");
    for peer in &cfg.peers {
        println!("  {} = {}", peer.nickname, peer.multiaddr);
    }
    println!();
    println!("[universe]");
    println!("  {} address(es)", cfg.universe.addresses.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(nick: &str) -> PeerDescriptor {
        PeerDescriptor::new(nick, format!("/ip4/10.0.0.1/tcp/4001/p2p/12D3KooW{nick}")).unwrap()
    }

    #[test]
    fn test_select_peers() {
        let all = vec![peer("new"), peer("old")];
        assert_eq!(select_peers(&all, &[]).unwrap(), all);

        let only = select_peers(&all, &["old".into(), "old".into()]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].nickname(), "old");

        assert!(select_peers(&all, &["missing".into()]).is_err());
    }

    #[test]
    fn test_select_strategies() {
        let cfg = Config::default();
        assert_eq!(select_strategies(&cfg, &[]), StrategyKind::ALL.to_vec());
        assert_eq!(
            select_strategies(&cfg, &[CliStrategy::Sequential, CliStrategy::Sequential]),
            vec![StrategyKind::Sequential]
        );
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "blockbench",
            "--results",
            "/tmp/r",
            "run",
            "-n",
            "5",
            "--peer",
            "old",
            "--strategy",
            "sequential",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(cli.results, Some(PathBuf::from("/tmp/r")));
        match cli.command {
            Commands::Run {
                trials,
                seed,
                peers,
                strategies,
                no_report,
            } => {
                assert_eq!(trials, Some(5));
                assert_eq!(seed, Some(7));
                assert_eq!(peers, vec!["old"]);
                assert_eq!(strategies.len(), 1);
                assert!(!no_report);
            }
            _ => panic!("expected run"),
        }
    }
}
