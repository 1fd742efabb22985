//! Trial orchestration: the per-(peer, strategy) measurement loop and the
//! sweep over every pair.

use std::cell::Cell;

use rand::Rng;
use tracing::{debug, error, info, warn};

use blockbench_core::{
    BenchError, BenchPair, BenchResult, ContentAddress, FetchBatch, FetchStrategy, Ledger,
    LedgerStore, NodeClient, PeerDescriptor, StrategyKind, ThroughputMode, Transport,
    TrialSample,
};

#[derive(Debug, Clone)]
pub struct TrialSettings {
    /// Trials per segment.
    pub trials: usize,
    /// Persist after every N recorded trials as well as at segment end.
    pub checkpoint_every: Option<usize>,
    /// Retrieval API base URL.
    pub endpoint: String,
    pub throughput: ThroughputMode,
    pub verify_blocks: bool,
}

/// Where the orchestrator is in the trial loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Collecting,
    Sampling,
    Fetching,
    Recording,
    Persisting,
}

/// Outcome of one segment (all trials of one pair).
#[derive(Debug)]
pub struct SegmentReport {
    pub pair: BenchPair,
    pub attempted: usize,
    pub recorded: usize,
    /// Trials whose fetch failed; nothing was recorded for them.
    pub lost: Vec<BenchError>,
    /// Trials in the persisted ledger after the segment.
    pub ledger_trials: usize,
}

/// Outcome of a sweep: finished segments, and the segments a fatal error
/// aborted.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub segments: Vec<SegmentReport>,
    pub aborted: Vec<(BenchPair, BenchError)>,
}

impl SweepReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_empty()
    }
}

/// Every (peer, strategy) pair, peers outermost.
pub fn sweep_pairs(peers: &[PeerDescriptor], strategies: &[StrategyKind]) -> Vec<BenchPair> {
    peers
        .iter()
        .flat_map(|peer| {
            strategies
                .iter()
                .map(move |strategy| BenchPair::new(peer.clone(), *strategy))
        })
        .collect()
}

/// Drives trials against one node. Owns the in-memory ledger of the pair it
/// is processing; segments run strictly one after another.
pub struct TrialOrchestrator<'a, S: LedgerStore> {
    transport: &'a dyn Transport,
    node: NodeClient<'a>,
    store: &'a S,
    universe: &'a [ContentAddress],
    /// Every peer of the sweep; all but the target are disconnected per trial.
    peers: &'a [PeerDescriptor],
    settings: &'a TrialSettings,
    phase: Cell<Phase>,
}

impl<'a, S: LedgerStore> TrialOrchestrator<'a, S> {
    pub fn new(
        transport: &'a dyn Transport,
        node_api: &str,
        store: &'a S,
        universe: &'a [ContentAddress],
        peers: &'a [PeerDescriptor],
        settings: &'a TrialSettings,
    ) -> Self {
        Self {
            transport,
            node: NodeClient::new(transport, node_api),
            store,
            universe,
            peers,
            settings,
            phase: Cell::new(Phase::Idle),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    fn enter(&self, phase: Phase) {
        debug!("trial phase: {:?} -> {:?}", self.phase.get(), phase);
        self.phase.set(phase);
    }

    /// Runs every pair in order. A fatal error aborts its own segment only;
    /// the ledger of that pair is persisted before moving on.
    pub fn run_sweep<R: Rng + ?Sized>(&self, pairs: &[BenchPair], rng: &mut R) -> SweepReport {
        let mut report = SweepReport::default();
        for pair in pairs {
            match self.run_segment(pair, rng) {
                Ok(segment) => report.segments.push(segment),
                Err(e) => {
                    error!("{pair}: segment aborted: {e}");
                    report.aborted.push((pair.clone(), e));
                }
            }
        }
        report
    }

    /// Loads the pair's ledger, runs the configured number of trials and
    /// persists the grown ledger.
    pub fn run_segment<R: Rng + ?Sized>(
        &self,
        pair: &BenchPair,
        rng: &mut R,
    ) -> BenchResult<SegmentReport> {
        let mut ledger = self.store.load(pair)?;
        info!(
            "{pair}: {} trials on record, running {}",
            ledger.trial_count(),
            self.settings.trials
        );

        let strategy = pair.strategy.build(self.settings.verify_blocks);
        let mut report = SegmentReport {
            pair: pair.clone(),
            attempted: 0,
            recorded: 0,
            lost: Vec::new(),
            ledger_trials: 0,
        };

        for trial in 1..=self.settings.trials {
            report.attempted += 1;
            match self.run_trial(pair, strategy.as_ref(), &mut ledger, rng) {
                Ok(batch_size) => {
                    report.recorded += 1;
                    debug!("{pair}: trial {trial} recorded under batch size {batch_size}");
                    if let Some(every) = self.settings.checkpoint_every {
                        if every > 0 && report.recorded % every == 0 {
                            self.persist(pair, &ledger)?;
                        }
                    }
                }
                Err(e) if !e.is_fatal() => {
                    warn!("{pair}: trial {trial} lost: {e}");
                    report.lost.push(e);
                }
                Err(e) => {
                    if let Err(save_err) = self.persist(pair, &ledger) {
                        error!("{pair}: could not persist ledger after failure: {save_err}");
                    }
                    return Err(e);
                }
            }
        }

        self.persist(pair, &ledger)?;
        report.ledger_trials = ledger.trial_count();
        Ok(report)
    }

    /// One trial; returns the batch size it was recorded under. The ledger is
    /// only touched once the fetch has fully succeeded.
    fn run_trial<R: Rng + ?Sized>(
        &self,
        pair: &BenchPair,
        strategy: &dyn FetchStrategy,
        ledger: &mut Ledger,
        rng: &mut R,
    ) -> BenchResult<usize> {
        self.enter(Phase::Collecting);
        self.node.collect_garbage()?;

        self.enter(Phase::Connecting);
        for other in self.peers.iter().filter(|p| *p != &pair.peer) {
            self.node.disconnect(other)?;
        }
        self.node.ensure_connected(&pair.peer)?;

        self.enter(Phase::Sampling);
        let batch = FetchBatch::draw(self.universe, rng)
            .ok_or_else(|| BenchError::Config("address universe is empty".into()))?;
        debug!("{pair}: sampled {} of {} addresses", batch.len(), self.universe.len());

        self.enter(Phase::Fetching);
        let outcome = strategy.fetch(self.transport, &batch, &self.settings.endpoint);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.enter(Phase::Idle);
                return Err(e);
            }
        };

        self.enter(Phase::Recording);
        let sample = TrialSample::from_blocks(
            &outcome.block_lens(),
            outcome.elapsed,
            self.settings.throughput,
        );
        info!(
            "{pair}: {} keys, {} bytes in {:.3}s ({:.1} KB/s)",
            batch.len(),
            outcome.total_bytes(),
            sample.elapsed_secs(),
            sample.throughput_kbps()
        );
        ledger.append(batch.len(), &sample);

        self.enter(Phase::Idle);
        Ok(batch.len())
    }

    fn persist(&self, pair: &BenchPair, ledger: &Ledger) -> BenchResult<()> {
        self.enter(Phase::Persisting);
        self.store.merge_and_save(pair, ledger)?;
        info!("{pair}: ledger saved ({} trials)", ledger.trial_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockbench_core::mock::MockTransport;
    use blockbench_core::{Codec, Multihash};
    use blockbench_store::JsonLedgerStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;

    const API: &str = "http://127.0.0.1:5001/api/v0";

    fn universe(n: usize) -> Vec<ContentAddress> {
        (0..n)
            .map(|i| ContentAddress::new(Codec::DagPb, Multihash::sha2_256(&[i as u8])))
            .collect()
    }

    fn peers() -> Vec<PeerDescriptor> {
        vec![
            PeerDescriptor::new("new", "/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWNew").unwrap(),
            PeerDescriptor::new("old", "/ip4/10.0.0.2/tcp/4001/p2p/12D3KooWOld").unwrap(),
        ]
    }

    fn settings(trials: usize) -> TrialSettings {
        TrialSettings {
            trials,
            checkpoint_every: None,
            endpoint: API.into(),
            throughput: ThroughputMode::Exact,
            verify_blocks: false,
        }
    }

    /// In-memory store that counts saves.
    #[derive(Default)]
    struct CountingStore {
        ledgers: RefCell<HashMap<String, Ledger>>,
        saves: Cell<usize>,
    }

    impl CountingStore {
        fn key(pair: &BenchPair) -> String {
            format!("{}/{}", pair.peer.nickname(), pair.strategy)
        }

        fn get(&self, pair: &BenchPair) -> Ledger {
            self.ledgers
                .borrow()
                .get(&Self::key(pair))
                .cloned()
                .unwrap_or_default()
        }
    }

    impl LedgerStore for CountingStore {
        fn load(&self, pair: &BenchPair) -> BenchResult<Ledger> {
            Ok(self.get(pair))
        }

        fn merge_and_save(&self, pair: &BenchPair, ledger: &Ledger) -> BenchResult<()> {
            self.saves.set(self.saves.get() + 1);
            self.ledgers
                .borrow_mut()
                .insert(Self::key(pair), ledger.clone());
            Ok(())
        }
    }

    #[test]
    fn test_sweep_pairs_order() {
        let pairs = sweep_pairs(&peers(), &StrategyKind::ALL);
        let labels: Vec<_> = pairs.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "new peer concurrent",
                "new peer sequential",
                "old peer concurrent",
                "old peer sequential"
            ]
        );
    }

    #[test]
    fn test_single_trial_records_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLedgerStore::new(dir.path());
        let transport = MockTransport::new().with_block_size(1000);
        let universe = universe(12);
        let peers = peers();
        let settings = settings(1);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);
        let pair = BenchPair::new(peers[0].clone(), StrategyKind::Sequential);

        let report = orch
            .run_segment(&pair, &mut StdRng::seed_from_u64(1))
            .unwrap();

        assert_eq!(report.recorded, 1);
        assert!(report.lost.is_empty());
        assert_eq!(orch.phase(), Phase::Persisting);
        assert_eq!(transport.count("/repo/gc"), 1);
        assert_eq!(transport.count("/swarm/connect"), 1);
        assert!(transport.is_connected("12D3KooWNew"));

        let saved = store.load(&pair).unwrap();
        assert_eq!(saved.trial_count(), 1);
        let (size, times) = saved.times().iter().next().unwrap();
        assert_eq!(transport.fetch_count(), *size);
        assert_eq!(times.len(), saved.speeds()[size].len());
    }

    #[test]
    fn test_recorded_throughput_matches_bytes() {
        let store = CountingStore::default();
        let transport = MockTransport::new()
            .with_latency(Duration::from_millis(10))
            .with_block_size(1000);
        let universe = universe(12);
        let peers = peers();
        let settings = settings(3);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);

        for strategy in StrategyKind::ALL {
            let pair = BenchPair::new(peers[1].clone(), strategy);
            orch.run_segment(&pair, &mut StdRng::seed_from_u64(5))
                .unwrap();

            for series in store.get(&pair).series() {
                for (time, speed) in series.times.iter().zip(series.speeds) {
                    assert!(*time >= 0.010);
                    // speed (KB/s) * time (s) * 1000 = bytes retrieved
                    let bytes = speed * time * 1e3;
                    assert!((bytes - (series.batch_size * 1000) as f64).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_lost_trial_leaves_ledger_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLedgerStore::new(dir.path());
        let universe = universe(3);
        let peers = peers();
        let pair = BenchPair::new(peers[0].clone(), StrategyKind::Concurrent);

        let mut history = Ledger::new();
        history.append(
            2,
            &TrialSample::from_blocks(&[10, 10], Duration::from_millis(30), ThroughputMode::Exact),
        );
        store.merge_and_save(&pair, &history).unwrap();

        let mut transport = MockTransport::new();
        for addr in &universe {
            transport = transport.fail_address(addr, 500);
        }
        let settings = settings(2);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);

        let report = orch
            .run_segment(&pair, &mut StdRng::seed_from_u64(9))
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.recorded, 0);
        assert_eq!(report.lost.len(), 2);
        assert!(report
            .lost
            .iter()
            .all(|e| matches!(e, BenchError::Fetch { status: Some(500), .. })));
        assert_eq!(store.load(&pair).unwrap(), history);
    }

    #[test]
    fn test_maintenance_failure_aborts_segment() {
        let store = CountingStore::default();
        let transport = MockTransport::new().fail_method("repo/gc", 500);
        let universe = universe(4);
        let peers = peers();
        let settings = settings(3);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);
        let pair = BenchPair::new(peers[0].clone(), StrategyKind::Sequential);

        let err = orch
            .run_segment(&pair, &mut StdRng::seed_from_u64(1))
            .unwrap_err();

        assert!(matches!(err, BenchError::Maintenance { .. }));
        assert_eq!(orch.phase(), Phase::Persisting);
        assert_eq!(store.saves.get(), 1);
        assert_eq!(transport.count("/repo/gc"), 1);
        assert_eq!(transport.fetch_count(), 0);
    }

    #[test]
    fn test_connect_failure_is_fatal() {
        let store = CountingStore::default();
        let transport = MockTransport::new().fail_method("swarm/connect", 502);
        let universe = universe(4);
        let peers = peers();
        let settings = settings(2);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);
        let pair = BenchPair::new(peers[1].clone(), StrategyKind::Concurrent);

        let err = orch
            .run_segment(&pair, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        match err {
            BenchError::Connectivity { peer, status, .. } => {
                assert_eq!(peer, peers[1].multiaddr());
                assert_eq!(status, Some(502));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.fetch_count(), 0);
    }

    #[test]
    fn test_other_peers_are_disconnected() {
        let store = CountingStore::default();
        let transport = MockTransport::new().with_connected("12D3KooWOld");
        let universe = universe(4);
        let peers = peers();
        let settings = settings(1);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);
        let pair = BenchPair::new(peers[0].clone(), StrategyKind::Concurrent);

        orch.run_segment(&pair, &mut StdRng::seed_from_u64(1))
            .unwrap();

        assert!(!transport.is_connected("12D3KooWOld"));
        assert!(transport.is_connected("12D3KooWNew"));
        assert_eq!(transport.count("/swarm/disconnect"), 1);
    }

    #[test]
    fn test_checkpoints() {
        let store = CountingStore::default();
        let transport = MockTransport::new();
        let universe = universe(5);
        let peers = peers();
        let mut settings = settings(4);
        settings.checkpoint_every = Some(2);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);
        let pair = BenchPair::new(peers[0].clone(), StrategyKind::Sequential);

        let report = orch
            .run_segment(&pair, &mut StdRng::seed_from_u64(3))
            .unwrap();

        assert_eq!(report.recorded, 4);
        assert_eq!(report.ledger_trials, 4);
        // after trials 2 and 4, then at segment end
        assert_eq!(store.saves.get(), 3);
    }

    #[test]
    fn test_sweep_runs_every_pair_and_continues_past_failure() {
        let store = CountingStore::default();
        let transport = MockTransport::new();
        let universe = universe(6);
        let peers = vec![
            peers()[0].clone(),
            PeerDescriptor::new("bad", "/ip4/10.0.0.3/tcp/4001/p2p/12D3KooWBad").unwrap(),
        ];
        let settings = settings(2);
        let orch = TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);

        // every trial of the first pair succeeds; the second peer refuses
        // after its connect is attempted
        let pairs = sweep_pairs(&peers[..1], &StrategyKind::ALL);
        let report = orch.run_sweep(&pairs, &mut StdRng::seed_from_u64(11));
        assert!(report.is_complete());
        assert_eq!(report.segments.len(), 2);
        for segment in &report.segments {
            assert_eq!(store.get(&segment.pair).trial_count(), 2);
        }

        transport.set_method_failure("swarm/connect", Some(500));
        let pairs = sweep_pairs(&peers, &[StrategyKind::Sequential]);
        let report = orch.run_sweep(&pairs, &mut StdRng::seed_from_u64(11));
        // "new" is still connected from before, so only "bad" fails
        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.aborted.len(), 1);
        assert_eq!(report.aborted[0].0.peer.nickname(), "bad");
    }

    #[test]
    fn test_fixed_seed_reproduces_batch_sizes() {
        let universe = universe(12);
        let peers = peers();
        let settings = settings(6);
        let pair = BenchPair::new(peers[0].clone(), StrategyKind::Sequential);

        let run = || {
            let store = CountingStore::default();
            let transport = MockTransport::new();
            let orch =
                TrialOrchestrator::new(&transport, API, &store, &universe, &peers, &settings);
            orch.run_segment(&pair, &mut StdRng::seed_from_u64(77))
                .unwrap();
            store
                .get(&pair)
                .series()
                .iter()
                .map(|s| (s.batch_size, s.times.len()))
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }
}
