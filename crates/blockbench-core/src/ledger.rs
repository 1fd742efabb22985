use std::collections::BTreeMap;

use crate::error::{BenchError, BenchResult};
use crate::peer::BenchPair;
use crate::sample::TrialSample;

/// Historical measurements for one (peer, strategy) pair, keyed by batch size.
///
/// `times` holds elapsed seconds and `speeds` KB/s. Every append touches both
/// maps, so each key always has equally long sequences in the two.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    times: BTreeMap<usize, Vec<f64>>,
    speeds: BTreeMap<usize, Vec<f64>>,
}

/// Samples recorded for one batch size, with their means.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSeries<'a> {
    pub batch_size: usize,
    pub times: &'a [f64],
    pub speeds: &'a [f64],
    pub mean_time: f64,
    pub mean_speed: f64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, batch_size: usize, sample: &TrialSample) {
        self.append_values(batch_size, sample.elapsed_secs(), sample.throughput_kbps());
    }

    fn append_values(&mut self, batch_size: usize, time: f64, speed: f64) {
        self.times.entry(batch_size).or_default().push(time);
        self.speeds.entry(batch_size).or_default().push(speed);
    }

    pub fn times(&self) -> &BTreeMap<usize, Vec<f64>> {
        &self.times
    }

    pub fn speeds(&self) -> &BTreeMap<usize, Vec<f64>> {
        &self.speeds
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn trial_count(&self) -> usize {
        self.times.values().map(Vec::len).sum()
    }

    pub fn samples_for(&self, batch_size: usize) -> usize {
        self.times.get(&batch_size).map_or(0, Vec::len)
    }

    /// Per-batch-size view in ascending batch-size order.
    pub fn series(&self) -> Vec<LedgerSeries<'_>> {
        self.times
            .iter()
            .filter_map(|(size, times)| {
                let speeds = self.speeds.get(size)?;
                Some(LedgerSeries {
                    batch_size: *size,
                    times,
                    speeds,
                    mean_time: mean(times),
                    mean_speed: mean(speeds),
                })
            })
            .collect()
    }

    /// Rebuilds a ledger from the two persisted documents, rejecting anything
    /// that could not have been produced by `append`.
    pub fn from_documents(
        times: BTreeMap<String, Vec<f64>>,
        speeds: BTreeMap<String, Vec<f64>>,
        location: &str,
    ) -> BenchResult<Self> {
        let corrupt = |reason: String| BenchError::CorruptLedger {
            path: location.to_string(),
            reason,
        };

        if times.len() != speeds.len() || times.keys().any(|k| !speeds.contains_key(k)) {
            return Err(corrupt("times and speeds have different batch sizes".into()));
        }

        let mut ledger = Ledger::new();
        for (key, time_values) in times {
            let size = parse_batch_key(&key).ok_or_else(|| corrupt(format!("bad key {key:?}")))?;
            let speed_values = speeds.get(&key).cloned().unwrap_or_default();
            if time_values.len() != speed_values.len() {
                return Err(corrupt(format!(
                    "batch size {key}: {} times but {} speeds",
                    time_values.len(),
                    speed_values.len()
                )));
            }
            if time_values.is_empty() {
                return Err(corrupt(format!("batch size {key} has no samples")));
            }
            if time_values.iter().any(|t| !t.is_finite() || *t <= 0.0) {
                return Err(corrupt(format!("batch size {key}: non-positive time")));
            }
            if speed_values.iter().any(|s| !s.is_finite() || *s < 0.0) {
                return Err(corrupt(format!("batch size {key}: negative speed")));
            }
            ledger.times.insert(size, time_values);
            ledger.speeds.insert(size, speed_values);
        }
        Ok(ledger)
    }
}

/// Accepts only the canonical decimal form of a positive batch size, so two
/// spellings of one size can never both appear in a ledger.
fn parse_batch_key(key: &str) -> Option<usize> {
    let size: usize = key.parse().ok()?;
    (size > 0 && size.to_string() == key).then_some(size)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Persistence for per-pair ledgers.
pub trait LedgerStore {
    /// Loads the pair's ledger; an absent ledger is empty.
    fn load(&self, pair: &BenchPair) -> BenchResult<Ledger>;

    /// Replaces the persisted ledger with `ledger`, which already carries the
    /// history returned by `load` plus this run's samples. Readers never see
    /// a half-written file.
    fn merge_and_save(&self, pair: &BenchPair, ledger: &Ledger) -> BenchResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::ThroughputMode;
    use std::time::Duration;

    fn sample(ms: u64, bytes: usize) -> TrialSample {
        TrialSample::from_blocks(&[bytes], Duration::from_millis(ms), ThroughputMode::Exact)
    }

    fn docs(pairs: &[(&str, Vec<f64>)]) -> BTreeMap<String, Vec<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_append_keeps_series_aligned() {
        let mut ledger = Ledger::new();
        ledger.append(3, &sample(100, 3000));
        ledger.append(3, &sample(200, 3000));
        ledger.append(1, &sample(50, 1000));

        assert_eq!(ledger.trial_count(), 3);
        assert_eq!(ledger.samples_for(3), 2);
        for (size, times) in ledger.times() {
            assert_eq!(times.len(), ledger.speeds()[size].len());
        }
    }

    #[test]
    fn test_series_means_in_batch_order() {
        let mut ledger = Ledger::new();
        ledger.append(10, &sample(100, 1000));
        ledger.append(2, &sample(100, 1000));
        ledger.append(2, &sample(300, 1000));

        let series = ledger.series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].batch_size, 2);
        assert!((series[0].mean_time - 0.2).abs() < 1e-9);
        assert_eq!(series[1].batch_size, 10);
    }

    #[test]
    fn test_from_documents_roundtrip() {
        let ledger = Ledger::from_documents(
            docs(&[("1", vec![0.5]), ("12", vec![1.0, 2.0])]),
            docs(&[("1", vec![10.0]), ("12", vec![20.0, 30.0])]),
            "mem",
        )
        .unwrap();
        assert_eq!(ledger.samples_for(12), 2);
        assert_eq!(ledger.speeds()[&1], vec![10.0]);
    }

    #[test]
    fn test_from_documents_rejects_misaligned_keys() {
        let err = Ledger::from_documents(
            docs(&[("1", vec![0.5])]),
            docs(&[("2", vec![10.0])]),
            "mem",
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::CorruptLedger { .. }));
    }

    #[test]
    fn test_from_documents_rejects_misaligned_lengths() {
        let err = Ledger::from_documents(
            docs(&[("1", vec![0.5, 0.6])]),
            docs(&[("1", vec![10.0])]),
            "mem",
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::CorruptLedger { .. }));
    }

    #[test]
    fn test_from_documents_rejects_noncanonical_keys() {
        for key in ["0", "05", "-1", "x", " 3"] {
            let result = Ledger::from_documents(
                docs(&[(key, vec![0.5])]),
                docs(&[(key, vec![1.0])]),
                "mem",
            );
            assert!(result.is_err(), "key {key:?} should be rejected");
        }
    }

    #[test]
    fn test_from_documents_rejects_bad_values() {
        assert!(Ledger::from_documents(
            docs(&[("1", vec![0.0])]),
            docs(&[("1", vec![1.0])]),
            "mem"
        )
        .is_err());
        assert!(Ledger::from_documents(
            docs(&[("1", vec![0.5])]),
            docs(&[("1", vec![-1.0])]),
            "mem"
        )
        .is_err());
    }
}
