use std::time::Duration;

/// Shortest elapsed time a sample can carry; a trial always costs wall time.
const MIN_ELAPSED: Duration = Duration::from_nanos(1);

/// How retrieved bytes turn into a KB/s figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThroughputMode {
    /// bytes / seconds / 1e3
    #[default]
    Exact,
    /// Each block length integer-divided by 100 before summing, then
    /// / seconds / 1e3. Matches ledgers recorded by earlier versions of the
    /// harness.
    LegacyTruncated,
}

/// Outcome of one recorded trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialSample {
    elapsed: Duration,
    throughput_kbps: f64,
}

impl TrialSample {
    /// Builds a sample from the per-block byte counts of a batch.
    pub fn from_blocks(block_lens: &[usize], elapsed: Duration, mode: ThroughputMode) -> Self {
        let elapsed = elapsed.max(MIN_ELAPSED);
        let counted: u64 = match mode {
            ThroughputMode::Exact => block_lens.iter().map(|&len| len as u64).sum(),
            ThroughputMode::LegacyTruncated => {
                block_lens.iter().map(|&len| (len / 100) as u64).sum()
            }
        };
        Self {
            elapsed,
            throughput_kbps: counted as f64 / elapsed.as_secs_f64() / 1e3,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn throughput_kbps(&self) -> f64 {
        self.throughput_kbps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_throughput() {
        let sample = TrialSample::from_blocks(
            &[1000; 5],
            Duration::from_millis(50),
            ThroughputMode::Exact,
        );
        assert!((sample.elapsed_secs() - 0.05).abs() < 1e-12);
        // 5000 bytes in 50ms = 100 KB/s
        assert!((sample.throughput_kbps() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_legacy_truncation() {
        let sample = TrialSample::from_blocks(
            &[199, 250],
            Duration::from_secs(1),
            ThroughputMode::LegacyTruncated,
        );
        // 199/100 + 250/100 = 1 + 2
        assert!((sample.throughput_kbps() - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_empty_trial_still_takes_time() {
        let sample = TrialSample::from_blocks(&[], Duration::ZERO, ThroughputMode::Exact);
        assert!(sample.elapsed() > Duration::ZERO);
        assert_eq!(sample.throughput_kbps(), 0.0);
    }
}
