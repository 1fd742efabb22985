//! Charts and summary tables built from persisted ledgers.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use blockbench_core::{BenchPair, Ledger, LedgerStore, PeerDescriptor, StrategyKind};
use blockbench_store::JsonLedgerStore;

const PAIR_PLOT: &str = "plot.png";
const COMBINED_PLOT: &str = "final.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Time,
    Speed,
}

impl Metric {
    fn caption(&self) -> &'static str {
        match self {
            Metric::Time => "time",
            Metric::Speed => "speed",
        }
    }

    fn axis(&self) -> &'static str {
        match self {
            Metric::Time => "Time (s)",
            Metric::Speed => "Speed (KB/s)",
        }
    }
}

/// Everything one panel draws: raw samples, per-batch-size means and the
/// axis ranges that fit them.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelData {
    pub points: Vec<(f64, f64)>,
    pub means: Vec<(f64, f64)>,
    pub x_max: f64,
    pub y_max: f64,
}

impl PanelData {
    pub fn from_ledger(ledger: &Ledger, metric: Metric) -> Self {
        let series = ledger.series();
        let mut points = Vec::with_capacity(ledger.trial_count());
        let mut means = Vec::with_capacity(series.len());
        for s in &series {
            let (values, mean) = match metric {
                Metric::Time => (s.times, s.mean_time),
                Metric::Speed => (s.speeds, s.mean_speed),
            };
            let x = s.batch_size as f64;
            points.extend(values.iter().map(|v| (x, *v)));
            means.push((x, mean));
        }

        let x_max = series.last().map_or(1.0, |s| s.batch_size as f64) + 1.0;
        let top = points.iter().map(|p| p.1).fold(0.0, f64::max);
        let y_max = if top > 0.0 { top * 1.1 } else { 1.0 };
        Self {
            points,
            means,
            x_max,
            y_max,
        }
    }
}

/// Renders ledgers to PNG. Holds no state between figures.
pub struct Reporter {
    panel_size: (u32, u32),
}

impl Default for Reporter {
    fn default() -> Self {
        Self {
            panel_size: (640, 360),
        }
    }
}

impl Reporter {
    /// Two stacked panels (time over speed) for one pair.
    pub fn render_pair(&self, pair: &BenchPair, ledger: &Ledger, path: &Path) -> Result<()> {
        let (w, h) = self.panel_size;
        let root = BitMapBackend::new(path, (w, h * 2)).into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;
        let areas = root.split_evenly((2, 1));
        for (area, metric) in areas.iter().zip([Metric::Time, Metric::Speed]) {
            draw_panel(area, &panel_title(pair, metric), metric, ledger)?;
        }
        root.present().map_err(plot_err)?;
        Ok(())
    }

    /// Grid of every pair: one column per strategy, a time row and a speed
    /// row per peer.
    pub fn render_combined(
        &self,
        peers: &[PeerDescriptor],
        strategies: &[StrategyKind],
        ledgers: &[(BenchPair, Ledger)],
        path: &Path,
    ) -> Result<()> {
        if peers.is_empty() || strategies.is_empty() {
            return Err(anyhow!("nothing to plot"));
        }
        let (w, h) = self.panel_size;
        let rows = peers.len() * 2;
        let cols = strategies.len();
        let root =
            BitMapBackend::new(path, (w * cols as u32, h * rows as u32)).into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;
        let areas = root.split_evenly((rows, cols));

        let empty = Ledger::new();
        for (i, peer) in peers.iter().enumerate() {
            for (j, strategy) in strategies.iter().enumerate() {
                let pair = BenchPair::new(peer.clone(), *strategy);
                let ledger = ledgers
                    .iter()
                    .find(|(p, _)| *p == pair)
                    .map_or(&empty, |(_, l)| l);
                for (k, metric) in [Metric::Time, Metric::Speed].into_iter().enumerate() {
                    let area = &areas[(2 * i + k) * cols + j];
                    draw_panel(area, &panel_title(&pair, metric), metric, ledger)?;
                }
            }
        }
        root.present().map_err(plot_err)?;
        Ok(())
    }

    /// Loads every pair from `store` and writes the per-pair figures next to
    /// their ledgers plus the combined figure at the results root. Returns the
    /// files written.
    pub fn render_all(
        &self,
        store: &JsonLedgerStore,
        peers: &[PeerDescriptor],
        strategies: &[StrategyKind],
    ) -> Result<Vec<PathBuf>> {
        let ledgers = load_all(store, peers, strategies)?;
        let mut written = Vec::new();
        for (pair, ledger) in &ledgers {
            if ledger.is_empty() {
                continue;
            }
            let dir = store.pair_dir(pair);
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(PAIR_PLOT);
            self.render_pair(pair, ledger, &path)?;
            written.push(path);
        }

        std::fs::create_dir_all(store.root())?;
        let path = store.root().join(COMBINED_PLOT);
        self.render_combined(peers, strategies, &ledgers, &path)?;
        written.push(path);
        info!("rendered {} figures", written.len());
        Ok(written)
    }
}

/// Ledger of every (peer, strategy) pair, peers outermost.
pub fn load_all(
    store: &JsonLedgerStore,
    peers: &[PeerDescriptor],
    strategies: &[StrategyKind],
) -> Result<Vec<(BenchPair, Ledger)>> {
    let mut out = Vec::with_capacity(peers.len() * strategies.len());
    for peer in peers {
        for strategy in strategies {
            let pair = BenchPair::new(peer.clone(), *strategy);
            let ledger = store.load(&pair)?;
            out.push((pair, ledger));
        }
    }
    Ok(out)
}

fn panel_title(pair: &BenchPair, metric: Metric) -> String {
    format!("{pair} {}", metric.caption())
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    metric: Metric,
    ledger: &Ledger,
) -> Result<()> {
    let data = PanelData::from_ledger(ledger, metric);

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(55)
        .build_cartesian_2d(0f64..data.x_max, 0f64..data.y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .light_line_style(WHITE.mix(0.3))
        .x_desc("Number of keys")
        .y_desc(metric.axis())
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            data.points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, BLACK.filled())),
        )
        .map_err(plot_err)?;
    chart
        .draw_series(LineSeries::new(data.means.iter().copied(), &RED))
        .map_err(plot_err)?;
    chart
        .draw_series(
            data.means
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 4, RED.filled())),
        )
        .map_err(plot_err)?;
    Ok(())
}

fn plot_err<E: std::fmt::Debug>(e: E) -> anyhow::Error {
    anyhow!("chart rendering failed: {e:?}")
}

// ---------------------------------------------------------------------------
// Summary table
// ---------------------------------------------------------------------------

pub fn print_summary_header() {
    println!(
        "{:<28} {:>6} {:>8} {:>12} {:>14}",
        "Pair", "Keys", "Samples", "Mean time", "Mean speed"
    );
    println!("{}", "-".repeat(72));
}

/// One row per batch size, then an overall row for the pair.
pub fn print_summary_rows(pair: &BenchPair, ledger: &Ledger) {
    let label = pair.to_string();
    if ledger.is_empty() {
        println!("{:<28} {:>6} {:>8} {:>12} {:>14}", label, "-", 0, "-", "-");
        return;
    }
    for s in ledger.series() {
        print_summary_row(
            &label,
            &s.batch_size.to_string(),
            s.times.len(),
            s.mean_time,
            s.mean_speed,
        );
    }
    if let (Some(time), Some(speed)) = overall_means(ledger) {
        print_summary_row(&label, "all", ledger.trial_count(), time, speed);
    }
}

fn print_summary_row(label: &str, keys: &str, samples: usize, mean_time: f64, mean_speed: f64) {
    println!(
        "{:<28} {:>6} {:>8} {:>12} {:>14}",
        label,
        keys,
        samples,
        format_duration(mean_time * 1000.0),
        format!("{mean_speed:.1} KB/s")
    );
}

/// Mean time and speed over every sample of the ledger.
pub fn overall_means(ledger: &Ledger) -> (Option<f64>, Option<f64>) {
    let n = ledger.trial_count();
    if n == 0 {
        return (None, None);
    }
    let sum = |map: &std::collections::BTreeMap<usize, Vec<f64>>| {
        map.values().flatten().sum::<f64>() / n as f64
    };
    (Some(sum(ledger.times())), Some(sum(ledger.speeds())))
}

pub fn format_duration(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.1} µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.1} ms", ms)
    } else {
        format!("{:.2} s", ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockbench_core::{ThroughputMode, TrialSample};
    use std::time::Duration;

    fn ledger() -> Ledger {
        let mut ledger = Ledger::new();
        for (size, ms) in [(2, 100), (2, 300), (5, 400)] {
            ledger.append(
                size,
                &TrialSample::from_blocks(
                    &vec![1000; size],
                    Duration::from_millis(ms),
                    ThroughputMode::Exact,
                ),
            );
        }
        ledger
    }

    #[test]
    fn test_panel_points_and_means() {
        let data = PanelData::from_ledger(&ledger(), Metric::Time);
        assert_eq!(data.points.len(), 3);
        assert_eq!(data.means.len(), 2);
        assert_eq!(data.means[0].0, 2.0);
        assert!((data.means[0].1 - 0.2).abs() < 1e-9);
        assert!((data.means[1].1 - 0.4).abs() < 1e-9);
        assert_eq!(data.x_max, 6.0);
        assert!((data.y_max - 0.44).abs() < 1e-9);
    }

    #[test]
    fn test_speed_panel() {
        let data = PanelData::from_ledger(&ledger(), Metric::Speed);
        // 2000 bytes in 0.1s = 20 KB/s
        assert!((data.points[0].1 - 20.0).abs() < 1e-9);
        assert!(data.points.iter().all(|p| p.1 <= data.y_max));
    }

    #[test]
    fn test_empty_panel_has_usable_ranges() {
        let data = PanelData::from_ledger(&Ledger::new(), Metric::Time);
        assert!(data.points.is_empty());
        assert_eq!(data.x_max, 2.0);
        assert_eq!(data.y_max, 1.0);
    }

    #[test]
    fn test_overall_means() {
        let (time, speed) = overall_means(&ledger());
        assert!((time.unwrap() - 0.8 / 3.0).abs() < 1e-9);
        assert!(speed.unwrap() > 0.0);
        assert_eq!(overall_means(&Ledger::new()), (None, None));
    }

    #[test]
    fn test_load_all_covers_every_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLedgerStore::new(dir.path());
        let peer =
            PeerDescriptor::new("new", "/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWNew").unwrap();
        let pair = BenchPair::new(peer.clone(), StrategyKind::Sequential);
        store.merge_and_save(&pair, &ledger()).unwrap();

        let all = load_all(&store, &[peer], &StrategyKind::ALL).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].1.is_empty());
        assert_eq!(all[1].0, pair);
        assert_eq!(all[1].1.trial_count(), 3);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.5), "500.0 µs");
        assert_eq!(format_duration(12.34), "12.3 ms");
        assert_eq!(format_duration(2500.0), "2.50 s");
    }
}
