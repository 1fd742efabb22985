use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use blockbench_core::{BenchError, BenchPair, BenchResult, Ledger, LedgerStore};

const TIMES_FILE: &str = "times.json";
const SPEEDS_FILE: &str = "speeds.json";
/// Both documents of a save in progress. Its presence means the pair of
/// visible files may be mixed and must not be read.
const COMMIT_FILE: &str = "ledger.commit.json";

#[derive(Serialize)]
struct CommitRecord<'a> {
    times: &'a BTreeMap<usize, Vec<f64>>,
    speeds: &'a BTreeMap<usize, Vec<f64>>,
}

#[derive(Deserialize)]
struct CommittedDocuments {
    times: BTreeMap<String, Vec<f64>>,
    speeds: BTreeMap<String, Vec<f64>>,
}

/// Ledgers as pairs of JSON documents under
/// `<root>/<peer nickname>/<strategy>/{times,speeds}.json`.
///
/// Each document maps a batch size (as a decimal string) to its samples, in
/// the same shape earlier versions of the harness wrote, so existing result
/// directories load unchanged.
///
/// A save first commits both documents in one file, then replaces the two
/// visible files, then drops the commit file. While the commit file exists it
/// is the ledger, so an interrupted save reads as either the old ledger or
/// the new one, never a mix of both.
pub struct JsonLedgerStore {
    root: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pair_dir(&self, pair: &BenchPair) -> PathBuf {
        self.root
            .join(pair.peer.nickname())
            .join(pair.strategy.tag())
    }

    pub fn load_dir(dir: &Path) -> BenchResult<Ledger> {
        let times_path = dir.join(TIMES_FILE);
        let speeds_path = dir.join(SPEEDS_FILE);
        let commit_path = dir.join(COMMIT_FILE);
        let location = dir.display().to_string();

        if commit_path.exists() {
            debug!("reading committed ledger at {location} (previous save unfinished)");
            let docs: CommittedDocuments = read_document(&commit_path)?;
            return Ledger::from_documents(docs.times, docs.speeds, &location);
        }

        match (times_path.exists(), speeds_path.exists()) {
            (false, false) => {
                debug!("no ledger at {location}, starting empty");
                Ok(Ledger::new())
            }
            (true, true) => {
                let times = read_document(&times_path)?;
                let speeds = read_document(&speeds_path)?;
                Ledger::from_documents(times, speeds, &location)
            }
            (times_present, _) => Err(BenchError::CorruptLedger {
                path: location,
                reason: format!(
                    "{} is missing",
                    if times_present { SPEEDS_FILE } else { TIMES_FILE }
                ),
            }),
        }
    }

    /// Replaces the ledger in `dir`. Every file lands by rename from a synced
    /// temporary in the same directory.
    pub fn save_dir(dir: &Path, ledger: &Ledger) -> BenchResult<()> {
        Self::save_dir_with(dir, ledger, |tmp, dest| {
            tmp.persist(dest).map(|_| ()).map_err(|e| e.error)
        })
    }

    fn save_dir_with<F>(dir: &Path, ledger: &Ledger, mut publish: F) -> BenchResult<()>
    where
        F: FnMut(NamedTempFile, &Path) -> io::Result<()>,
    {
        std::fs::create_dir_all(dir)?;
        let record = CommitRecord {
            times: ledger.times(),
            speeds: ledger.speeds(),
        };
        let commit = write_temp(dir, &record)?;
        let times = write_temp(dir, ledger.times())?;
        let speeds = write_temp(dir, ledger.speeds())?;

        publish(commit, &dir.join(COMMIT_FILE))?;
        publish(speeds, &dir.join(SPEEDS_FILE))?;
        publish(times, &dir.join(TIMES_FILE))?;
        if let Err(e) = std::fs::remove_file(dir.join(COMMIT_FILE)) {
            // the commit file holds the same ledger, so reads stay correct
            warn!("could not remove {COMMIT_FILE} in {}: {e}", dir.display());
        }
        debug!(
            "saved ledger at {} ({} trials)",
            dir.display(),
            ledger.trial_count()
        );
        Ok(())
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self, pair: &BenchPair) -> BenchResult<Ledger> {
        Self::load_dir(&self.pair_dir(pair))
    }

    fn merge_and_save(&self, pair: &BenchPair, ledger: &Ledger) -> BenchResult<()> {
        Self::save_dir(&self.pair_dir(pair), ledger)
    }
}

fn read_document<T: serde::de::DeserializeOwned>(path: &Path) -> BenchResult<T> {
    let corrupt = |reason: String| BenchError::CorruptLedger {
        path: path.display().to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))
}

fn write_temp<T: Serialize + ?Sized>(dir: &Path, value: &T) -> BenchResult<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    Ok(tmp)
}
