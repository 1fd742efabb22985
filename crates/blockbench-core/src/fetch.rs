use std::collections::HashMap;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::{ContentAddress, Endpoint};
use crate::batch::FetchBatch;
use crate::error::{BenchError, BenchResult};
use crate::transport::{join_url, Transport};

/// The two retrieval disciplines under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[serde(alias = "async")]
    Concurrent,
    #[serde(alias = "sync")]
    Sequential,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 2] = [StrategyKind::Concurrent, StrategyKind::Sequential];

    /// Directory and label component for this strategy.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Concurrent => "concurrent",
            Self::Sequential => "sequential",
        }
    }

    pub fn build(&self, verify_blocks: bool) -> Box<dyn FetchStrategy> {
        match self {
            Self::Concurrent => Box::new(ConcurrentFetch { verify_blocks }),
            Self::Sequential => Box::new(SequentialFetch { verify_blocks }),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Bytes retrieved for a batch and the wall time the batch took.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub blocks: HashMap<ContentAddress, Vec<u8>>,
    pub elapsed: Duration,
}

impl FetchOutcome {
    pub fn total_bytes(&self) -> usize {
        self.blocks.values().map(Vec::len).sum()
    }

    pub fn block_lens(&self) -> Vec<usize> {
        self.blocks.values().map(Vec::len).collect()
    }
}

pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Retrieves every address of `batch` from the retrieval API rooted at
    /// `endpoint`. Any failed request fails the whole batch; no partial
    /// results are returned.
    fn fetch(
        &self,
        transport: &dyn Transport,
        batch: &FetchBatch,
        endpoint: &str,
    ) -> BenchResult<FetchOutcome>;
}

// ---------------------------------------------------------------------------
// Sequential
// ---------------------------------------------------------------------------

/// One request at a time, in batch order; stops at the first failure.
#[derive(Debug, Clone, Default)]
pub struct SequentialFetch {
    pub verify_blocks: bool,
}

impl FetchStrategy for SequentialFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    fn fetch(
        &self,
        transport: &dyn Transport,
        batch: &FetchBatch,
        endpoint: &str,
    ) -> BenchResult<FetchOutcome> {
        debug!("sequential fetch: sequencing {} requests", batch.len());
        let start = Instant::now();
        let mut blocks = HashMap::with_capacity(batch.len());
        for addr in batch.addresses() {
            let bytes = fetch_one(transport, endpoint, addr, self.verify_blocks)?;
            blocks.insert(addr.clone(), bytes);
        }
        let elapsed = start.elapsed();
        info!(
            "sequential fetch: {} blocks in {:.3}s",
            blocks.len(),
            elapsed.as_secs_f64()
        );
        Ok(FetchOutcome { blocks, elapsed })
    }
}

// ---------------------------------------------------------------------------
// Concurrent
// ---------------------------------------------------------------------------

/// Every request of the batch in flight at once over the shared transport.
///
/// A failed request does not stop the others: all of them are drained before
/// the first failure (in batch order) is returned.
///
/// Each request gets its own OS thread and there is no cap, so a batch larger
/// than the process thread limit fails with a fatal `Io` error from spawn.
#[derive(Debug, Clone, Default)]
pub struct ConcurrentFetch {
    pub verify_blocks: bool,
}

impl FetchStrategy for ConcurrentFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Concurrent
    }

    fn fetch(
        &self,
        transport: &dyn Transport,
        batch: &FetchBatch,
        endpoint: &str,
    ) -> BenchResult<FetchOutcome> {
        debug!("concurrent fetch: gathering {} requests", batch.len());
        let verify = self.verify_blocks;
        let start = Instant::now();

        let results = thread::scope(|scope| -> BenchResult<Vec<BenchResult<Vec<u8>>>> {
            let mut handles = Vec::with_capacity(batch.len());
            for (i, addr) in batch.addresses().iter().enumerate() {
                let handle = thread::Builder::new()
                    .name(format!("fetch-{i}"))
                    .spawn_scoped(scope, move || fetch_one(transport, endpoint, addr, verify))?;
                handles.push(handle);
            }
            Ok(handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect())
        })?;
        let elapsed = start.elapsed();

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("concurrent fetch: {failed} of {} requests failed", batch.len());
        }

        let mut blocks = HashMap::with_capacity(batch.len());
        for (addr, result) in batch.addresses().iter().zip(results) {
            blocks.insert(addr.clone(), result?);
        }
        info!(
            "concurrent fetch: {} blocks in {:.3}s",
            blocks.len(),
            elapsed.as_secs_f64()
        );
        Ok(FetchOutcome { blocks, elapsed })
    }
}

fn fetch_one(
    transport: &dyn Transport,
    endpoint: &str,
    addr: &ContentAddress,
    verify: bool,
) -> BenchResult<Vec<u8>> {
    let variant = addr.endpoint();
    let url = join_url(endpoint, variant.path());
    let arg = addr.to_string();

    let start = Instant::now();
    let resp = transport
        .post(&url, &[arg.as_str()])
        .map_err(|e| BenchError::Fetch {
            address: arg.clone(),
            status: None,
            reason: e.to_string(),
        })?;
    if !resp.is_success() {
        return Err(BenchError::Fetch {
            address: arg,
            status: Some(resp.status),
            reason: resp.body_excerpt(),
        });
    }
    debug!(
        "{}: {:.3}s | {} ({} bytes)",
        variant.label(),
        start.elapsed().as_secs_f64(),
        arg,
        resp.body.len()
    );

    // cat returns file content, not the block, so only raw blocks can be checked
    if verify && variant == Endpoint::BlockGet && addr.verify(&resp.body) == Some(false) {
        return Err(BenchError::Integrity { address: arg });
    }
    Ok(resp.body)
}
