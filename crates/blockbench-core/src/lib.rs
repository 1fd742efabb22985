pub mod address;
pub mod batch;
pub mod error;
pub mod fetch;
pub mod ledger;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod node;
pub mod peer;
pub mod sample;
pub mod transport;

pub use address::{CidVersion, Codec, ContentAddress, Endpoint, Multihash};
pub use batch::FetchBatch;
pub use error::{BenchError, BenchResult};
pub use fetch::{ConcurrentFetch, FetchOutcome, FetchStrategy, SequentialFetch, StrategyKind};
pub use ledger::{Ledger, LedgerSeries, LedgerStore};
pub use node::{ConnectOutcome, DisconnectOutcome, NodeClient};
pub use peer::{BenchPair, PeerDescriptor, PeerSpec};
pub use sample::{ThroughputMode, TrialSample};
pub use transport::{join_url, HttpResponse, Transport, TransportError};
