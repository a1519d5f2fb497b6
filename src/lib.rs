//! Node core for a distributed time-series store.
//!
//! When a node starts, restarts, or reshards, the in-memory state for each
//! namespace and shard is rebuilt from durable sources (fileset volumes,
//! the commit log, peer replicas) before the node serves reads or flushes
//! new blocks. The bootstrap manager sequences that rebuild, the process
//! folds a request through the bootstrapper chain, and the readiness gates
//! on namespaces and shards agree exactly with what the run fulfilled.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod bootstrap;
pub mod clock;
pub mod commitlog;
pub mod error;
pub mod fileset;
pub mod flush;
pub mod manager;
pub mod mediator;
pub mod namespace;
pub mod retention;
pub mod retry;
pub mod series;
pub mod shard;
pub mod telemetry;
pub mod time;

pub use bootstrap::{
    target_ranges, Bootstrapper, CommitLogBootstrapper, FatalBootstrapError,
    FilesystemBootstrapper, NamespaceRequest, NoOpAllBootstrapper, NoOpNoneBootstrapper,
    PeerBlockClient, PeerFetchError, PeersBootstrapper, PeersBootstrapperOptions, Process,
    ProcessOutput, ResultMergeError, RunOptions, ShardBlocks, ShardResult, TargetRange,
};
pub use bootstrap::BootstrapResult;
pub use clock::{system_now, ClockOptions, NowFn};
pub use commitlog::{
    discover_segments, CommitLogEntry, CommitLogError, CommitLogReplayResult,
    CommitLogReplayScanner, CommitLogSegmentRef, CommitLogTruncation, CommitLogWriter,
};
pub use error::{BootstrapError, GateError, MultiError};
pub use fileset::{FilesetError, FilesetInfo, FilesetLayout, FilesetReader, FilesetWriter};
pub use flush::{FlushManager, FlushReport};
pub use manager::{BootstrapManager, BootstrapManagerOptions, BootstrapPhase, Database};
pub use mediator::{FileOpsMediator, FileOpsPause, Mediator};
pub use namespace::{Namespace, NamespaceBootstrapState};
pub use retention::RetentionOptions;
pub use retry::{RetryHandle, RetryPolicy, RetryStrategy};
pub use series::{Datapoint, SeriesBlock, SeriesBuffers, SeriesId};
pub use shard::{Shard, ShardBootstrapState, ShardId};
pub use telemetry::{MetricsRegistry, MetricsSnapshot, SharedMetricsRegistry};
pub use time::{RangeSet, TimeRange, UnixNanos};
