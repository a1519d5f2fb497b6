//! The bootstrapper pipeline: target-range derivation, the stage contract,
//! the concrete stages, and the process that folds a request through them.

pub mod bootstrapper;
pub mod commitlog;
pub mod fs;
pub mod peers;
pub mod process;
pub mod result;
pub mod targets;

pub use bootstrapper::{
    Bootstrapper, FatalBootstrapError, NamespaceRequest, NoOpAllBootstrapper,
    NoOpNoneBootstrapper,
};
pub use commitlog::CommitLogBootstrapper;
pub use fs::FilesystemBootstrapper;
pub use peers::{PeerBlockClient, PeerFetchError, PeersBootstrapper, PeersBootstrapperOptions};
pub use process::{Process, ProcessOutput};
pub use result::{BootstrapResult, ResultMergeError, ShardBlocks, ShardResult};
pub use targets::{target_ranges, RunOptions, TargetRange};
