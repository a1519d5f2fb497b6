use crate::bootstrap::result::{BootstrapResult, ShardResult};
use crate::bootstrap::targets::RunOptions;
use crate::shard::ShardId;
use crate::time::RangeSet;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// The ranges still needed for one namespace, shard by shard, together with
/// the block granularity stages clip against.
#[derive(Debug, Clone)]
pub struct NamespaceRequest {
    pub namespace: String,
    pub block_size: Duration,
    pub shard_ranges: BTreeMap<ShardId, RangeSet>,
}

impl NamespaceRequest {
    pub fn new(
        namespace: impl Into<String>,
        block_size: Duration,
        shard_ranges: BTreeMap<ShardId, RangeSet>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            block_size,
            shard_ranges,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shard_ranges.values().all(|ranges| ranges.is_empty())
    }
}

/// A stage abort. Carries whatever the stage completed before dying so the
/// caller can still install data for unaffected shards.
#[derive(Debug, Error)]
#[error("bootstrapper {bootstrapper} aborted: {message}")]
pub struct FatalBootstrapError {
    pub bootstrapper: &'static str,
    pub shard: Option<ShardId>,
    pub message: String,
    pub partial: BootstrapResult,
}

impl FatalBootstrapError {
    pub fn new(bootstrapper: &'static str, message: impl Into<String>) -> Self {
        Self {
            bootstrapper,
            shard: None,
            message: message.into(),
            partial: BootstrapResult::new(),
        }
    }

    pub fn with_shard(mut self, shard: ShardId) -> Self {
        self.shard = Some(shard);
        self
    }

    pub fn with_partial(mut self, partial: BootstrapResult) -> Self {
        self.partial = partial;
        self
    }
}

/// One pipeline stage. A stage may fulfill any subset of the request,
/// including nothing; whatever it does not fulfill it must report exactly,
/// so fulfilled and unfulfilled partition the input with no gaps or
/// overlaps. Recoverable problems (missing volume, unreachable replica) are
/// expressed as unfulfilled ranges; only an abort of the whole call is an
/// error.
pub trait Bootstrapper: Send + Sync {
    fn name(&self) -> &'static str;

    fn bootstrap(
        &self,
        request: &NamespaceRequest,
        run_options: RunOptions,
    ) -> Result<BootstrapResult, FatalBootstrapError>;
}

/// Terminal chain stage: declines everything, leaving the request
/// unfulfilled for the caller to surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpAllBootstrapper;

impl NoOpAllBootstrapper {
    pub fn new() -> Self {
        Self
    }
}

impl Bootstrapper for NoOpAllBootstrapper {
    fn name(&self) -> &'static str {
        "noop-all"
    }

    fn bootstrap(
        &self,
        request: &NamespaceRequest,
        _run_options: RunOptions,
    ) -> Result<BootstrapResult, FatalBootstrapError> {
        let mut result = BootstrapResult::new();
        for (&shard, requested) in &request.shard_ranges {
            result.insert(shard, ShardResult::unfulfilled_only(requested.clone()));
        }
        Ok(result)
    }
}

/// Declares every requested range trivially fulfilled without producing
/// data. Useful as a stand-in stage in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpNoneBootstrapper;

impl NoOpNoneBootstrapper {
    pub fn new() -> Self {
        Self
    }
}

impl Bootstrapper for NoOpNoneBootstrapper {
    fn name(&self) -> &'static str {
        "noop-none"
    }

    fn bootstrap(
        &self,
        request: &NamespaceRequest,
        _run_options: RunOptions,
    ) -> Result<BootstrapResult, FatalBootstrapError> {
        let mut result = BootstrapResult::new();
        for &shard in request.shard_ranges.keys() {
            result.insert(shard, ShardResult::new());
        }
        Ok(result)
    }
}
