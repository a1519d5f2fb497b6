use crate::bootstrap::ShardBlocks;
use crate::error::GateError;
use crate::series::{Datapoint, SeriesBlock, SeriesBuffers, SeriesId};
use crate::time::{RangeSet, TimeRange, UnixNanos};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

pub type ShardId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardBootstrapState {
    NotBootstrapped,
    Bootstrapping,
    Bootstrapped,
}

#[derive(Debug)]
struct ShardInner {
    buffers: SeriesBuffers,
    state: ShardBootstrapState,
    unfulfilled: RangeSet,
    flushed: BTreeSet<UnixNanos>,
}

/// A horizontal partition of a namespace and the unit of readiness. Reads
/// and flushes are admitted only once the shard's bootstrap left nothing
/// unfulfilled.
#[derive(Debug, Clone)]
pub struct Shard {
    id: ShardId,
    inner: Arc<Mutex<ShardInner>>,
}

impl Shard {
    pub fn new(id: ShardId) -> Self {
        Self {
            id,
            inner: Arc::new(Mutex::new(ShardInner {
                buffers: SeriesBuffers::new(),
                state: ShardBootstrapState::NotBootstrapped,
                unfulfilled: RangeSet::new(),
                flushed: BTreeSet::new(),
            })),
        }
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn bootstrap_state(&self) -> ShardBootstrapState {
        self.inner.lock().state
    }

    pub fn is_bootstrapped_to_read(&self) -> bool {
        self.bootstrap_state() == ShardBootstrapState::Bootstrapped
    }

    pub fn is_bootstrapped_to_flush(&self) -> bool {
        self.bootstrap_state() == ShardBootstrapState::Bootstrapped
    }

    pub fn unfulfilled(&self) -> RangeSet {
        self.inner.lock().unfulfilled.clone()
    }

    /// Writes are admitted regardless of readiness; pre-bootstrap writes
    /// buffer in memory and installed results fold in around them.
    pub fn write(&self, series: &str, datapoint: Datapoint, block_size: Duration) {
        self.inner.lock().buffers.write(series, datapoint, block_size);
    }

    pub fn fetch(&self, series: &str, range: TimeRange) -> Result<Vec<Datapoint>, GateError> {
        let inner = self.inner.lock();
        if inner.state != ShardBootstrapState::Bootstrapped {
            return Err(GateError::ShardNotBootstrappedToRead);
        }
        Ok(inner.buffers.fetch(series, range))
    }

    /// Installs one run's result: folds the blocks into the live buffers
    /// and records what stayed unfulfilled. The shard ends `Bootstrapped`
    /// only if nothing is unfulfilled and the run reported no error against
    /// it.
    ///
    /// The bootstrapping flag is held across the fold so a concurrent
    /// install is refused rather than interleaved; writers always observe
    /// either the pre-install or post-install buffers.
    pub fn install(
        &self,
        blocks: ShardBlocks,
        unfulfilled: RangeSet,
        had_error: bool,
    ) -> Result<ShardBootstrapState, GateError> {
        {
            let mut inner = self.inner.lock();
            if inner.state == ShardBootstrapState::Bootstrapping {
                return Err(GateError::ShardIsBootstrapping);
            }
            inner.state = ShardBootstrapState::Bootstrapping;
        }

        let mut inner = self.inner.lock();
        for (series, starts) in blocks {
            for (block_start, block) in starts {
                inner.buffers.absorb_block(&series, block_start, block);
            }
        }
        let state = if unfulfilled.is_empty() && !had_error {
            ShardBootstrapState::Bootstrapped
        } else {
            ShardBootstrapState::NotBootstrapped
        };
        inner.unfulfilled = unfulfilled;
        inner.state = state;
        Ok(state)
    }

    /// Block starts sealed for flushing: old enough that the mutable buffer
    /// can no longer receive them, and not flushed yet.
    pub fn flushable_block_starts(
        &self,
        now: UnixNanos,
        block_size: Duration,
        buffer_past: Duration,
    ) -> Vec<UnixNanos> {
        let inner = self.inner.lock();
        let cutoff = now - buffer_past - block_size;
        inner
            .buffers
            .block_starts()
            .into_iter()
            .filter(|&start| start <= cutoff && !inner.flushed.contains(&start))
            .collect()
    }

    pub fn block_snapshot(&self, block_start: UnixNanos) -> BTreeMap<SeriesId, SeriesBlock> {
        self.inner.lock().buffers.block_snapshot(block_start)
    }

    pub fn mark_flushed(&self, block_start: UnixNanos) {
        self.inner.lock().flushed.insert(block_start);
    }

    pub fn series_count(&self) -> usize {
        self.inner.lock().buffers.series_count()
    }
}
