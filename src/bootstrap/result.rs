use crate::series::{SeriesBlock, SeriesId};
use crate::shard::ShardId;
use crate::time::{RangeSet, UnixNanos};
use std::collections::BTreeMap;
use thiserror::Error;

/// Bootstrapped data for one shard: series id -> block start -> block.
pub type ShardBlocks = BTreeMap<SeriesId, BTreeMap<UnixNanos, SeriesBlock>>;

/// What one chain call produced for a single shard: fulfilled blocks plus
/// the ranges nothing satisfied.
#[derive(Debug, Clone, Default)]
pub struct ShardResult {
    blocks: ShardBlocks,
    unfulfilled: RangeSet,
}

impl ShardResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unfulfilled_only(unfulfilled: RangeSet) -> Self {
        Self {
            blocks: ShardBlocks::new(),
            unfulfilled,
        }
    }

    pub fn add_block(
        &mut self,
        series: &str,
        block_start: UnixNanos,
        block: SeriesBlock,
    ) -> Result<(), ResultMergeError> {
        let starts = self.blocks.entry(series.to_string()).or_default();
        if starts.contains_key(&block_start) {
            return Err(ResultMergeError {
                series: series.to_string(),
                block_start,
            });
        }
        starts.insert(block_start, block);
        Ok(())
    }

    pub fn set_unfulfilled(&mut self, unfulfilled: RangeSet) {
        self.unfulfilled = unfulfilled;
    }

    pub fn add_unfulfilled(&mut self, unfulfilled: &RangeSet) {
        self.unfulfilled.add_set(unfulfilled);
    }

    pub fn blocks(&self) -> &ShardBlocks {
        &self.blocks
    }

    pub fn unfulfilled(&self) -> &RangeSet {
        &self.unfulfilled
    }

    pub fn is_fulfilled(&self) -> bool {
        self.unfulfilled.is_empty()
    }

    pub fn num_series(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.values().map(|starts| starts.len()).sum()
    }

    pub fn into_parts(self) -> (ShardBlocks, RangeSet) {
        (self.blocks, self.unfulfilled)
    }

    /// Union of two results for the same shard. Fulfilled data unions by
    /// series and block start; a duplicate block start is a bootstrapper
    /// bug. Unfulfilled ranges union and re-canonicalize.
    pub fn merge(&mut self, other: ShardResult) -> Result<(), ResultMergeError> {
        for (series, starts) in other.blocks {
            for (block_start, block) in starts {
                self.add_block(&series, block_start, block)?;
            }
        }
        self.unfulfilled = self.unfulfilled.union(&other.unfulfilled);
        Ok(())
    }

    /// Drops blocks whose window has no overlap with `requested`. Stages
    /// must clip their own output; this is the caller's backstop.
    pub fn retain_within(&mut self, requested: &RangeSet, block_size: std::time::Duration) {
        for starts in self.blocks.values_mut() {
            starts.retain(|&block_start, _| {
                requested.overlaps(&crate::time::TimeRange::new(
                    block_start,
                    block_start + block_size,
                ))
            });
        }
        self.blocks.retain(|_, starts| !starts.is_empty());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("series {series} already holds bootstrapped data at block start {block_start}")]
pub struct ResultMergeError {
    pub series: SeriesId,
    pub block_start: UnixNanos,
}

/// Shard -> result mapping for one chain call or one whole process run.
#[derive(Debug, Clone, Default)]
pub struct BootstrapResult {
    shards: BTreeMap<ShardId, ShardResult>,
}

impl BootstrapResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shard_result(&self, shard: ShardId) -> Option<&ShardResult> {
        self.shards.get(&shard)
    }

    pub fn shard_entry(&mut self, shard: ShardId) -> &mut ShardResult {
        self.shards.entry(shard).or_default()
    }

    pub fn insert(&mut self, shard: ShardId, result: ShardResult) {
        self.shards.insert(shard, result);
    }

    pub fn remove(&mut self, shard: ShardId) -> Option<ShardResult> {
        self.shards.remove(&shard)
    }

    pub fn shards(&self) -> impl Iterator<Item = (ShardId, &ShardResult)> {
        self.shards.iter().map(|(&shard, result)| (shard, result))
    }

    pub fn into_shards(self) -> BTreeMap<ShardId, ShardResult> {
        self.shards
    }

    /// Per-shard merge; the first duplicate block start aborts with the
    /// offending shard.
    pub fn merge(&mut self, other: BootstrapResult) -> Result<(), (ShardId, ResultMergeError)> {
        for (shard, result) in other.shards {
            self.shards
                .entry(shard)
                .or_default()
                .merge(result)
                .map_err(|err| (shard, err))?;
        }
        Ok(())
    }
}
