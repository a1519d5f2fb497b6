use crate::time::{TimeRange, UnixNanos};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub type SeriesId = String;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    pub timestamp: UnixNanos,
    pub value: f64,
}

/// Datapoints for one series within one block window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesBlock {
    datapoints: Vec<Datapoint>,
}

impl SeriesBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_datapoints(datapoints: Vec<Datapoint>) -> Self {
        Self { datapoints }
    }

    pub fn push(&mut self, datapoint: Datapoint) {
        self.datapoints.push(datapoint);
    }

    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    fn extend(&mut self, other: SeriesBlock) {
        self.datapoints.extend(other.datapoints);
    }
}

/// In-memory buffers for one shard: series id -> block start -> datapoints.
///
/// Writes may land before the shard is bootstrapped; installed results are
/// folded into whatever the buffers already hold.
#[derive(Debug, Default)]
pub struct SeriesBuffers {
    series: BTreeMap<SeriesId, BTreeMap<UnixNanos, SeriesBlock>>,
}

impl SeriesBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, id: &str, datapoint: Datapoint, block_size: Duration) {
        let block_start = datapoint.timestamp.truncate_to(block_size);
        self.series
            .entry(id.to_string())
            .or_default()
            .entry(block_start)
            .or_default()
            .push(datapoint);
    }

    /// Folds a bootstrapped block into the buffers, unioning with datapoints
    /// buffered by writes that preceded the install.
    pub fn absorb_block(&mut self, id: &str, block_start: UnixNanos, block: SeriesBlock) {
        self.series
            .entry(id.to_string())
            .or_default()
            .entry(block_start)
            .or_default()
            .extend(block);
    }

    /// Datapoints for `id` within `range`, ordered by timestamp.
    pub fn fetch(&self, id: &str, range: TimeRange) -> Vec<Datapoint> {
        let Some(blocks) = self.series.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<Datapoint> = blocks
            .values()
            .flat_map(|block| block.datapoints().iter().copied())
            .filter(|dp| range.contains(dp.timestamp))
            .collect();
        out.sort_by_key(|dp| dp.timestamp);
        out
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn series_ids(&self) -> Vec<SeriesId> {
        self.series.keys().cloned().collect()
    }

    pub fn block_starts(&self) -> BTreeSet<UnixNanos> {
        self.series
            .values()
            .flat_map(|blocks| blocks.keys().copied())
            .collect()
    }

    /// Owned copy of every series' block at `block_start`, for flushing.
    pub fn block_snapshot(&self, block_start: UnixNanos) -> BTreeMap<SeriesId, SeriesBlock> {
        self.series
            .iter()
            .filter_map(|(id, blocks)| {
                blocks
                    .get(&block_start)
                    .filter(|block| !block.is_empty())
                    .map(|block| (id.clone(), block.clone()))
            })
            .collect()
    }
}
